//! Environments mapping names to values
//!
//! Environments are immutable linked frames: `define` returns a new
//! environment sharing its tail with the old one, so closures capture a
//! snapshot that later definitions cannot disturb. Recursive definitions
//! tie the knot through the frame's interior cell (`define_rec`).

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Ident;
use crate::eval::Value;

#[derive(Clone, Default)]
pub struct Env {
    head: Option<Rc<Frame>>,
}

struct Frame {
    name: Ident,
    value: RefCell<Value>,
    next: Option<Rc<Frame>>,
}

impl Env {
    pub fn empty() -> Env {
        Env { head: None }
    }

    /// Build an environment from name/value pairs, earlier pairs first.
    pub fn make(pairs: impl IntoIterator<Item = (Ident, Value)>) -> Env {
        let mut env = Env::empty();
        for (name, value) in pairs {
            env = env.define(&name, value);
        }
        env
    }

    /// Look a name up, innermost binding first.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = self.head.as_ref();
        while let Some(f) = frame {
            if f.name == name {
                return Some(f.value.borrow().clone());
            }
            frame = f.next.as_ref();
        }
        None
    }

    /// Extend with a binding, shadowing any earlier one of the same name.
    pub fn define(&self, name: &str, value: Value) -> Env {
        Env {
            head: Some(Rc::new(Frame {
                name: name.to_string(),
                value: RefCell::new(value),
                next: self.head.clone(),
            })),
        }
    }

    /// Extend with a binding whose value may refer to the extended
    /// environment itself. The new frame is created first with a
    /// placeholder, handed to `make` so the closure can capture it, and
    /// then populated.
    pub fn define_rec(&self, name: &str, make: impl FnOnce(&Env) -> Value) -> Env {
        let env = self.define(name, Value::Unit);
        let value = make(&env);
        if let Some(frame) = env.head.as_ref() {
            *frame.value.borrow_mut() = value;
        }
        env
    }

    /// All bound names, innermost first, shadowed duplicates omitted.
    pub fn names(&self) -> Vec<Ident> {
        let mut seen = Vec::new();
        let mut frame = self.head.as_ref();
        while let Some(f) = frame {
            if !seen.contains(&f.name) {
                seen.push(f.name.clone());
            }
            frame = f.next.as_ref();
        }
        seen
    }
}
