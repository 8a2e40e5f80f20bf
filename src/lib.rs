//! Schist - a small functional language with rendezvous channels and
//! delimited continuations

pub mod ast;
pub mod control;
pub mod env;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod prelude;
pub mod runtime;
pub mod test_support;

pub use ast::{Defn, Expr, Phrase};
pub use env::Env;
pub use eval::{EvalError, Interpreter, Value};
pub use lexer::Lexer;
pub use parser::Parser;
