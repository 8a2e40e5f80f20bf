//! Tree-walking evaluator for Schist
//!
//! Evaluation is big-step and left-to-right, producing `Step`s from the
//! control module so that channel operations can suspend the current task
//! and `throw` can unwind to the nearest handler. Fatal runtime errors
//! (type mismatches, unbound variables, double close) are `EvalError`s
//! and abort the whole phrase; program-level exceptions are `Value`s
//! routed through the exception prompt and are catchable.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BinOp, Case, Defn, Expr, Ident, Phrase, UnaryOp};
use crate::control::{self, Cont, EvalResult, Prompt, Step, Task};
use crate::env::Env;
use crate::prelude;
use crate::runtime::{self, ChannelId, ChannelState, Channels};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("type error: {0}")]
    TypeError(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("channel {0} is already closed")]
    DoubleClose(ChannelId),
    #[error("channel {0} already has a parked task")]
    ChannelBusy(ChannelId),
    #[error("rec needs a function on the right-hand side")]
    RecNotFunction,
    #[error("deadlock detected")]
    Deadlock,
    #[error("control effect escaped its delimiter")]
    EscapedControl,
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

// ============================================================================
// Values
// ============================================================================

#[derive(Clone)]
pub enum Value {
    Unit,
    Int(i64),
    Bool(bool),
    Channel(ChannelId),
    Closure {
        param: Ident,
        body: Rc<Expr>,
        env: Env,
    },
    /// A constructor value (e.g. Cons 1 Nil, ExcClosed)
    Constructor {
        name: Ident,
        fields: Vec<Value>,
    },
    Tuple(Vec<Value>),
    /// A propagating exception wrapping a constructor value
    Exception(Box<Value>),

    // Scheduler-internal markers; these never reach user code or the
    // display.
    /// A locally-resumable continuation from a completed rendezvous
    Resume(Task),
    /// "I just parked on this channel"
    Halted(ChannelId),
    /// "I am parked on this channel; check it before running me"
    Waiting(ChannelId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Channel(_) => "channel",
            Value::Closure { .. } => "function",
            Value::Constructor { .. } => "constructor",
            Value::Tuple(_) => "tuple",
            Value::Exception(_) => "exception",
            Value::Resume(_) => "resume",
            Value::Halted(_) => "halted",
            Value::Waiting(_) => "waiting",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Value::Resume(_) | Value::Halted(_) | Value::Waiting(_)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "unit"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Channel(id) => write!(f, "<handle {}>", id),
            Value::Closure { .. } => write!(f, "<fundef>"),
            Value::Constructor { name, fields } => {
                write!(f, "{}", name)?;
                for field in fields {
                    write!(f, " {}", field)?;
                }
                Ok(())
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Exception(inner) => write!(f, "<unhandled exception -> {}>", inner),
            Value::Resume(_) | Value::Halted(_) | Value::Waiting(_) => {
                unreachable!("internal marker reached display")
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Channel(id) => write!(f, "Channel({})", id),
            // closures may capture themselves through a rec binding, so
            // the environment is not printed
            Value::Closure { param, .. } => write!(f, "Closure({})", param),
            Value::Constructor { name, fields } => {
                write!(f, "Constructor({}, {:?})", name, fields)
            }
            Value::Tuple(items) => write!(f, "Tuple({:?})", items),
            Value::Exception(inner) => write!(f, "Exception({:?})", inner),
            Value::Resume(_) => write!(f, "Resume(..)"),
            Value::Halted(id) => write!(f, "Halted({})", id),
            Value::Waiting(id) => write!(f, "Waiting({})", id),
        }
    }
}

/// Equality is defined only for ints, booleans, unit, and exceptions
/// (compared by their payloads, which bottoms out in the same rule).
fn value_eq(left: &Value, right: &Value) -> Result<bool, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Unit, Value::Unit) => Ok(true),
        (Value::Exception(a), Value::Exception(b)) => value_eq(a, b),
        (a, b) => Err(EvalError::TypeError(format!(
            "cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

// ============================================================================
// Expression evaluation
// ============================================================================

pub fn eval(chans: &mut Channels, expr: &Rc<Expr>, env: &Env) -> EvalResult {
    match expr.as_ref() {
        Expr::Number(n) => Ok(Step::Done(Value::Int(*n))),

        Expr::Variable(name) => match env.get(name) {
            Some(value) => Ok(Step::Done(value)),
            None => Err(EvalError::UnboundVariable(name.clone())),
        },

        Expr::Lambda(param, body) => Ok(Step::Done(Value::Closure {
            param: param.clone(),
            body: body.clone(),
            env: env.clone(),
        })),

        Expr::Apply(func, arg) => {
            let arg = arg.clone();
            let env2 = env.clone();
            let step = eval(chans, func, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, fval| {
                    let step = eval(chans, &arg, &env2)?;
                    control::and_then(
                        chans,
                        step,
                        Rc::new(move |chans, aval| apply(chans, &fval, aval)),
                    )
                }),
            )
        }

        Expr::If(cond, then_branch, else_branch) => {
            let then_branch = then_branch.clone();
            let else_branch = else_branch.clone();
            let env2 = env.clone();
            let step = eval(chans, cond, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, v| match v {
                    Value::Bool(true) => eval(chans, &then_branch, &env2),
                    Value::Bool(false) => eval(chans, &else_branch, &env2),
                    other => Err(EvalError::TypeError(format!(
                        "expected bool in condition, got {}",
                        other.type_name()
                    ))),
                }),
            )
        }

        Expr::Pipe(first, second) => {
            let second = second.clone();
            let env2 = env.clone();
            let step = eval(chans, first, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, _| eval(chans, &second, &env2)),
            )
        }

        Expr::Let(defn, body) => {
            let body = body.clone();
            elab(
                chans,
                defn,
                env,
                Rc::new(move |chans, env2| eval(chans, &body, &env2)),
            )
        }

        Expr::Injector(name, args) => {
            let name = name.clone();
            let items = Rc::new(args.clone());
            eval_list(
                chans,
                items,
                0,
                Vec::new(),
                env.clone(),
                Rc::new(move |_, fields| {
                    Ok(Step::Done(Value::Constructor {
                        name: name.clone(),
                        fields,
                    }))
                }),
            )
        }

        Expr::Match(scrutinee, cases) => {
            let cases = cases.clone();
            let env2 = env.clone();
            let step = eval(chans, scrutinee, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, v| match select_case(&cases, &v, &env2)? {
                    Some((body, bound)) => eval(chans, &body, &bound),
                    None => Ok(control::raise(
                        Prompt::Exc,
                        Value::Exception(Box::new(prelude::exc_match())),
                    )),
                }),
            )
        }

        Expr::TryCatch(body, cases) => {
            let cases = cases.clone();
            let env2 = env.clone();
            let step = eval(chans, body, env)?;
            let step = control::push_prompt(chans, Prompt::Exc, step)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, v| match v {
                    Value::Exception(inner) => match select_case(&cases, &inner, &env2)? {
                        Some((handler, bound)) => eval(chans, &handler, &bound),
                        None => Ok(control::raise(Prompt::Exc, Value::Exception(inner))),
                    },
                    v => Ok(Step::Done(v)),
                }),
            )
        }

        Expr::Throw(excep) => {
            let step = eval(chans, excep, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(|_, v| {
                    if let Value::Constructor { .. } = &v {
                        Ok(control::raise(Prompt::Exc, Value::Exception(Box::new(v))))
                    } else {
                        Err(EvalError::TypeError(format!(
                            "cannot throw {}",
                            v.type_name()
                        )))
                    }
                }),
            )
        }

        Expr::NewChan => {
            let id = chans.fresh();
            chans.update(id, ChannelState::Empty);
            Ok(Step::Done(Value::Channel(id)))
        }

        Expr::Close(chan) => {
            let step = eval(chans, chan, env)?;
            control::and_then(chans, step, Rc::new(move |chans, v| close(chans, &v)))
        }

        Expr::Send(chan, payload) => eval_send(chans, chan, payload, env, true),
        Expr::SendP(chan, payload) => eval_send(chans, chan, payload, env, false),
        Expr::Receive(chan) => eval_receive(chans, chan, env, true),
        Expr::ReceiveP(chan) => eval_receive(chans, chan, env, false),

        Expr::Parallel(components) => {
            let tasks: Vec<Task> = components
                .iter()
                .map(|component| {
                    let component = component.clone();
                    let env = env.clone();
                    Rc::new(move |chans: &mut Channels| {
                        let step = eval(chans, &component, &env)?;
                        control::push_prompt(chans, Prompt::Task, step)
                    }) as Task
                })
                .collect();
            runtime::schedule(chans, tasks)
        }

        Expr::BinPrim(op, left, right) => {
            let op = *op;
            let right = right.clone();
            let env2 = env.clone();
            let step = eval(chans, left, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, a| {
                    let step = eval(chans, &right, &env2)?;
                    control::and_then(
                        chans,
                        step,
                        Rc::new(move |_, b| Ok(Step::Done(apply_binary(op, &a, &b)?))),
                    )
                }),
            )
        }

        Expr::MonPrim(op, operand) => {
            let op = *op;
            let step = eval(chans, operand, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |_, v| Ok(Step::Done(apply_unary(op, &v)?))),
            )
        }
    }
}

/// Apply a function value to an argument.
fn apply(chans: &mut Channels, func: &Value, arg: Value) -> EvalResult {
    match func {
        Value::Closure { param, body, env } => eval(chans, body, &env.define(param, arg)),
        other => Err(EvalError::TypeError(format!(
            "cannot apply {}",
            other.type_name()
        ))),
    }
}

/// Evaluate a list of expressions left to right, then hand the values to
/// `done`. The accumulator is cloned per resumption so a re-entered
/// continuation sees its own copy.
fn eval_list(
    chans: &mut Channels,
    items: Rc<Vec<Rc<Expr>>>,
    index: usize,
    acc: Vec<Value>,
    env: Env,
    done: Rc<dyn Fn(&mut Channels, Vec<Value>) -> EvalResult>,
) -> EvalResult {
    let item = match items.get(index) {
        None => return done(chans, acc),
        Some(item) => item.clone(),
    };
    let step = eval(chans, &item, &env)?;
    control::and_then(
        chans,
        step,
        Rc::new(move |chans, v| {
            let mut acc = acc.clone();
            acc.push(v);
            eval_list(chans, items.clone(), index + 1, acc, env.clone(), done.clone())
        }),
    )
}

// ============================================================================
// Pattern matching
// ============================================================================

fn is_constructor_name(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// View an expression in pattern position as a constructor pattern,
/// flattening an application spine into its head and arguments.
fn injector_pattern(pattern: &Expr) -> Option<(Ident, Vec<Rc<Expr>>)> {
    match pattern {
        Expr::Injector(name, args) => Some((name.clone(), args.clone())),
        Expr::Variable(name) if is_constructor_name(name) => Some((name.clone(), Vec::new())),
        Expr::Apply(head, arg) => {
            let (name, mut args) = injector_pattern(head)?;
            args.push(arg.clone());
            Some((name, args))
        }
        _ => None,
    }
}

/// Match a pattern against a value, extending `env` with its bindings.
/// `None` means the pattern is well-formed but does not match.
fn match_pattern(pattern: &Expr, value: &Value, env: Env) -> Result<Option<Env>, EvalError> {
    match pattern {
        Expr::Number(n) => Ok(match value {
            Value::Int(m) if m == n => Some(env),
            _ => None,
        }),
        Expr::Variable(name) if !is_constructor_name(name) => {
            Ok(Some(env.define(name, value.clone())))
        }
        _ => match injector_pattern(pattern) {
            Some((name, args)) => match value {
                Value::Constructor { name: tag, fields }
                    if *tag == name && fields.len() == args.len() =>
                {
                    let mut env = env;
                    for (sub, field) in args.iter().zip(fields) {
                        match match_pattern(sub, field, env)? {
                            Some(extended) => env = extended,
                            None => return Ok(None),
                        }
                    }
                    Ok(Some(env))
                }
                _ => Ok(None),
            },
            None => Err(EvalError::RuntimeError("invalid pattern".into())),
        },
    }
}

/// Find the first case whose pattern matches, returning its body and the
/// environment extended with the pattern's bindings.
fn select_case(
    cases: &[Case],
    value: &Value,
    env: &Env,
) -> Result<Option<(Rc<Expr>, Env)>, EvalError> {
    for case in cases {
        if let Some(bound) = match_pattern(&case.pattern, value, env.clone())? {
            return Ok(Some((case.body.clone(), bound)));
        }
    }
    Ok(None)
}

// ============================================================================
// Channel primitives
// ============================================================================

fn expect_channel(value: &Value) -> Result<ChannelId, EvalError> {
    match value {
        Value::Channel(id) => Ok(*id),
        other => Err(EvalError::TypeError(format!(
            "expected a channel, got {}",
            other.type_name()
        ))),
    }
}

fn closed_exception() -> Value {
    Value::Exception(Box::new(prelude::exc_closed()))
}

/// Package a parked continuation applied to its wake-up value.
fn resumed(kont: Cont, value: Value) -> Task {
    Rc::new(move |chans| kont(chans, value.clone()))
}

fn close(chans: &mut Channels, chan: &Value) -> EvalResult {
    let id = expect_channel(chan)?;
    match chans.contents(id)? {
        ChannelState::Empty => {
            chans.update(id, ChannelState::Closed);
            Ok(Step::Done(Value::Unit))
        }
        // drain the pending rendezvous first, then seal
        ChannelState::Ready(next, _) => {
            chans.update(id, ChannelState::Ready(next, Box::new(ChannelState::Closed)));
            Ok(Step::Done(Value::Unit))
        }
        ChannelState::WaitingSend(_, sender) => {
            chans.update(
                id,
                ChannelState::Ready(
                    resumed(sender, closed_exception()),
                    Box::new(ChannelState::Closed),
                ),
            );
            Ok(Step::Done(Value::Unit))
        }
        ChannelState::WaitingRecv(receiver) => {
            chans.update(
                id,
                ChannelState::Ready(
                    resumed(receiver, closed_exception()),
                    Box::new(ChannelState::Closed),
                ),
            );
            Ok(Step::Done(Value::Unit))
        }
        ChannelState::Closed => Err(EvalError::DoubleClose(id)),
    }
}

fn eval_send(
    chans: &mut Channels,
    chan: &Rc<Expr>,
    payload: &Rc<Expr>,
    env: &Env,
    escalates: bool,
) -> EvalResult {
    let payload = payload.clone();
    let env2 = env.clone();
    let step = eval(chans, chan, env)?;
    let step = control::and_then(
        chans,
        step,
        Rc::new(move |chans, cv| {
            let id = expect_channel(&cv)?;
            let step = eval(chans, &payload, &env2)?;
            control::and_then(chans, step, Rc::new(move |_, v| Ok(transmit_send(id, v))))
        }),
    )?;
    if escalates {
        escalate(chans, step)
    } else {
        Ok(step)
    }
}

fn eval_receive(chans: &mut Channels, chan: &Rc<Expr>, env: &Env, escalates: bool) -> EvalResult {
    let step = eval(chans, chan, env)?;
    let step = control::and_then(
        chans,
        step,
        Rc::new(move |_, cv| Ok(transmit_recv(expect_channel(&cv)?))),
    )?;
    if escalates {
        escalate(chans, step)
    } else {
        Ok(step)
    }
}

/// The `send`/`recv` wrappers raise a delivered exception through the
/// exception prompt; the primitive forms return it as a plain value.
fn escalate(chans: &mut Channels, step: Step) -> EvalResult {
    control::and_then(
        chans,
        step,
        Rc::new(|_, v| match v {
            Value::Exception(inner) => {
                Ok(control::raise(Prompt::Exc, Value::Exception(inner)))
            }
            v => Ok(Step::Done(v)),
        }),
    )
}

/// The sending half of a rendezvous. Captures up to the task prompt and
/// consults the channel: either the task parks (`Halted` goes to the
/// scheduler, the continuation into the channel) or it resumes locally
/// (`Resume`) with no scheduler hop.
fn transmit_send(id: ChannelId, payload: Value) -> Step {
    control::capture(Prompt::Task, move |chans, rest| {
        let outcome = match chans.contents(id)? {
            ChannelState::Empty => {
                chans.update(id, ChannelState::WaitingSend(payload.clone(), rest.clone()));
                Value::Halted(id)
            }
            ChannelState::WaitingRecv(receiver) => {
                chans.update(
                    id,
                    ChannelState::Ready(
                        resumed(receiver, payload.clone()),
                        Box::new(ChannelState::Empty),
                    ),
                );
                Value::Resume(resumed(rest.clone(), Value::Unit))
            }
            ChannelState::Ready(next, successor) => match *successor {
                // chain behind the continuation awaiting collection
                ChannelState::Empty => {
                    chans.update(
                        id,
                        ChannelState::Ready(
                            next,
                            Box::new(ChannelState::WaitingSend(payload.clone(), rest.clone())),
                        ),
                    );
                    Value::Halted(id)
                }
                ChannelState::Closed => Value::Resume(resumed(rest.clone(), closed_exception())),
                _ => return Err(EvalError::ChannelBusy(id)),
            },
            ChannelState::Closed => Value::Resume(resumed(rest.clone(), closed_exception())),
            ChannelState::WaitingSend(..) => return Err(EvalError::ChannelBusy(id)),
        };
        match outcome {
            Value::Resume(task) => task(chans),
            halted => Ok(Step::Done(halted)),
        }
    })
}

/// The receiving half, symmetric to `transmit_send`.
fn transmit_recv(id: ChannelId) -> Step {
    control::capture(Prompt::Task, move |chans, rest| {
        let outcome = match chans.contents(id)? {
            ChannelState::Empty => {
                chans.update(id, ChannelState::WaitingRecv(rest.clone()));
                Value::Halted(id)
            }
            ChannelState::WaitingSend(payload, sender) => {
                chans.update(
                    id,
                    ChannelState::Ready(
                        resumed(sender, Value::Unit),
                        Box::new(ChannelState::Empty),
                    ),
                );
                Value::Resume(resumed(rest.clone(), payload))
            }
            ChannelState::Ready(next, successor) => match *successor {
                ChannelState::Empty => {
                    chans.update(
                        id,
                        ChannelState::Ready(
                            next,
                            Box::new(ChannelState::WaitingRecv(rest.clone())),
                        ),
                    );
                    Value::Halted(id)
                }
                ChannelState::Closed => Value::Resume(resumed(rest.clone(), closed_exception())),
                _ => return Err(EvalError::ChannelBusy(id)),
            },
            ChannelState::Closed => Value::Resume(resumed(rest.clone(), closed_exception())),
            ChannelState::WaitingRecv(..) => return Err(EvalError::ChannelBusy(id)),
        };
        match outcome {
            Value::Resume(task) => task(chans),
            halted => Ok(Step::Done(halted)),
        }
    })
}

// ============================================================================
// Primitives
// ============================================================================

/// Division rounding toward negative infinity.
fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Remainder taking the divisor's sign.
fn mod_floor(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn apply_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use Value::{Bool, Int};
    match (op, left, right) {
        (BinOp::Plus, Int(a), Int(b)) => Ok(Int(a + b)),
        (BinOp::Minus, Int(a), Int(b)) => Ok(Int(a - b)),
        (BinOp::Times, Int(a), Int(b)) => Ok(Int(a * b)),
        (BinOp::Div, Int(_), Int(0)) | (BinOp::Mod, Int(_), Int(0)) => {
            Err(EvalError::DivisionByZero)
        }
        (BinOp::Div, Int(a), Int(b)) => Ok(Int(div_floor(*a, *b))),
        (BinOp::Mod, Int(a), Int(b)) => Ok(Int(mod_floor(*a, *b))),
        (BinOp::And, Bool(a), Bool(b)) => Ok(Bool(*a && *b)),
        (BinOp::Or, Bool(a), Bool(b)) => Ok(Bool(*a || *b)),
        (BinOp::Equal, a, b) => Ok(Bool(value_eq(a, b)?)),
        (op, a, b) => Err(EvalError::TypeError(format!(
            "cannot apply {:?} to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
        (op, v) => Err(EvalError::TypeError(format!(
            "cannot apply {:?} to {}",
            op,
            v.type_name()
        ))),
    }
}

// ============================================================================
// Definition elaboration
// ============================================================================

pub type EnvCont = Rc<dyn Fn(&mut Channels, Env) -> EvalResult>;

/// Elaborate a definition into an extended environment, passed on to `k`.
/// Elaboration is continuation-passing so a definition body may itself
/// suspend on a channel inside a task.
pub fn elab(chans: &mut Channels, defn: &Defn, env: &Env, k: EnvCont) -> EvalResult {
    match defn {
        Defn::Val(name, rhs) => {
            let name = name.clone();
            let env2 = env.clone();
            let step = eval(chans, rhs, env)?;
            control::and_then(
                chans,
                step,
                Rc::new(move |chans, v| k(chans, env2.define(&name, v))),
            )
        }
        Defn::Rec(name, rhs) => match rhs.as_ref() {
            Expr::Lambda(param, body) => {
                let extended = env.define_rec(name, |extended| Value::Closure {
                    param: param.clone(),
                    body: body.clone(),
                    env: extended.clone(),
                });
                k(chans, extended)
            }
            _ => Err(EvalError::RecNotFunction),
        },
        Defn::Data(_, ctors) => elab_seq(chans, ctors.clone(), 0, env.clone(), k),
    }
}

/// Fold `elab` over a list of definitions, left to right.
fn elab_seq(
    chans: &mut Channels,
    defns: Rc<Vec<Defn>>,
    index: usize,
    env: Env,
    k: EnvCont,
) -> EvalResult {
    let defn = match defns.get(index) {
        None => return k(chans, env),
        Some(defn) => defn.clone(),
    };
    elab(
        chans,
        &defn,
        &env,
        Rc::new(move |chans, env2| elab_seq(chans, defns.clone(), index + 1, env2, k.clone())),
    )
}

// ============================================================================
// The interpreter: top-level driver
// ============================================================================

pub struct Interpreter {
    env: Env,
    channels: Channels,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            env: prelude::initial_env(),
            channels: Channels::new(),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Run one top-level phrase, returning the text to display. A fatal
    /// runtime error discards the phrase's channel effects, so the
    /// session state is as if the phrase had never been entered.
    pub fn obey(&mut self, phrase: &Phrase) -> Result<String, EvalError> {
        let saved = self.channels.clone();
        let result = self.obey_inner(phrase);
        if result.is_err() {
            self.channels = saved;
        }
        result
    }

    fn obey_inner(&mut self, phrase: &Phrase) -> Result<String, EvalError> {
        match phrase {
            Phrase::Calculate(expr) => {
                let value = self.eval_expr(expr)?;
                Ok(value.to_string())
            }
            Phrase::Define(defn) => {
                let slot: Rc<RefCell<Option<Env>>> = Rc::new(RefCell::new(None));
                let update = slot.clone();
                let defn2 = defn.clone();
                let env = self.env.clone();
                let value = run_toplevel(&mut self.channels, move |chans| {
                    elab(
                        chans,
                        &defn2,
                        &env,
                        Rc::new(move |_, extended| {
                            *update.borrow_mut() = Some(extended);
                            Ok(Step::Done(Value::Unit))
                        }),
                    )
                })?;
                let taken = slot.borrow_mut().take();
                match taken {
                    Some(extended) => {
                        self.env = extended;
                        Ok(format!("Added definition: {}", defn.name()))
                    }
                    // an exception escaped the right-hand side; there is
                    // no environment to install
                    None => Err(EvalError::RuntimeError(format!(
                        "definition discarded: {}",
                        value
                    ))),
                }
            }
        }
    }

    /// Evaluate an expression under the top-level prompts against the
    /// current session state.
    pub fn eval_expr(&mut self, expr: &Rc<Expr>) -> Result<Value, EvalError> {
        let expr = expr.clone();
        let env = self.env.clone();
        run_toplevel(&mut self.channels, move |chans| eval(chans, &expr, &env))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a computation under the top-level task and exception prompts.
/// The task prompt lets channel primitives work outside `(… | …)`; a
/// park at top level can never be woken, which is a deadlock.
fn run_toplevel(
    chans: &mut Channels,
    compute: impl FnOnce(&mut Channels) -> EvalResult,
) -> Result<Value, EvalError> {
    let step = compute(chans)?;
    let step = control::push_prompt(chans, Prompt::Task, step)?;
    let step = control::and_then(
        chans,
        step,
        Rc::new(|_, v| match v {
            Value::Halted(_) | Value::Waiting(_) => Err(EvalError::Deadlock),
            v => Ok(Step::Done(v)),
        }),
    )?;
    let step = control::push_prompt(chans, Prompt::Exc, step)?;
    let value = control::run(step)?;
    if value.is_internal() {
        return Err(EvalError::RuntimeError(
            "internal scheduler marker reached the top level".into(),
        ));
    }
    Ok(value)
}
