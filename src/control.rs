//! Two-prompt delimited control
//!
//! Evaluation steps either finish with a value or suspend: a suspension
//! bubbles outward carrying the slice of computation between the capture
//! point and the nearest enclosing prompt. `and_then` grows that slice as
//! the bubble passes each sequencing point; `push_prompt` stops a bubble
//! whose prompt matches and hands the captured continuation to its body.
//!
//! Captured continuations are multi-shot: the scheduler re-enters parked
//! continuations and a handler may be re-entered after a rethrow, so
//! everything here is `Rc<dyn Fn>`, never `FnOnce`.

use std::rc::Rc;

use crate::eval::{EvalError, Value};
use crate::runtime::Channels;

/// The two delimiters: `Task` marks a schedulable task boundary, `Exc`
/// an exception handler boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Task,
    Exc,
}

pub type EvalResult = Result<Step, EvalError>;

/// A continuation awaiting a value.
pub type Cont = Rc<dyn Fn(&mut Channels, Value) -> EvalResult>;

/// A suspended computation ready to run.
pub type Task = Rc<dyn Fn(&mut Channels) -> EvalResult>;

pub enum Step {
    Done(Value),
    Suspend(Suspension),
}

/// A capture in flight toward its prompt.
pub struct Suspension {
    prompt: Prompt,
    /// Everything between the capture point and the prompt, composed as
    /// the bubble travels outward.
    kont: Cont,
    /// The captured body, run at the prompt with the assembled
    /// continuation.
    body: Rc<dyn Fn(&mut Channels, Cont) -> EvalResult>,
}

/// Abort to the nearest enclosing `prompt`, handing `body` the captured
/// continuation. Applying that continuation re-enters the suspended
/// computation under a fresh copy of the prompt.
pub fn capture(
    prompt: Prompt,
    body: impl Fn(&mut Channels, Cont) -> EvalResult + 'static,
) -> Step {
    Step::Suspend(Suspension {
        prompt,
        kont: Rc::new(|_, value| Ok(Step::Done(value))),
        body: Rc::new(body),
    })
}

/// Abort to the nearest enclosing `prompt` with a value, discarding the
/// continuation.
pub fn raise(prompt: Prompt, value: Value) -> Step {
    capture(prompt, move |_, _| Ok(Step::Done(value.clone())))
}

/// Sequence `k` after `step`. A finished step feeds `k` directly; a
/// suspension absorbs `k` into its continuation and keeps bubbling.
pub fn and_then(chans: &mut Channels, step: Step, k: Cont) -> EvalResult {
    match step {
        Step::Done(value) => k(chans, value),
        Step::Suspend(s) => {
            let inner = s.kont;
            Ok(Step::Suspend(Suspension {
                prompt: s.prompt,
                kont: Rc::new(move |chans, value| {
                    let step = inner(chans, value)?;
                    and_then(chans, step, k.clone())
                }),
                body: s.body,
            }))
        }
    }
}

/// Delimit `step` with `prompt`. A matching suspension's body runs here,
/// under the prompt, with a continuation that reinstalls the prompt when
/// applied; a non-matching suspension keeps bubbling, remembering to
/// reinstall this prompt on resumption.
pub fn push_prompt(chans: &mut Channels, prompt: Prompt, step: Step) -> EvalResult {
    match step {
        Step::Done(value) => Ok(Step::Done(value)),
        Step::Suspend(s) => {
            let kont = s.kont;
            if s.prompt == prompt {
                let resume: Cont = Rc::new(move |chans, value| {
                    let step = kont(chans, value)?;
                    push_prompt(chans, prompt, step)
                });
                let step = (s.body)(chans, resume)?;
                push_prompt(chans, prompt, step)
            } else {
                Ok(Step::Suspend(Suspension {
                    prompt: s.prompt,
                    kont: Rc::new(move |chans, value| {
                        let step = kont(chans, value)?;
                        push_prompt(chans, prompt, step)
                    }),
                    body: s.body,
                }))
            }
        }
    }
}

/// Finish a computation that should have no prompts left to cross. A
/// suspension here means a capture escaped every delimiter, which is an
/// interpreter bug, not a program error.
pub fn run(step: Step) -> Result<Value, EvalError> {
    match step {
        Step::Done(value) => Ok(value),
        Step::Suspend(_) => Err(EvalError::EscapedControl),
    }
}
