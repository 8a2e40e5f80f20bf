//! Runtime: channel table and the cooperative scheduler
//!
//! Channels are synchronous rendezvous points. Each channel is a small
//! state machine holding at most one parked party, plus a transient
//! `Ready` slot for a continuation the scheduler has yet to collect.
//! The scheduler multiplexes tasks round-robin; only channel operations
//! yield, pure computation runs uninterrupted.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::control::{self, Cont, EvalResult, Prompt, Step, Task};
use crate::eval::{EvalError, Value};
use crate::prelude;

/// Dense channel index, allocated monotonically from 0 and never reused.
pub type ChannelId = u32;

#[derive(Clone)]
pub enum ChannelState {
    Empty,
    /// A sender is parked with its payload and resume continuation
    WaitingSend(Value, Cont),
    /// A receiver is parked with its resume continuation
    WaitingRecv(Cont),
    /// One side of a rendezvous is runnable; the successor is whatever
    /// remains parked behind it (never another `Ready`)
    Ready(Task, Box<ChannelState>),
    Closed,
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Empty => write!(f, "Empty"),
            ChannelState::WaitingSend(v, _) => write!(f, "WaitingSend({:?})", v),
            ChannelState::WaitingRecv(_) => write!(f, "WaitingRecv"),
            ChannelState::Ready(_, s) => write!(f, "Ready(.., {:?})", s),
            ChannelState::Closed => write!(f, "Closed"),
        }
    }
}

/// The channel table: id allocation plus per-channel state.
#[derive(Clone, Default)]
pub struct Channels {
    states: HashMap<ChannelId, ChannelState>,
    next: ChannelId,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id. No state is installed until `update`.
    pub fn fresh(&mut self) -> ChannelId {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn contents(&self, id: ChannelId) -> Result<ChannelState, EvalError> {
        self.states
            .get(&id)
            .cloned()
            .ok_or_else(|| EvalError::RuntimeError(format!("unknown channel {}", id)))
    }

    pub fn update(&mut self, id: ChannelId, state: ChannelState) {
        self.states.insert(id, state);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Run `tasks` round-robin until all complete. The result is a tuple of
/// the task values in their original order.
///
/// A task step yields one of:
/// - `Halted(l)`: it just parked on channel `l`; a `Waiting(l)` marker
///   takes its queue slot as a claim ticket.
/// - `Waiting(l)`: a marker re-checking its channel; if the channel has a
///   `Ready` continuation, that continuation runs immediately and the
///   channel drops to its successor state, otherwise the marker re-parks.
/// - any other value: the task finished.
///
/// When a full pass over the parked queue wakes nothing, no rendezvous
/// can ever complete: the scheduler raises `ExcInvalid` through the
/// exception prompt.
pub fn schedule(chans: &mut Channels, tasks: Vec<Task>) -> EvalResult {
    let mut running: VecDeque<Task> = tasks.into();
    let mut ready: VecDeque<Task> = VecDeque::new();
    let mut waiting = 0usize;
    let mut progressed = true;

    loop {
        let Some(task) = running.pop_front() else {
            if waiting == 0 {
                let mut results = Vec::with_capacity(ready.len());
                for task in ready {
                    match task(chans)? {
                        Step::Done(value) => results.push(value),
                        Step::Suspend(s) => return Ok(Step::Suspend(s)),
                    }
                }
                return Ok(Step::Done(Value::Tuple(results)));
            }
            if !progressed {
                return Ok(control::raise(
                    Prompt::Exc,
                    Value::Exception(Box::new(prelude::exc_invalid())),
                ));
            }
            std::mem::swap(&mut running, &mut ready);
            progressed = false;
            continue;
        };

        match task(chans)? {
            Step::Done(Value::Halted(id)) => {
                ready.push_back(parked(id));
                waiting += 1;
            }
            Step::Done(Value::Waiting(id)) => match chans.contents(id)? {
                ChannelState::Ready(next, successor) => {
                    chans.update(id, *successor);
                    running.push_front(next);
                    waiting -= 1;
                    progressed = true;
                }
                _ => ready.push_back(parked(id)),
            },
            Step::Done(value) => ready.push_back(finished(value)),
            // an uncaught exception in any task abandons the whole group
            Step::Suspend(s) => return Ok(Step::Suspend(s)),
        }
    }
}

fn parked(id: ChannelId) -> Task {
    Rc::new(move |_| Ok(Step::Done(Value::Waiting(id))))
}

fn finished(value: Value) -> Task {
    Rc::new(move |_| Ok(Step::Done(value.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_is_monotonic() {
        let mut chans = Channels::new();
        assert_eq!(chans.fresh(), 0);
        assert_eq!(chans.fresh(), 1);
        assert_eq!(chans.fresh(), 2);
    }

    #[test]
    fn test_fresh_installs_no_state() {
        let mut chans = Channels::new();
        let id = chans.fresh();
        assert!(chans.contents(id).is_err());
        chans.update(id, ChannelState::Empty);
        assert!(matches!(chans.contents(id), Ok(ChannelState::Empty)));
    }

    #[test]
    fn test_schedule_preserves_order() {
        let mut chans = Channels::new();
        let tasks: Vec<Task> = (0..5)
            .map(|n| Rc::new(move |_: &mut Channels| Ok(Step::Done(Value::Int(n)))) as Task)
            .collect();
        let step = schedule(&mut chans, tasks).unwrap();
        match control::run(step).unwrap() {
            Value::Tuple(items) => {
                let ints: Vec<i64> = items
                    .iter()
                    .map(|v| match v {
                        Value::Int(n) => *n,
                        other => panic!("unexpected {:?}", other),
                    })
                    .collect();
                assert_eq!(ints, vec![0, 1, 2, 3, 4]);
            }
            other => panic!("expected tuple, got {:?}", other),
        }
    }

    #[test]
    fn test_schedule_detects_deadlock() {
        let mut chans = Channels::new();
        let id = chans.fresh();
        chans.update(id, ChannelState::Empty);
        // a task that parks on a channel nobody else will ever touch
        let tasks: Vec<Task> =
            vec![Rc::new(move |_: &mut Channels| Ok(Step::Done(Value::Halted(id)))) as Task];
        let step = schedule(&mut chans, tasks).unwrap();
        // the deadlock surfaces as ExcInvalid at the exception prompt
        let step = control::push_prompt(&mut chans, Prompt::Exc, step).unwrap();
        match control::run(step).unwrap() {
            Value::Exception(inner) => match *inner {
                Value::Constructor { ref name, .. } => assert_eq!(name, "ExcInvalid"),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("expected exception, got {:?}", other),
        }
    }
}
