//! Rendezvous channel semantics
//!
//! These tests pin the channel state machine: rendezvous pairing, close
//! semantics, exception delivery to parked tasks, and deadlock
//! detection.

use schist::test_support::{assert_displays, display_source, eval_source_err, session};
use schist::EvalError;

// ============================================================================
// Rendezvous
// ============================================================================

#[test]
fn rendezvous_sender_first() {
    assert_displays("let c = newchan in (send c 42 | recv c)", "(unit,42)");
}

#[test]
fn rendezvous_receiver_first() {
    assert_displays("let c = newchan in (recv c | send c 42)", "(42,unit)");
}

#[test]
fn rendezvous_delivers_constructed_values() {
    assert_displays(
        "let c = newchan in (send c (Cons 1 Nil) | recv c)",
        "(unit,Cons 1 Nil)",
    );
}

#[test]
fn channel_is_reusable_after_rendezvous() {
    assert_displays(
        "let c = newchan in ((send c 1 | recv c) ; (send c 2 | recv c))",
        "(unit,2)",
    );
}

#[test]
fn fresh_channels_get_distinct_handles() {
    assert_displays("let a = newchan in let b = newchan in b", "<handle 1>");
}

// ============================================================================
// Close
// ============================================================================

#[test]
fn send_after_close_raises() {
    assert_displays(
        "let c = newchan in (close c ; send c 1)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn recv_after_close_raises() {
    assert_displays(
        "let c = newchan in (close c ; recv c)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn send_after_close_aborts_enclosing_expression() {
    // the raise unwinds past the addition
    assert_displays(
        "let c = newchan in (close c ; 1 + send c 9)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn close_exception_is_catchable() {
    assert_displays(
        "let c = newchan in try (close c ; send c 1) catch ExcClosed -> 7",
        "7",
    );
}

#[test]
fn close_wakes_parked_receiver() {
    assert_displays(
        "let c = newchan in (recv c | close c)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn close_wakes_parked_sender() {
    assert_displays(
        "let c = newchan in (send c 1 | close c)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn woken_receiver_can_catch_the_close() {
    // the handler arm is parenthesized so its bar-less tail does not
    // swallow the next parallel component
    assert_displays(
        "let c = newchan in ((try recv c catch ExcClosed -> 99) | close c)",
        "(99,unit)",
    );
}

#[test]
fn close_drains_pending_rendezvous_first() {
    // the receiver completed its half locally; close seals the channel
    // behind the sender's pending continuation
    assert_displays(
        "let c = newchan in (send c 1 | (recv c ; close c))",
        "(unit,unit)",
    );
}

#[test]
fn close_drops_a_party_parked_behind_the_ready_slot() {
    // s2 is parked in the Ready successor when close seals the channel:
    // sealing keeps only the ready continuation, so s2 never receives
    // ExcClosed and surfaces through deadlock detection instead
    assert_displays(
        "let c = newchan in (send c 1 | recv c | send c 2 | close c)",
        "<unhandled exception -> ExcInvalid>",
    );
}

#[test]
fn double_close_is_fatal() {
    let err = eval_source_err("let c = newchan in (close c ; close c)").unwrap();
    assert!(matches!(err, EvalError::DoubleClose(0)));
}

// ============================================================================
// The primitive forms return the exception instead of raising
// ============================================================================

#[test]
fn sendp_returns_the_exception_value() {
    assert_displays(
        "let c = newchan in (close c ; sendp c 9)",
        "<unhandled exception -> ExcClosed>",
    );
}

#[test]
fn sendp_exception_is_a_value_not_a_raise() {
    // the exception flows into the equality primitive instead of
    // unwinding, which is a type error
    let err = eval_source_err("let c = newchan in (close c ; sendp c 9 = 1)").unwrap();
    assert!(matches!(err, EvalError::TypeError(_)));
}

#[test]
fn recvp_result_is_matchable_as_exception() {
    // try observes the returned exception value just like a raised one
    assert_displays(
        "let c = newchan in try (close c ; recvp c) catch ExcClosed -> 3",
        "3",
    );
}

// ============================================================================
// Deadlock detection
// ============================================================================

#[test]
fn lone_receiver_deadlocks_with_exc_invalid() {
    assert_displays(
        "let c = newchan in (recv c | 5)",
        "<unhandled exception -> ExcInvalid>",
    );
}

#[test]
fn deadlock_is_catchable() {
    assert_displays(
        "let c = newchan in try (recv c | 5) catch ExcInvalid -> 99",
        "99",
    );
}

#[test]
fn unmatched_second_sender_deadlocks() {
    // two sends, one receiver: the second send can never rendezvous
    assert_displays(
        "let c = newchan in (send c 1 | recv c | send c 2)",
        "<unhandled exception -> ExcInvalid>",
    );
}

#[test]
fn top_level_park_is_a_fatal_deadlock() {
    let err = eval_source_err("let c = newchan in recv c").unwrap();
    assert!(matches!(err, EvalError::Deadlock));
}

// ============================================================================
// Capacity limits of the channel state machine
// ============================================================================

#[test]
fn second_parked_sender_is_a_fatal_error() {
    // one parked sender per channel: a second send that arrives while the
    // first is still parked cannot be represented
    let err = eval_source_err("let c = newchan in (send c 1 | send c 2 | (recv c ; recv c))")
        .unwrap();
    assert!(matches!(err, EvalError::ChannelBusy(0)));
}

#[test]
fn second_parked_receiver_is_a_fatal_error() {
    let err = eval_source_err("let c = newchan in (recv c | recv c | (send c 1 ; send c 2))")
        .unwrap();
    assert!(matches!(err, EvalError::ChannelBusy(0)));
}

// ============================================================================
// Session state
// ============================================================================

#[test]
fn channel_state_persists_across_phrases() {
    let results = session(&["val c = newchan", "close c", "send c 1"]);
    assert_eq!(results[0].as_deref(), Ok("Added definition: c"));
    assert_eq!(results[1].as_deref(), Ok("unit"));
    assert_eq!(
        results[2].as_deref(),
        Ok("<unhandled exception -> ExcClosed>")
    );
}

#[test]
fn failed_phrase_rolls_back_channel_effects() {
    let results = session(&["val c = newchan", "(newchan ; 1 2)", "newchan"]);
    assert_eq!(results[0].as_deref(), Ok("Added definition: c"));
    assert!(results[1].is_err());
    // the failed phrase's allocation was discarded
    assert_eq!(results[2].as_deref(), Ok("<handle 1>"));
}

#[test]
fn double_close_rolls_back_to_closed() {
    let results = session(&["val c = newchan", "close c", "close c", "send c 1"]);
    assert_eq!(results[1].as_deref(), Ok("unit"));
    assert!(results[2].is_err());
    // the channel is still closed, not reopened or corrupted
    assert_eq!(
        results[3].as_deref(),
        Ok("<unhandled exception -> ExcClosed>")
    );
}

#[test]
fn handles_display_by_index() {
    assert_eq!(display_source("newchan").unwrap(), "<handle 0>");
}
