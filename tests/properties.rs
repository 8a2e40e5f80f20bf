//! Property-based tests for the evaluator
//!
//! Arithmetic laws, scheduler ordering, and exception round-trips,
//! checked against reference computations in Rust.

use proptest::prelude::*;
use schist::test_support::{display_source, eval_source};
use schist::Value;

/// Format an integer for Schist source (wrap negatives in parens so they
/// parse as a negation, not a binary minus).
fn format_int(n: i64) -> String {
    if n < 0 {
        format!("(-{})", -n)
    } else {
        n.to_string()
    }
}

fn expect_int(source: &str) -> Result<i64, TestCaseError> {
    match eval_source(source) {
        Ok(Value::Int(n)) => Ok(n),
        Ok(other) => Err(TestCaseError::fail(format!(
            "{} gave {:?}, expected an int",
            source, other
        ))),
        Err(e) => Err(TestCaseError::fail(format!("{} failed: {}", source, e))),
    }
}

fn small_int() -> impl Strategy<Value = i64> {
    -1000i64..1000
}

fn nonzero_int() -> impl Strategy<Value = i64> {
    (-100i64..100).prop_filter("nonzero divisor", |n| *n != 0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Multiplication binds tighter than addition.
    #[test]
    fn prop_precedence(a in small_int(), b in small_int(), c in small_int()) {
        let source = format!("{} + {} * {}", format_int(a), format_int(b), format_int(c));
        prop_assert_eq!(expect_int(&source)?, a + b * c);
    }

    /// Division and remainder satisfy q * b + r = a with the remainder
    /// taking the divisor's sign (rounding toward negative infinity).
    #[test]
    fn prop_div_mod_laws(a in small_int(), b in nonzero_int()) {
        let q = expect_int(&format!("{} / {}", format_int(a), format_int(b)))?;
        let r = expect_int(&format!("{} % {}", format_int(a), format_int(b)))?;
        prop_assert_eq!(q * b + r, a);
        prop_assert!(r == 0 || (r < 0) == (b < 0), "remainder sign: a={} b={} r={}", a, b, r);
        prop_assert!(r.abs() < b.abs());
    }

    /// Negation is an involution.
    #[test]
    fn prop_double_negation(n in small_int()) {
        let source = format!("-(-({}))", format_int(n));
        prop_assert_eq!(expect_int(&source)?, n);
    }

    /// Equality on ints agrees with the host's.
    #[test]
    fn prop_int_equality(a in small_int(), b in small_int()) {
        let source = format!("{} = {}", format_int(a), format_int(b));
        match eval_source(&source) {
            Ok(Value::Bool(eq)) => prop_assert_eq!(eq, a == b),
            other => return Err(TestCaseError::fail(format!("unexpected {:?}", other))),
        }
    }

    /// Pure parallel components come back as a tuple in submission order.
    #[test]
    fn prop_parallel_preserves_order(values in proptest::collection::vec(small_int(), 2..7)) {
        let components: Vec<String> = values.iter().map(|n| format_int(*n)).collect();
        let source = format!("({})", components.join(" | "));
        let expected = format!(
            "({})",
            values.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",")
        );
        let shown = display_source(&source)
            .map_err(|e| TestCaseError::fail(e))?;
        prop_assert_eq!(shown, expected);
    }

    /// A single rendezvous delivers the payload to the receiver and unit
    /// to the sender, whichever side arrives first.
    #[test]
    fn prop_rendezvous_round_trip(n in small_int(), sender_first in any::<bool>()) {
        let (source, expected) = if sender_first {
            (
                format!("let c = newchan in (send c {} | recv c)", format_int(n)),
                format!("(unit,{})", n),
            )
        } else {
            (
                format!("let c = newchan in (recv c | send c {})", format_int(n)),
                format!("({},unit)", n),
            )
        };
        let shown = display_source(&source).map_err(|e| TestCaseError::fail(e))?;
        prop_assert_eq!(shown, expected);
    }

    /// A throw caught by a matching handler yields the handler's value; a
    /// mismatched handler lets it reach the top level.
    #[test]
    fn prop_throw_catch_round_trip(thrown in 0usize..3, caught in 0usize..3, n in small_int()) {
        let tags = ["ExcClosed", "ExcInvalid", "ExcMatch"];
        let source = format!(
            "try throw {} catch {} -> {}",
            tags[thrown], tags[caught], format_int(n)
        );
        let shown = display_source(&source).map_err(|e| TestCaseError::fail(e))?;
        if thrown == caught {
            prop_assert_eq!(shown, n.to_string());
        } else {
            prop_assert_eq!(shown, format!("<unhandled exception -> {}>", tags[thrown]));
        }
    }

    /// Recursive summation agrees with the closed form.
    #[test]
    fn prop_recursive_sum(n in 0i64..60) {
        let source = format!(
            "let rec sum = fun n -> if n = 0 then 0 else n + sum (n - 1) in sum {}",
            n
        );
        prop_assert_eq!(expect_int(&source)?, n * (n + 1) / 2);
    }
}
