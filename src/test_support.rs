//! Test support: drive the full pipeline from source strings
//!
//! Integration tests feed programs through lexer, parser, and
//! interpreter and assert on resulting values, display strings, or
//! errors. Helpers return `String` errors so tests can assert on any
//! stage's failure uniformly.

use std::rc::Rc;

use crate::ast::{Expr, Phrase};
use crate::eval::{EvalError, Interpreter, Value};
use crate::lexer::Lexer;
use crate::parser::Parser;

/// Parse a single phrase.
pub fn parse_phrase(input: &str) -> Result<Phrase, String> {
    let tokens = Lexer::new(input)
        .tokenize()
        .map_err(|e| format!("lex error: {}", e))?;
    Parser::new(tokens)
        .parse_phrase()
        .map_err(|e| format!("parse error: {}", e))
}

/// Parse a single expression phrase.
pub fn parse_expr(input: &str) -> Result<Rc<Expr>, String> {
    match parse_phrase(input)? {
        Phrase::Calculate(expr) => Ok(expr),
        Phrase::Define(_) => Err(format!("expected an expression: {}", input)),
    }
}

/// Evaluate an expression in a fresh session, returning the raw value.
pub fn eval_source(input: &str) -> Result<Value, String> {
    let expr = parse_expr(input)?;
    Interpreter::new()
        .eval_expr(&expr)
        .map_err(|e| format!("runtime error: {}", e))
}

/// Evaluate an expression in a fresh session, returning the raw error.
pub fn eval_source_err(input: &str) -> Result<EvalError, String> {
    let expr = parse_expr(input)?;
    match Interpreter::new().eval_expr(&expr) {
        Err(e) => Ok(e),
        Ok(v) => Err(format!("expected an error, got {:?}", v)),
    }
}

/// Run one phrase in a fresh session and return its display string.
pub fn display_source(input: &str) -> Result<String, String> {
    let phrase = parse_phrase(input)?;
    Interpreter::new()
        .obey(&phrase)
        .map_err(|e| format!("runtime error: {}", e))
}

/// Run a sequence of phrases in one session, returning each display
/// string; phrases after a failed one still run against the surviving
/// state.
pub fn session(inputs: &[&str]) -> Vec<Result<String, String>> {
    let mut interp = Interpreter::new();
    inputs
        .iter()
        .map(|input| {
            let phrase = parse_phrase(input)?;
            interp
                .obey(&phrase)
                .map_err(|e| format!("runtime error: {}", e))
        })
        .collect()
}

/// Assert helper: the displayed result of `input` is exactly `expected`.
pub fn assert_displays(input: &str, expected: &str) {
    match display_source(input) {
        Ok(shown) => assert_eq!(shown, expected, "for input: {}", input),
        Err(e) => panic!("{} failed: {}", input, e),
    }
}
