//! The initial environment
//!
//! Every session starts from the same six bindings: the boolean and unit
//! constants plus the three built-in exception constructors. User code
//! extends the set with `data`.

use crate::env::Env;
use crate::eval::Value;

pub fn exc_closed() -> Value {
    nullary("ExcClosed")
}

pub fn exc_invalid() -> Value {
    nullary("ExcInvalid")
}

pub fn exc_match() -> Value {
    nullary("ExcMatch")
}

fn nullary(name: &str) -> Value {
    Value::Constructor {
        name: name.to_string(),
        fields: Vec::new(),
    }
}

pub fn initial_env() -> Env {
    Env::make([
        ("true".to_string(), Value::Bool(true)),
        ("false".to_string(), Value::Bool(false)),
        ("unit".to_string(), Value::Unit),
        ("ExcClosed".to_string(), exc_closed()),
        ("ExcInvalid".to_string(), exc_invalid()),
        ("ExcMatch".to_string(), exc_match()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_bindings() {
        let env = initial_env();
        assert!(matches!(env.get("true"), Some(Value::Bool(true))));
        assert!(matches!(env.get("false"), Some(Value::Bool(false))));
        assert!(matches!(env.get("unit"), Some(Value::Unit)));
        for exc in ["ExcClosed", "ExcInvalid", "ExcMatch"] {
            match env.get(exc) {
                Some(Value::Constructor { name, fields }) => {
                    assert_eq!(name, exc);
                    assert!(fields.is_empty());
                }
                other => panic!("expected constructor for {}, got {:?}", exc, other),
            }
        }
    }
}
