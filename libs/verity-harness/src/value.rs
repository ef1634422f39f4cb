//! Canonical comparison domain.
//!
//! Every value that crosses the sandbox boundary or takes part in a
//! comparison is one of these. Linked lists, trees and graphs never appear
//! here directly; the codec reduces them to nested lists first.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numbers only; booleans are deliberately not numeric here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Coarse kind used to decide whether two values may be ordered.
    fn kind(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
        }
    }

    /// Total order over values of the same kind, `None` across kinds or
    /// when `null` is involved.
    pub fn try_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (a, b) if a.kind() == 2 && b.kind() == 2 => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.try_cmp(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_)) => self.as_f64() == other.as_f64(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Renders in test-case literal style so a displayed value can be pasted
/// back into a test case.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 => {
                write!(f, "{:.1}", x)
            }
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => {
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Shorthand for building nested values in tests.
#[cfg(test)]
macro_rules! list {
    ($($x:expr),* $(,)?) => {
        $crate::value::Value::List(vec![$($crate::value::Value::from($x)),*])
    };
}

#[cfg(test)]
pub(crate) use list;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn test_display_literal_style() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Null,
            Value::Str("a\"b".into()),
            Value::Float(2.0),
            Value::Bool(false),
        ]);
        assert_eq!(v.to_string(), r#"[1,null,"a\"b",2.0,false]"#);
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_try_cmp_rejects_mixed_kinds() {
        assert_eq!(Value::Int(1).try_cmp(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).try_cmp(&Value::Str("1".into())), None);
        assert_eq!(Value::Null.try_cmp(&Value::Null), None);
        assert_eq!(
            list![1, 2].try_cmp(&list![1, 2, 0]),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_json_round_trip_keeps_number_kinds() {
        let v: Value = serde_json::from_str("[1, 2.5, null, true, \"x\", [[]]]").unwrap();
        let items = v.as_list().unwrap();
        assert!(matches!(items[0], Value::Int(1)));
        assert!(matches!(items[1], Value::Float(_)));
        assert!(items[2].is_null());
        assert_eq!(serde_json::to_string(&v).unwrap(), "[1,2.5,null,true,\"x\",[[]]]");
    }
}
