//! Runtime values of the lowered host subset.

use crate::error::EvalError;
use crate::interp::Closure;
use crate::stream::{Stream, Subscription};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use std::rc::Rc;

pub type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, EvalError>;

/// A host function callable from evaluated code.
#[derive(Clone)]
pub struct Native {
    pub name: String,
    pub func: Rc<NativeFn>,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Decimal literals and non-integral quotients -- never `f64`
    Decimal(Decimal),
    Str(String),
    Array(Vec<Value>),
    Stream(Stream),
    Function(Rc<Closure>),
    Native(Native),
    Subscription(Subscription),
}

impl Value {
    pub fn native(name: &str, func: impl Fn(Vec<Value>) -> Result<Value, EvalError> + 'static) -> Value {
        Value::Native(Native {
            name: name.to_owned(),
            func: Rc::new(func),
        })
    }

    pub fn str(s: &str) -> Value {
        Value::Str(s.to_owned())
    }

    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Decimal(_) => "Decimal",
            Value::Str(_) => "Str",
            Value::Array(_) => "Array",
            Value::Stream(_) => "Stream",
            Value::Function(_) | Value::Native(_) => "Function",
            Value::Subscription(_) => "Subscription",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Converts host JSON input. Numbers without a fraction become `Int`;
    /// objects are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, EvalError> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => {
                    let text = n.to_string();
                    Value::Decimal(Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).map_err(
                        |e| EvalError::TypeError {
                            message: format!("number {} is not representable: {}", text, e),
                        },
                    )?)
                }
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect::<Result<_, _>>()?)
            }
            serde_json::Value::Object(_) => {
                return Err(EvalError::TypeError {
                    message: "objects are not runtime values".to_owned(),
                })
            }
        })
    }

    /// JSON view of a plain value; streams, functions and subscriptions
    /// have none.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::json!(n),
            Value::Decimal(d) => serde_json::Value::String(d.normalize().to_string()),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect::<Option<_>>()?)
            }
            Value::Stream(_) | Value::Function(_) | Value::Native(_) | Value::Subscription(_) => return None,
        })
    }

    /// Streams pass through; any other value becomes a single-value
    /// stream that emits it synchronously and completes.
    pub fn into_stream(self) -> Stream {
        match self {
            Value::Stream(s) => s,
            other => Stream::of(vec![other]),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Int(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Int(a)) => Decimal::from(*a) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a.same(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Subscription(a), Value::Subscription(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Value::Stream(_) => f.write_str("<stream>"),
            Value::Function(_) => f.write_str("<function>"),
            Value::Native(n) => write!(f, "<native {}>", n.name),
            Value::Subscription(s) => {
                if s.is_closed() {
                    f.write_str("<subscription closed>")
                } else {
                    f.write_str("<subscription>")
                }
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Stream> for Value {
    fn from(s: Stream) -> Self {
        Value::Stream(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_and_decimals_compare_numerically() {
        assert_eq!(Value::Int(2), Value::Decimal(Decimal::new(20, 1)));
        assert_ne!(Value::Int(2), Value::str("2"));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn json_conversion() {
        let v = Value::from_json(&serde_json::json!([1, 2.5, "x", null])).unwrap();
        assert_eq!(v.to_string(), "[1, 2.5, x, null]");
        assert_eq!(v.to_json(), Some(serde_json::json!([1, "2.5", "x", null])));
        assert!(Value::from_json(&serde_json::json!({"a": 1})).is_err());
        assert_eq!(Value::from(Stream::of(vec![])).to_json(), None);
    }

    #[test]
    fn display_normalizes_decimals() {
        assert_eq!(Value::Decimal(Decimal::new(350, 2)).to_string(), "3.5");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::str("x")]).to_string(),
            "[1, x]"
        );
    }
}
