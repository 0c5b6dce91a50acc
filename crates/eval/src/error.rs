use crate::value::Value;
use obsctx_core::LowerError;

/// Errors that can occur while evaluating a lowered program.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// The source failed to lower.
    #[error("lowering failed: {0}")]
    Lower(#[from] LowerError),
    /// Variable not bound in any enclosing scope.
    #[error("unbound variable: {name}")]
    UnboundVariable { name: String },
    /// Operand or receiver of the wrong type.
    #[error("type error: {message}")]
    TypeError { message: String },
    #[error("division by zero")]
    DivisionByZero,
    /// Integer or decimal arithmetic overflowed.
    #[error("overflow: {message}")]
    Overflow { message: String },
    #[error("{what} is not callable")]
    NotCallable { what: String },
    /// A surface-only node reached the evaluator.
    #[error("{construct} must be lowered before evaluation")]
    NotLowered { construct: &'static str },
    /// A value raised by host code.
    #[error("uncaught error: {value}")]
    Thrown { value: Value },
}

impl EvalError {
    /// The value a stream error carries for this failure.
    pub fn into_value(self) -> Value {
        match self {
            EvalError::Thrown { value } => value,
            other => Value::Str(other.to_string()),
        }
    }
}
