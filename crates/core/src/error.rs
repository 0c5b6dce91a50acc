use crate::ast::{ContextId, Provenance};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic category. Everything except `Lex`, `Parse`, `Io` and
/// `Internal` is one of the static errors of the lowering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Io,
    Lex,
    Parse,
    OutOfContextFlatten,
    LocalIdentifierFlatten,
    UndeclaredExplicitDependency,
    ContextNestingTooDeep,
    MalformedChainShorthand,
    /// A pass received a tree an earlier pass should have rejected or rewritten.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Io => "Io",
            ErrorKind::Lex => "Lex",
            ErrorKind::Parse => "Parse",
            ErrorKind::OutOfContextFlatten => "OutOfContextFlatten",
            ErrorKind::LocalIdentifierFlatten => "LocalIdentifierFlatten",
            ErrorKind::UndeclaredExplicitDependency => "UndeclaredExplicitDependency",
            ErrorKind::ContextNestingTooDeep => "ContextNestingTooDeep",
            ErrorKind::MalformedChainShorthand => "MalformedChainShorthand",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lowering error. Every error is static and carries the source
/// location it was detected at; `pass` is 0 for the reader, then 1-4
/// for desugar, scan, resolve and lower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{file}:{line}:{column}: {kind}: {message}")]
pub struct LowerError {
    pub pass: u8,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl LowerError {
    pub fn new(pass: u8, kind: ErrorKind, prov: &Provenance, message: impl Into<String>) -> Self {
        LowerError {
            pass,
            kind,
            context: None,
            file: prov.file.clone(),
            line: prov.line,
            column: prov.column,
            message: message.into(),
        }
    }

    pub fn in_context(mut self, id: ContextId) -> Self {
        self.context = Some(id);
        self
    }

    pub fn io(file: &str, message: impl Into<String>) -> Self {
        LowerError::new(0, ErrorKind::Io, &Provenance::new(file, 0, 0), message)
    }

    pub fn lex(file: &str, line: u32, column: u32, message: impl Into<String>) -> Self {
        LowerError::new(0, ErrorKind::Lex, &Provenance::new(file, line, column), message)
    }

    pub fn parse(file: &str, line: u32, column: u32, message: impl Into<String>) -> Self {
        LowerError::new(0, ErrorKind::Parse, &Provenance::new(file, line, column), message)
    }

    pub fn internal(pass: u8, prov: &Provenance, message: impl Into<String>) -> Self {
        LowerError::new(pass, ErrorKind::Internal, prov, message)
    }

    /// Serialize to the expected-error.json fixture format.
    /// Always includes every field (null for a missing context id).
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "column":  self.column,
            "context": self.context.map(|c| c.0),
            "file":    self.file,
            "kind":    self.kind.as_str(),
            "line":    self.line,
            "message": self.message,
            "pass":    self.pass,
        })
    }
}
