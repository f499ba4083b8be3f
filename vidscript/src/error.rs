//! Error types for script parsing, compilation and evaluation.
//!
//! All fallible operations in this crate return [`Result`]. The error enum is
//! deliberately coarse: each variant maps to one user-visible failure class,
//! and the message carries the detail (offending operation name, argument,
//! position in the source text).

use thiserror::Error;

/// Result type alias using [`ScriptError`] as the error type.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors raised by the scripting engine.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script source was rejected: syntax error, unknown operation,
    /// type mismatch or ambiguous overload.
    #[error("parse error: {0}")]
    Parse(String),

    /// The parsed graph could not be turned into an execution plan.
    #[error("compile error: {0}")]
    Compile(String),

    /// An operation argument is outside its declared range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An image buffer violated a structural invariant.
    #[error("image error: {0}")]
    Image(String),

    /// An operation failed while evaluating against an image.
    #[error("evaluation error in '{operation}': {message}")]
    Evaluate { operation: String, message: String },
}

impl ScriptError {
    /// Create an evaluation error for the named operation.
    pub fn evaluate(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluate {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
