//! # Pipeline Error Handling
//!
//! Error types for the video transformation pipeline. Each variant maps to
//! one user-visible failure class; constructor helpers keep call sites short
//! and `category()` gives a stable string for logging and classification.
//!
//! Propagation model: errors inside an operation's tile kernel surface
//! through the plan executor as a `ScriptError`, cross the stage boundary as
//! a per-context `failed(context_id, message)` callback, and reach the CLI
//! as a single diagnostic. No retries; a failed context is terminal, and
//! concurrent contexts are unaffected.

use std::{error::Error as StdError, fmt, io};

use vidscript::ScriptError;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Base error type for the pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing or invalid CLI option or script file.
    Config { message: String },
    /// Script source rejected (unknown op, type mismatch, ambiguous overload).
    Parse { message: String },
    /// Execution plan construction failed (cycle, unreferenced result).
    Compile { message: String },
    /// Container open/read/write failure.
    Io {
        operation: String,
        path: Option<String>,
        source: io::Error,
    },
    /// Decoder failure.
    Decode { message: String },
    /// Encoder failure.
    Encode { message: String },
    /// Operation argument out of its declared range.
    InvalidParameter { message: String },
    /// Overall wall-clock deadline exceeded.
    Timeout { seconds: u64 },
    /// Staging-buffer invariant violated; treated as a bug but still surfaced.
    BufferOverflow { stage: &'static str },
    /// A frame or inter-frame evaluation failed at runtime.
    Processing { stage: &'static str, message: String },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
        }
    }

    pub fn io_path(
        operation: impl Into<String>,
        path: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn buffer_overflow(stage: &'static str) -> Self {
        Self::BufferOverflow { stage }
    }

    pub fn processing(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Processing {
            stage,
            message: message.into(),
        }
    }

    /// Stable category string for logs and diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Parse { .. } => "parse",
            Self::Compile { .. } => "compile",
            Self::Io { .. } => "io",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } => "encode",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::Timeout { .. } => "timeout",
            Self::BufferOverflow { .. } => "buffer_overflow",
            Self::Processing { .. } => "processing",
        }
    }

    /// Whether the failure indicates a bug rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::BufferOverflow { .. })
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message } => write!(f, "configuration error: {message}"),
            Self::Parse { message } => write!(f, "script parse error: {message}"),
            Self::Compile { message } => write!(f, "script compile error: {message}"),
            Self::Io {
                operation,
                path,
                source,
            } => match path {
                Some(path) => write!(f, "I/O error during {operation} on '{path}': {source}"),
                None => write!(f, "I/O error during {operation}: {source}"),
            },
            Self::Decode { message } => write!(f, "decoder error: {message}"),
            Self::Encode { message } => write!(f, "encoder error: {message}"),
            Self::InvalidParameter { message } => write!(f, "invalid parameter: {message}"),
            Self::Timeout { seconds } => {
                write!(f, "processing aborted after {seconds}s timeout")
            }
            Self::BufferOverflow { stage } => {
                write!(f, "staging buffer overflow in stage '{stage}'")
            }
            Self::Processing { stage, message } => {
                write!(f, "processing failed in stage '{stage}': {message}")
            }
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(error: io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<ScriptError> for PipelineError {
    fn from(error: ScriptError) -> Self {
        match error {
            ScriptError::Parse(message) => Self::Parse { message },
            ScriptError::Compile(message) => Self::Compile { message },
            ScriptError::InvalidParameter(message) => Self::InvalidParameter { message },
            other => Self::Processing {
                stage: "script",
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(PipelineError::config("x").category(), "config");
        assert_eq!(PipelineError::timeout(10).category(), "timeout");
        assert_eq!(
            PipelineError::buffer_overflow("source").category(),
            "buffer_overflow"
        );
    }

    #[test]
    fn script_errors_map_to_pipeline_kinds() {
        let parse: PipelineError = ScriptError::Parse("bad".into()).into();
        assert_eq!(parse.category(), "parse");
        let invalid: PipelineError = ScriptError::InvalidParameter("bad".into()).into();
        assert_eq!(invalid.category(), "invalid_parameter");
    }

    #[test]
    fn overflow_is_internal() {
        assert!(PipelineError::buffer_overflow("sink").is_internal());
        assert!(!PipelineError::config("x").is_internal());
    }
}
