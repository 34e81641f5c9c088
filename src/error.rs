//! Error types for shell-exec.

use std::time::Duration;

use thiserror::Error;

use crate::execution::ExecutionModel;

/// Main error type for shell-exec operations.
#[derive(Error, Debug)]
pub enum ShellError {
    /// The command did not finish within its configured timeout.
    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
    },

    /// The command wrote to its error stream while raise-on-stderr is set.
    #[error("command wrote to stderr: {0}")]
    Command(String),

    /// Captured output could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The shell could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// The process belongs to the other execution model.
    #[error("process was started by the {0} execution model")]
    ModelMismatch(ExecutionModel),

    /// Async iteration was stepped before a scheduler was supplied.
    #[error("no scheduler registered; call begin_iteration_async first")]
    SchedulerMissing,
}

impl ShellError {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShellError::Timeout { .. })
    }

    /// Whether this error reports stderr output.
    pub fn is_command_error(&self) -> bool {
        matches!(self, ShellError::Command(_))
    }
}

/// Failure to turn captured bytes into text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The configured encoding label is not a known encoding.
    #[error("unknown encoding label: {0}")]
    UnknownLabel(String),

    /// Detection produced no encoding for the first buffer.
    #[error("no encoding could be detected")]
    Undetected,

    /// Bytes are malformed for the resolved encoding.
    #[error("output is not valid {encoding}")]
    Malformed { encoding: &'static str },
}

/// Convenience Result type for shell-exec operations.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ShellError::Timeout {
            command: "sleep 5".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("sleep 5"));
        assert!(err.to_string().contains("1s"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_command_error_display() {
        let err = ShellError::Command("foo: not found".into());
        assert!(err.to_string().contains("foo: not found"));
        assert!(err.is_command_error());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ShellError = io_err.into();
        assert!(matches!(err, ShellError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: ShellError = DecodeError::Malformed { encoding: "UTF-8" }.into();
        assert!(matches!(err, ShellError::Decode(_)));
        assert_eq!(err.to_string(), "output is not valid UTF-8");
    }

    #[test]
    fn test_model_mismatch_display() {
        let err = ShellError::ModelMismatch(ExecutionModel::Suspended);
        assert!(err.to_string().contains("suspend-on-I/O"));
    }
}
