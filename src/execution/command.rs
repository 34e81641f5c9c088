//! Command configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Timeout applied by [`CommandConfig::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to run one command line.
///
/// The process is not started by building a config; see
/// [`CommandHandle`](super::CommandHandle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// The command line, handed to the shell verbatim.
    pub command_line: String,
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Encoding label for decoding output. Detected when absent.
    pub encoding: Option<String>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
    /// Whether stderr output is a [`ShellError::Command`](crate::ShellError::Command).
    pub raise_on_stderr: bool,
}

impl CommandConfig {
    /// Create a config with the default timeout and raise-on-stderr set.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            working_dir: None,
            encoding: None,
            timeout: Some(DEFAULT_TIMEOUT),
            raise_on_stderr: true,
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the output encoding label (e.g. `"utf-8"`, `"gbk"`).
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Let the command run for as long as it takes.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set whether stderr output is raised as an error.
    pub fn raise_on_stderr(mut self, raise: bool) -> Self {
        self.raise_on_stderr = raise;
        self
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new("")
    }
}
