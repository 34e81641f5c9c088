//! One-shot entry points over [`CommandHandle`].

use futures_util::FutureExt;
use tokio::runtime::Handle;

use super::command::CommandConfig;
use super::handle::CommandHandle;
use crate::Result;

/// Create a handle without starting anything.
pub fn create(config: CommandConfig) -> CommandHandle {
    CommandHandle::new(config)
}

/// Run a command to completion and close it.
pub fn run(config: CommandConfig) -> Result<Option<String>> {
    CommandHandle::new(config).scoped(|command| command.read())
}

/// Run a command to completion on `scheduler` and close it.
pub async fn run_async(config: CommandConfig, scheduler: &Handle) -> Result<Option<String>> {
    let scheduler = scheduler.clone();
    CommandHandle::new(config)
        .scoped_async(move |command| async move { command.read_async(&scheduler).await }.boxed())
        .await
}

/// Run a command line with no timeout, raising on stderr output.
///
/// ```no_run
/// let listing = shell_exec::exec("ls -1")?;
/// # Ok::<(), shell_exec::ShellError>(())
/// ```
pub fn exec(command_line: &str) -> Result<Option<String>> {
    run(CommandConfig::new(command_line).without_timeout())
}

/// Run a command line on `scheduler` with the default timeout, raising on
/// stderr output.
pub async fn exec_async(command_line: &str, scheduler: &Handle) -> Result<Option<String>> {
    run_async(CommandConfig::new(command_line), scheduler).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ShellError;
    use crate::execution::{CommandState, DEFAULT_TIMEOUT};
    use std::time::Duration;

    #[test]
    fn test_create_does_not_spawn() {
        let command = create(CommandConfig::new("echo never"));
        assert_eq!(command.state(), CommandState::Unstarted);
        assert_eq!(command.config().timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_exec_echo() {
        assert_eq!(exec("echo hello").unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_exec_empty_output() {
        assert_eq!(exec("true").unwrap(), None);
    }

    #[test]
    fn test_exec_missing_command_raises() {
        let err = exec("definitely-not-a-command-xyz").unwrap_err();
        assert!(err.is_command_error());
    }

    #[test]
    fn test_run_timeout() {
        let config = CommandConfig::new("exec sleep 5").timeout(Duration::from_millis(200));
        let err = run(config).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_run_without_raise_joins_streams() {
        let config = CommandConfig::new("echo out; echo err >&2").raise_on_stderr(false);
        assert_eq!(run(config).unwrap().as_deref(), Some("out\nerr"));
    }

    #[tokio::test]
    async fn test_exec_async_echo() {
        let output = exec_async("echo hello", &Handle::current()).await.unwrap();
        assert_eq!(output.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_run_async_timeout() {
        let config = CommandConfig::new("exec sleep 5").timeout(Duration::from_millis(200));
        let err = run_async(config, &Handle::current()).await.unwrap_err();
        assert!(matches!(err, ShellError::Timeout { .. }));
    }
}
