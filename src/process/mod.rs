//! Process spawning abstraction layer.
//!
//! A command line is handed verbatim to the platform shell (`/bin/sh -c`
//! on Unix, `cmd.exe /C` on Windows) with all three standard streams piped.
//! Two transports implement the same capabilities: [`NativeProcess`] for
//! callers that block a thread, and [`TokioProcess`] for callers that
//! suspend on I/O inside a tokio runtime.

mod async_adapter;
mod native;

pub use async_adapter::TokioProcess;
pub use native::NativeProcess;

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

/// Everything a process wrote before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// Bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Bytes written to standard error.
    pub stderr: Vec<u8>,
    /// Exit status, if the process was reaped.
    pub status: Option<ExitStatus>,
}

impl Captured {
    /// Create a capture without an exit status.
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            status: None,
        }
    }
}

/// A process driven from a thread that is allowed to block.
///
/// All methods take `&self` so a timer thread can kill the process while
/// another thread is blocked reading from it.
pub trait BlockingProcess: Send + Sync + 'static {
    /// OS process id.
    fn id(&self) -> u32;

    /// Read one line from stdout, newline included. Empty at end of stream.
    fn read_stdout_line(&self) -> io::Result<Vec<u8>>;

    /// Read one line from stderr, newline included. Empty at end of stream.
    fn read_stderr_line(&self) -> io::Result<Vec<u8>>;

    /// Write to the process input stream.
    fn write_stdin(&self, data: &[u8]) -> io::Result<()>;

    /// Close stdin, then collect both output streams until exit.
    ///
    /// Returns `Ok(None)` if the process is still running when `timeout`
    /// elapses; the process is left running.
    fn communicate(&self, timeout: Option<Duration>) -> io::Result<Option<Captured>>;

    /// Release the input stream.
    fn close_stdin(&self) -> io::Result<()>;

    /// Forcibly terminate the process.
    fn kill(&self) -> io::Result<()>;

    /// Block until the process exits.
    fn wait(&self) -> io::Result<ExitStatus>;
}

/// A process driven from a single-threaded cooperative scheduler.
pub trait AsyncProcess: Send + 'static {
    /// OS process id, while the process is running.
    fn id(&self) -> Option<u32>;

    /// Read one line from stdout, newline included. Empty at end of stream.
    fn read_stdout_line(&mut self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Read one line from stderr, newline included. Empty at end of stream.
    fn read_stderr_line(&mut self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Whether stdout has reached end of stream.
    fn stdout_at_eof(&self) -> bool;

    /// Whether stderr has reached end of stream.
    fn stderr_at_eof(&self) -> bool;

    /// Write to the process input stream.
    fn write_stdin(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Close stdin, then collect both output streams until exit.
    fn communicate(&mut self) -> impl Future<Output = io::Result<Captured>> + Send;

    /// Drop the pipes to the process. Calling this again is a no-op.
    fn close_transport(&mut self);

    /// Forcibly terminate the process.
    fn kill(&mut self) -> io::Result<()>;

    /// Suspend until the process exits.
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send;
}

/// Capability that starts processes for either execution model.
pub trait Spawn: Send + Sync + 'static {
    /// Transport for the blocking model.
    type Blocking: BlockingProcess;
    /// Transport for the suspend-on-I/O model.
    type Suspended: AsyncProcess;

    /// Start `command_line` for blocking use.
    fn spawn(&self, command_line: &str, working_dir: Option<&Path>)
        -> io::Result<Self::Blocking>;

    /// Start `command_line` on `scheduler`.
    ///
    /// Once `kill` is triggered both output readers report end of stream
    /// and the process is killed.
    fn spawn_suspended(
        &self,
        command_line: &str,
        working_dir: Option<&Path>,
        scheduler: &Handle,
        kill: KillSwitch,
    ) -> io::Result<Self::Suspended>;
}

/// Spawns commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

impl Spawn for SystemShell {
    type Blocking = NativeProcess;
    type Suspended = TokioProcess;

    fn spawn(&self, command_line: &str, working_dir: Option<&Path>) -> io::Result<NativeProcess> {
        NativeProcess::spawn(shell_command(command_line, working_dir))
    }

    fn spawn_suspended(
        &self,
        command_line: &str,
        working_dir: Option<&Path>,
        scheduler: &Handle,
        kill: KillSwitch,
    ) -> io::Result<TokioProcess> {
        TokioProcess::spawn(shell_command(command_line, working_dir), scheduler, kill)
    }
}

/// Build the shell invocation for a command line.
pub fn shell_command(command_line: &str, working_dir: Option<&Path>) -> std::process::Command {
    #[cfg(unix)]
    let mut cmd = {
        let mut c = std::process::Command::new("/bin/sh");
        c.arg("-c");
        c.arg(command_line);
        c
    };

    #[cfg(windows)]
    let mut cmd = {
        let mut c = std::process::Command::new("cmd.exe");
        c.arg("/C");
        c.arg(command_line);
        c
    };

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// One-way switch that forcibly terminates a suspended process.
///
/// It can be triggered before the process exists; a process spawned with
/// an already-triggered switch is killed right away.
#[derive(Debug, Clone)]
pub struct KillSwitch(Arc<watch::Sender<bool>>);

impl KillSwitch {
    /// Create an untriggered switch.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Trigger the switch. Idempotent.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    /// Whether the switch has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Subscribe to the switch.
    pub fn signal(&self) -> KillSignal {
        KillSignal(self.0.subscribe())
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`KillSwitch`].
#[derive(Debug, Clone)]
pub struct KillSignal(watch::Receiver<bool>);

impl KillSignal {
    /// Whether the switch has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once the switch is triggered or every switch is dropped.
    pub async fn triggered(&mut self) {
        let _ = self.0.wait_for(|killed| *killed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_program() {
        let cmd = shell_command("echo hi", None);
        #[cfg(unix)]
        {
            assert_eq!(cmd.get_program(), "/bin/sh");
            let args: Vec<_> = cmd.get_args().collect();
            assert_eq!(args, ["-c", "echo hi"]);
        }
        #[cfg(windows)]
        assert_eq!(cmd.get_program(), "cmd.exe");
        assert!(cmd.get_current_dir().is_none());
    }

    #[test]
    fn test_shell_command_working_dir() {
        let cmd = shell_command("pwd", Some(Path::new("/tmp")));
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_kill_switch() {
        let switch = KillSwitch::new();
        let signal = switch.signal();
        assert!(!switch.is_triggered());
        assert!(!signal.is_triggered());

        switch.trigger();
        switch.trigger();
        assert!(switch.is_triggered());
        assert!(signal.is_triggered());
        // Late subscribers see the trigger too
        assert!(switch.signal().is_triggered());
    }

    #[tokio::test]
    async fn test_kill_signal_resolves() {
        let switch = KillSwitch::new();
        let mut signal = switch.signal();
        let waiter = tokio::spawn(async move { signal.triggered().await });
        switch.clone().trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal resolves")
            .unwrap();
    }

    #[tokio::test]
    async fn test_kill_signal_resolves_when_dropped() {
        let switch = KillSwitch::new();
        let mut signal = switch.signal();
        drop(switch);
        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .expect("signal resolves");
    }
}
