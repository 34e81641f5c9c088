//! The command lifecycle state machine.
//!
//! A [`CommandHandle`] owns at most one process, spawned lazily by the
//! first read or iteration step. It is driven either by a thread that
//! blocks on I/O or by a task that suspends on I/O, never both, and it
//! tears the process down exactly once whichever way the run ends.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use futures_util::future::BoxFuture;
use futures_util::Stream;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::arbitration::{arbitrate, decide_line, LineStep};
use super::command::CommandConfig;
use super::state::{CommandState, ExecutionModel, LifecycleFlags};
use super::timer::{self, TimerCancel};
use crate::error::{Result, ShellError};
use crate::output::Decoder;
use crate::process::{AsyncProcess, BlockingProcess, KillSwitch, Spawn, SystemShell};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| ShellError::LockPoisoned)
}

/// State reachable from the blocking timeout thread.
struct Shared<P> {
    command_line: String,
    flags: LifecycleFlags,
    process: Mutex<Option<Arc<P>>>,
    timer: Mutex<Option<TimerCancel>>,
    exit_status: Mutex<Option<ExitStatus>>,
}

impl<P: BlockingProcess> Shared<P> {
    fn new(command_line: String) -> Self {
        Self {
            command_line,
            flags: LifecycleFlags::default(),
            process: Mutex::new(None),
            timer: Mutex::new(None),
            exit_status: Mutex::new(None),
        }
    }

    fn process(&self) -> Result<Option<Arc<P>>> {
        Ok(lock(&self.process)?.as_ref().map(Arc::clone))
    }

    fn has_process(&self) -> Result<bool> {
        Ok(lock(&self.process)?.is_some())
    }

    fn record_exit(&self, status: ExitStatus) {
        if let Ok(mut slot) = self.exit_status.lock() {
            *slot = Some(status);
        }
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status.lock().ok().and_then(|slot| *slot)
    }

    /// Tear down the blocking process. Safe to call from the timer thread.
    fn close(&self) -> Result<()> {
        let Some(process) = self.process()? else {
            return Ok(());
        };
        if self.flags.begin_closing() {
            debug!(command = %self.command_line, "close already in progress");
            return Ok(());
        }
        if let Some(mut timer) = lock(&self.timer)?.take() {
            timer.cancel();
        }

        debug!(pid = process.id(), "closing process");
        process.close_stdin()?;
        if self.flags.iterating() || self.flags.timed_out() {
            // A line read may be blocked on the pipe; only a kill unblocks it
            process.kill()?;
        }
        let status = process.wait()?;
        self.record_exit(status);
        self.flags.mark_closed();
        debug!(pid = process.id(), %status, "process closed");
        Ok(())
    }

    /// Settle a handle whose timeout fired before any process existed.
    fn close_unspawned(&self) {
        if !self.flags.begin_closing() {
            self.flags.mark_closed();
            debug!(command = %self.command_line, "closed before spawn");
        }
    }

    fn on_timeout(&self) {
        if !self.flags.mark_timed_out() {
            return;
        }
        warn!(command = %self.command_line, "command timed out, closing");
        if let Err(e) = self.close() {
            error!(error = %e, "failed to close timed out command");
        }
    }
}

/// One external command and its lifecycle.
///
/// Created with configuration only; the process starts on first use.
///
/// # Blocking
///
/// ```no_run
/// use shell_exec::{CommandConfig, CommandHandle};
///
/// let mut command = CommandHandle::new(CommandConfig::new("ls -1"));
/// while let Some(line) = command.next_line()? {
///     println!("{line}");
/// }
/// # Ok::<(), shell_exec::ShellError>(())
/// ```
///
/// # Suspend-on-I/O
///
/// ```no_run
/// use shell_exec::{CommandConfig, CommandHandle};
///
/// # async fn demo() -> shell_exec::Result<()> {
/// let scheduler = tokio::runtime::Handle::current();
/// let mut command = CommandHandle::new(CommandConfig::new("hostname"));
/// let name = command.read_async(&scheduler).await?;
/// command.close_async().await?;
/// # Ok(())
/// # }
/// ```
pub struct CommandHandle<S: Spawn = SystemShell> {
    config: CommandConfig,
    spawner: S,
    decoder: Decoder,
    shared: Arc<Shared<S::Blocking>>,
    timer_thread: Option<JoinHandle<()>>,
    suspended: Option<S::Suspended>,
    scheduler: Option<Handle>,
    timeout_task: Option<tokio::task::JoinHandle<()>>,
    kill_switch: KillSwitch,
}

impl CommandHandle<SystemShell> {
    /// Create a handle that runs through the platform shell.
    pub fn new(config: CommandConfig) -> Self {
        Self::with_spawner(config, SystemShell)
    }
}

impl<S: Spawn> CommandHandle<S> {
    /// Create a handle with a custom spawn capability.
    pub fn with_spawner(config: CommandConfig, spawner: S) -> Self {
        let decoder = Decoder::from_label(config.encoding.as_deref());
        let shared = Arc::new(Shared::new(config.command_line.clone()));
        Self {
            config,
            spawner,
            decoder,
            shared,
            timer_thread: None,
            suspended: None,
            scheduler: None,
            timeout_task: None,
            kill_switch: KillSwitch::new(),
        }
    }

    /// The configuration this handle was created with.
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Whether anything was seen on stderr. Never reverts.
    pub fn has_errors(&self) -> bool {
        self.shared.flags.has_errors()
    }

    /// Whether the timeout fired.
    pub fn is_timed_out(&self) -> bool {
        self.shared.flags.timed_out()
    }

    /// Whether teardown has begun.
    pub fn is_closing(&self) -> bool {
        self.shared.flags.closing()
    }

    /// Whether the process has been reaped.
    pub fn is_closed(&self) -> bool {
        self.shared.flags.closed()
    }

    /// OS process id, once spawned and while the platform still reports it.
    pub fn pid(&self) -> Option<u32> {
        match self.suspended.as_ref() {
            Some(process) => process.id(),
            None => self.shared.process().ok().flatten().map(|p| p.id()),
        }
    }

    /// Whether line iteration has begun.
    pub fn is_iterating(&self) -> bool {
        self.shared.flags.iterating()
    }

    /// Whether the process is running and not yet being torn down.
    pub fn is_running(&self) -> bool {
        self.state().is_live()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommandState {
        self.shared.flags.state()
    }

    /// Name of the output encoding, once resolved.
    pub fn encoding(&self) -> Option<&'static str> {
        self.decoder.encoding()
    }

    /// Exit status from the final wait, once known.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.shared.exit_status()
    }

    /// Which execution model owns the process, if started.
    pub fn execution_model(&self) -> Option<ExecutionModel> {
        if self.suspended.is_some() {
            Some(ExecutionModel::Suspended)
        } else if self.shared.has_process().unwrap_or(false) {
            Some(ExecutionModel::Blocking)
        } else {
            None
        }
    }

    fn timeout_error(&self) -> ShellError {
        ShellError::Timeout {
            command: self.config.command_line.clone(),
            timeout: self.config.timeout.unwrap_or_default(),
        }
    }

    fn working_dir(&self) -> Option<&Path> {
        self.config.working_dir.as_deref()
    }

    fn spawn_error(&self, source: std::io::Error) -> ShellError {
        ShellError::Spawn {
            command: self.config.command_line.clone(),
            source,
        }
    }

    // ---------------------------------------------------------------------
    // Blocking model
    // ---------------------------------------------------------------------

    /// Spawn the blocking process unless it already exists.
    ///
    /// With `unless_timed_out`, returns `None` instead of spawning once the
    /// timer has fired. The check and the spawn happen under the process
    /// lock, which the timer's close also takes.
    fn start(&self, unless_timed_out: bool) -> Result<Option<Arc<S::Blocking>>> {
        if self.suspended.is_some() {
            return Err(ShellError::ModelMismatch(ExecutionModel::Suspended));
        }
        let mut slot = lock(&self.shared.process)?;
        if let Some(process) = slot.as_ref() {
            return Ok(Some(Arc::clone(process)));
        }
        if unless_timed_out && self.shared.flags.timed_out() {
            return Ok(None);
        }

        let process = self
            .spawner
            .spawn(&self.config.command_line, self.working_dir())
            .map_err(|e| self.spawn_error(e))?;
        info!(pid = process.id(), command = %self.config.command_line, "process started");
        let process = Arc::new(process);
        *slot = Some(Arc::clone(&process));
        self.shared.flags.mark_started();
        Ok(Some(process))
    }

    fn ensure_started(&self) -> Result<Arc<S::Blocking>> {
        match self.start(false)? {
            Some(process) => Ok(process),
            None => Err(self.timeout_error()),
        }
    }

    /// Run the command to completion and return its combined output.
    ///
    /// Blocks until the process exits or the timeout elapses. On timeout
    /// the process is left to [`close`](Self::close), which kills it.
    pub fn read(&mut self) -> Result<Option<String>> {
        if self.shared.flags.closing() {
            return Ok(None);
        }
        let process = self.ensure_started()?;
        let captured = match process.communicate(self.config.timeout)? {
            Some(captured) => captured,
            None => {
                warn!(command = %self.config.command_line, timeout = ?self.config.timeout, "command timed out");
                self.shared.flags.mark_timed_out();
                return Err(self.timeout_error());
            }
        };
        if let Some(status) = captured.status {
            self.shared.record_exit(status);
        }
        if !self.shared.flags.mark_completed() && self.shared.flags.timed_out() {
            return Err(self.timeout_error());
        }
        arbitrate(
            &captured.stdout,
            &captured.stderr,
            &mut self.decoder,
            self.config.raise_on_stderr,
            &self.shared.flags,
        )
    }

    /// Start line iteration, arming the timeout thread if configured.
    ///
    /// Called implicitly by the first [`next_line`](Self::next_line).
    pub fn begin_iteration(&mut self) -> Result<()> {
        if self.shared.flags.iterating() {
            return Ok(());
        }
        self.shared.flags.mark_iterating();
        if let Some(timeout) = self.config.timeout {
            let shared = Arc::clone(&self.shared);
            let (cancel, thread) = timer::start(timeout, move || shared.on_timeout())?;
            *lock(&self.shared.timer)? = Some(cancel);
            self.timer_thread = Some(thread);
        }
        Ok(())
    }

    /// Next line of output, blocking until one is available.
    ///
    /// Stdout is read first; stderr lines follow once stdout is exhausted.
    /// Returns `Ok(None)` when both streams are exhausted or the handle has
    /// been closed, and a timeout error if the timer fired.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.begin_iteration()?;
        if self.shared.flags.closing() {
            return Ok(None);
        }

        let step = match self.start(true)? {
            Some(process) => {
                let line = process.read_stdout_line()?;
                let stdout_line = (!line.is_empty()).then_some(line);
                let stderr_line = if stdout_line.is_none() {
                    Some(process.read_stderr_line()?)
                } else {
                    None
                };
                decide_line(
                    stdout_line,
                    stderr_line,
                    &mut self.decoder,
                    self.config.raise_on_stderr,
                    &self.shared.flags,
                )?
            }
            None => {
                self.shared.close_unspawned();
                LineStep::TimedOut
            }
        };

        match step {
            LineStep::Yield(line) => Ok(Some(line)),
            LineStep::Exhausted => {
                self.close()?;
                Ok(None)
            }
            LineStep::TimedOut => {
                self.close()?;
                Err(self.timeout_error())
            }
        }
    }

    /// Iterate over output lines.
    pub fn lines(&mut self) -> Lines<'_, S> {
        Lines {
            handle: self,
            done: false,
        }
    }

    /// Write to the process input, starting the process if needed.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let process = self.ensure_started()?;
        process.write_stdin(data)?;
        Ok(())
    }

    /// Close the process: kill it if iterating or timed out, then wait.
    ///
    /// A no-op before the process starts and after the first close.
    pub fn close(&mut self) -> Result<()> {
        if self.suspended.is_some() {
            return Err(ShellError::ModelMismatch(ExecutionModel::Suspended));
        }
        let result = self.shared.close();
        if self.shared.flags.closing() {
            // Either we cancelled the timer or it fired; wait for its close
            if let Some(thread) = self.timer_thread.take() {
                if thread.join().is_err() {
                    error!("timeout thread panicked");
                }
            }
        }
        result
    }

    /// Run `f` against the handle, closing it afterwards on every path.
    ///
    /// An error from `f` wins over an error from closing.
    pub fn scoped<T>(mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(&mut self);
        let closed = self.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "close failed after error");
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Suspend-on-I/O model
    // ---------------------------------------------------------------------

    /// Register the timeout callback on `scheduler`. It flips the kill
    /// switch, which ends both output streams and kills the process.
    fn arm_timeout(&mut self, scheduler: &Handle) {
        let Some(timeout) = self.config.timeout else {
            return;
        };
        if self.timeout_task.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let kill = self.kill_switch.clone();
        self.timeout_task = Some(scheduler.spawn(async move {
            tokio::time::sleep(timeout).await;
            if shared.flags.mark_timed_out() {
                warn!(command = %shared.command_line, ?timeout, "command timed out, killing");
                kill.trigger();
            }
        }));
    }

    fn disarm_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    fn ensure_started_async(&mut self, scheduler: &Handle) -> Result<&mut S::Suspended> {
        if self.shared.has_process()? {
            return Err(ShellError::ModelMismatch(ExecutionModel::Blocking));
        }
        let process = match self.suspended.take() {
            Some(process) => process,
            None => {
                let process = self
                    .spawner
                    .spawn_suspended(
                        &self.config.command_line,
                        self.working_dir(),
                        scheduler,
                        self.kill_switch.clone(),
                    )
                    .map_err(|e| self.spawn_error(e))?;
                info!(pid = process.id(), command = %self.config.command_line, "process started");
                self.shared.flags.mark_started();
                process
            }
        };
        Ok(self.suspended.insert(process))
    }

    /// Run the command to completion on `scheduler` and return its
    /// combined output.
    ///
    /// The timeout is armed before the process is spawned, so a slow spawn
    /// counts against it too.
    pub async fn read_async(&mut self, scheduler: &Handle) -> Result<Option<String>> {
        if self.shared.flags.closing() {
            return Ok(None);
        }
        self.scheduler = Some(scheduler.clone());
        self.arm_timeout(scheduler);

        let captured = match self.ensure_started_async(scheduler) {
            Ok(process) => process.communicate().await,
            Err(e) => {
                self.disarm_timeout();
                return Err(e);
            }
        };
        self.disarm_timeout();
        let captured = captured?;

        if let Some(status) = captured.status {
            self.shared.record_exit(status);
        }
        if !self.shared.flags.mark_completed() && self.shared.flags.timed_out() {
            return Err(self.timeout_error());
        }
        arbitrate(
            &captured.stdout,
            &captured.stderr,
            &mut self.decoder,
            self.config.raise_on_stderr,
            &self.shared.flags,
        )
    }

    /// Start line iteration on `scheduler`, registering the timeout
    /// callback before any process exists.
    pub fn begin_iteration_async(&mut self, scheduler: &Handle) {
        self.scheduler = Some(scheduler.clone());
        if self.shared.flags.iterating() {
            return;
        }
        self.shared.flags.mark_iterating();
        self.arm_timeout(scheduler);
    }

    /// Next line of output, suspending until one is available.
    ///
    /// Same policy as [`next_line`](Self::next_line). Requires a prior
    /// [`begin_iteration_async`](Self::begin_iteration_async) or
    /// [`read_async`](Self::read_async) to know the scheduler.
    pub async fn next_line_async(&mut self) -> Result<Option<String>> {
        let scheduler = self.scheduler.clone().ok_or(ShellError::SchedulerMissing)?;
        self.begin_iteration_async(&scheduler);
        if self.shared.flags.closing() {
            return Ok(None);
        }

        let step = if self.suspended.is_none() && self.shared.flags.timed_out() {
            self.shared.close_unspawned();
            LineStep::TimedOut
        } else {
            let process = self.ensure_started_async(&scheduler)?;
            let line = process.read_stdout_line().await?;
            let stdout_line = (!process.stdout_at_eof()).then_some(line);
            let stderr_line = if stdout_line.is_none() {
                Some(process.read_stderr_line().await?)
            } else {
                None
            };
            decide_line(
                stdout_line,
                stderr_line,
                &mut self.decoder,
                self.config.raise_on_stderr,
                &self.shared.flags,
            )?
        };

        match step {
            LineStep::Yield(line) => Ok(Some(line)),
            LineStep::Exhausted => {
                self.close_async().await?;
                Ok(None)
            }
            LineStep::TimedOut => {
                self.close_async().await?;
                Err(self.timeout_error())
            }
        }
    }

    /// Iterate over output lines on `scheduler`.
    pub fn lines_async(&mut self, scheduler: &Handle) -> AsyncLines<'_, S> {
        self.begin_iteration_async(scheduler);
        AsyncLines { handle: self }
    }

    /// Write to the process input, starting the process if needed.
    pub async fn write_stdin_async(&mut self, scheduler: &Handle, data: &[u8]) -> Result<()> {
        self.scheduler = Some(scheduler.clone());
        self.ensure_started_async(scheduler)?.write_stdin(data).await?;
        Ok(())
    }

    /// Close the process without blocking the scheduler.
    ///
    /// Drops the pipes (a second transport close is tolerated), kills the
    /// process if iterating or timed out, then suspends until it exits.
    /// A no-op before the process starts and after the first close.
    pub async fn close_async(&mut self) -> Result<()> {
        if self.shared.has_process()? {
            return Err(ShellError::ModelMismatch(ExecutionModel::Blocking));
        }
        if self.suspended.is_none() || self.shared.flags.begin_closing() {
            return Ok(());
        }
        self.disarm_timeout();

        let kill = self.shared.flags.iterating() || self.shared.flags.timed_out();
        let Some(process) = self.suspended.as_mut() else {
            return Ok(());
        };
        debug!(pid = process.id(), "closing process");
        process.close_transport();
        process.close_transport();
        if kill {
            process.kill()?;
        }
        let status = process.wait().await?;
        self.shared.record_exit(status);
        self.shared.flags.mark_closed();
        debug!(%status, "process closed");
        Ok(())
    }

    /// Run `f` against the handle, closing it afterwards on every path.
    ///
    /// ```no_run
    /// use futures_util::FutureExt;
    /// use shell_exec::{CommandConfig, CommandHandle};
    ///
    /// # async fn demo() -> shell_exec::Result<()> {
    /// let scheduler = tokio::runtime::Handle::current();
    /// let output = CommandHandle::new(CommandConfig::new("hostname"))
    ///     .scoped_async(|command| async move { command.read_async(&scheduler).await }.boxed())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped_async<T, F>(mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        let result = f(&mut self).await;
        let closed = self.close_async().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "close failed after error");
                Err(e)
            }
        }
    }
}

impl<S: Spawn> Drop for CommandHandle<S> {
    fn drop(&mut self) {
        self.disarm_timeout();
        if self.suspended.is_some() {
            if !self.shared.flags.closed() {
                self.kill_switch.trigger();
            }
            return;
        }
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close command on drop");
        }
    }
}

/// Blocking line iterator returned by [`CommandHandle::lines`].
///
/// Yields each line once; an error ends the iteration.
pub struct Lines<'a, S: Spawn> {
    handle: &'a mut CommandHandle<S>,
    done: bool,
}

impl<S: Spawn> Lines<'_, S> {
    /// Close the underlying handle; the next call to `next` returns `None`.
    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }

    /// The handle being iterated.
    pub fn handle(&self) -> &CommandHandle<S> {
        self.handle
    }
}

impl<S: Spawn> Iterator for Lines<'_, S> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.handle.next_line() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Suspend-on-I/O line cursor returned by [`CommandHandle::lines_async`].
pub struct AsyncLines<'a, S: Spawn> {
    handle: &'a mut CommandHandle<S>,
}

impl<'a, S: Spawn> AsyncLines<'a, S> {
    /// Next line, or `None` once exhausted or closed.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.handle.next_line_async().await
    }

    /// Close the underlying handle; the next step returns `None`.
    pub async fn close(&mut self) -> Result<()> {
        self.handle.close_async().await
    }

    /// The handle being iterated.
    pub fn handle(&self) -> &CommandHandle<S> {
        self.handle
    }

    /// Turn the cursor into a stream of lines. An error ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + 'a {
        futures_util::stream::try_unfold(self.handle, |handle| async move {
            let line = handle.next_line_async().await?;
            Ok::<_, ShellError>(line.map(|line| (line, handle)))
        })
    }
}
