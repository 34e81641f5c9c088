//! Async process transport on top of `tokio::process`.
//!
//! The child itself is owned by a monitor task on the caller's scheduler.
//! The monitor reaps the process and kills it as soon as the kill switch
//! flips, so a timeout fires promptly even while nobody is polling the
//! output streams.

use std::io;
use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{AsyncProcess, Captured, KillSignal, KillSwitch};

type ExitSlot = Option<Result<ExitStatus, String>>;

/// A shell process driven by a tokio scheduler.
pub struct TokioProcess {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
    stdout_eof: bool,
    stderr_eof: bool,
    kill: KillSwitch,
    exit: watch::Receiver<ExitSlot>,
    monitor: JoinHandle<()>,
}

impl TokioProcess {
    /// Spawn a prepared command on `scheduler`. All three streams must be piped.
    pub fn spawn(
        command: std::process::Command,
        scheduler: &Handle,
        kill: KillSwitch,
    ) -> io::Result<Self> {
        // Registering the child needs the scheduler's reactor
        let _guard = scheduler.enter();
        let mut command = tokio::process::Command::from(command);
        let mut child = command.kill_on_drop(true).spawn()?;
        let pid = child.id();
        debug!(pid, "tokio process spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(BufReader::new);

        let (exit_tx, exit) = watch::channel(None);
        let mut signal = kill.signal();
        let monitor = scheduler.spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = signal.triggered() => {
                    warn!(pid, "killing process");
                    if let Err(e) = child.start_kill() {
                        debug!(pid, error = %e, "kill failed, process already gone");
                    }
                    child.wait().await
                }
            };
            debug!(pid, ?status, "process exited");
            exit_tx.send_replace(Some(status.map_err(|e| e.to_string())));
        });

        Ok(Self {
            pid,
            stdin,
            stdout,
            stderr,
            stdout_eof: false,
            stderr_eof: false,
            kill,
            exit,
            monitor,
        })
    }
}

/// Read one line, or nothing once the kill switch has flipped.
async fn read_line<R: AsyncRead + Unpin>(
    reader: Option<&mut BufReader<R>>,
    eof: &mut bool,
    mut signal: KillSignal,
) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let Some(reader) = reader else {
        *eof = true;
        return Ok(line);
    };
    if *eof {
        return Ok(line);
    }

    let killed = tokio::select! {
        biased;
        () = signal.triggered() => true,
        read = reader.read_until(b'\n', &mut line) => {
            if read? == 0 {
                *eof = true;
            }
            false
        }
    };
    if killed {
        *eof = true;
        return Ok(Vec::new());
    }
    Ok(line)
}

/// Read to end of stream, stopping early if the kill switch flips.
async fn read_all<R: AsyncRead + Unpin>(
    reader: Option<&mut BufReader<R>>,
    mut signal: KillSignal,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let Some(reader) = reader else {
        return Ok(buf);
    };
    tokio::select! {
        biased;
        () = signal.triggered() => {}
        read = reader.read_to_end(&mut buf) => {
            read?;
        }
    }
    Ok(buf)
}

impl AsyncProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn read_stdout_line(&mut self) -> io::Result<Vec<u8>> {
        let signal = self.kill.signal();
        let line = read_line(self.stdout.as_mut(), &mut self.stdout_eof, signal).await?;
        trace!(pid = self.pid, bytes = line.len(), "stdout line");
        Ok(line)
    }

    async fn read_stderr_line(&mut self) -> io::Result<Vec<u8>> {
        let signal = self.kill.signal();
        let line = read_line(self.stderr.as_mut(), &mut self.stderr_eof, signal).await?;
        trace!(pid = self.pid, bytes = line.len(), "stderr line");
        Ok(line)
    }

    fn stdout_at_eof(&self) -> bool {
        self.stdout_eof || self.kill.is_triggered()
    }

    fn stderr_at_eof(&self) -> bool {
        self.stderr_eof || self.kill.is_triggered()
    }

    async fn write_stdin(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(data).await?;
        stdin.flush().await
    }

    async fn communicate(&mut self) -> io::Result<Captured> {
        drop(self.stdin.take());

        let (stdout, stderr) = tokio::try_join!(
            read_all(self.stdout.as_mut(), self.kill.signal()),
            read_all(self.stderr.as_mut(), self.kill.signal()),
        )?;
        self.stdout_eof = true;
        self.stderr_eof = true;

        let status = self.wait().await?;
        Ok(Captured {
            stdout,
            stderr,
            status: Some(status),
        })
    }

    fn close_transport(&mut self) {
        if self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none() {
            trace!(pid = self.pid, "transport already closed");
            return;
        }
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());
        self.stdout_eof = true;
        self.stderr_eof = true;
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kill.trigger();
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        let mut exit = self.exit.clone();
        let slot = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("process monitor stopped"))?;
        match &*slot {
            Some(Ok(status)) => Ok(*status),
            Some(Err(message)) => Err(io::Error::other(message.clone())),
            None => Err(io::Error::other("process exit not recorded")),
        }
    }
}

impl Drop for TokioProcess {
    fn drop(&mut self) {
        if !self.monitor.is_finished() {
            // The monitor owns the child; flipping the switch makes it kill and reap
            self.kill.trigger();
        }
    }
}
