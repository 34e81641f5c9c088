//! Blocking process transport on top of `std::process`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace};
use wait_timeout::ChildExt;

use super::{BlockingProcess, Captured};

fn lock<T>(mutex: &Mutex<T>) -> io::Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| io::Error::other("process lock poisoned"))
}

/// A shell process whose streams are read by blocking the calling thread.
///
/// Each stream sits behind its own lock, so killing or waiting never
/// contends with a thread blocked on a line read.
pub struct NativeProcess {
    pid: u32,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    stderr: Mutex<Option<BufReader<ChildStderr>>>,
}

impl NativeProcess {
    /// Spawn a prepared command. All three streams must be piped.
    pub fn spawn(mut command: std::process::Command) -> io::Result<Self> {
        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(pid, "native process spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(BufReader::new);

        Ok(Self {
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
        })
    }
}

fn read_line<R: Read>(reader: &Mutex<Option<BufReader<R>>>) -> io::Result<Vec<u8>> {
    let mut guard = lock(reader)?;
    let mut line = Vec::new();
    if let Some(reader) = guard.as_mut() {
        reader.read_until(b'\n', &mut line)?;
    }
    Ok(line)
}

fn drain<R: Read + Send + 'static>(reader: Option<BufReader<R>>) -> JoinHandle<io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            reader.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join(handle: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::other("output reader thread panicked"))?
}

impl BlockingProcess for NativeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn read_stdout_line(&self) -> io::Result<Vec<u8>> {
        let line = read_line(&self.stdout)?;
        trace!(pid = self.pid, bytes = line.len(), "stdout line");
        Ok(line)
    }

    fn read_stderr_line(&self) -> io::Result<Vec<u8>> {
        let line = read_line(&self.stderr)?;
        trace!(pid = self.pid, bytes = line.len(), "stderr line");
        Ok(line)
    }

    fn write_stdin(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.stdin)?;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(data)?;
        stdin.flush()
    }

    fn communicate(&self, timeout: Option<Duration>) -> io::Result<Option<Captured>> {
        self.close_stdin()?;

        // Drain both pipes concurrently so a full stderr pipe cannot stall stdout
        let stdout = drain(lock(&self.stdout)?.take());
        let stderr = drain(lock(&self.stderr)?.take());

        let status = {
            let mut child = lock(&self.child)?;
            match timeout {
                Some(timeout) => match child.wait_timeout(timeout)? {
                    Some(status) => status,
                    None => {
                        debug!(pid = self.pid, ?timeout, "process still running at deadline");
                        // Reader threads finish on their own once the process dies
                        return Ok(None);
                    }
                },
                None => child.wait()?,
            }
        };

        Ok(Some(Captured {
            stdout: join(stdout)?,
            stderr: join(stderr)?,
            status: Some(status),
        }))
    }

    fn close_stdin(&self) -> io::Result<()> {
        drop(lock(&self.stdin)?.take());
        Ok(())
    }

    fn kill(&self) -> io::Result<()> {
        let mut child = lock(&self.child)?;
        match child.kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        lock(&self.child)?.wait()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::shell_command;

    fn spawn(command_line: &str) -> NativeProcess {
        NativeProcess::spawn(shell_command(command_line, None)).unwrap()
    }

    #[test]
    fn test_read_lines() {
        let process = spawn("printf 'one\\ntwo\\n'");
        assert_eq!(process.read_stdout_line().unwrap(), b"one\n");
        assert_eq!(process.read_stdout_line().unwrap(), b"two\n");
        assert!(process.read_stdout_line().unwrap().is_empty());
        assert!(process.read_stderr_line().unwrap().is_empty());
        assert!(process.wait().unwrap().success());
    }

    #[test]
    fn test_communicate() {
        let process = spawn("echo out; echo err >&2");
        let captured = process.communicate(None).unwrap().unwrap();
        assert_eq!(captured.stdout, b"out\n");
        assert_eq!(captured.stderr, b"err\n");
        assert!(captured.status.unwrap().success());
    }

    #[test]
    fn test_communicate_timeout_then_kill() {
        let process = spawn("sleep 5");
        let captured = process.communicate(Some(Duration::from_millis(100))).unwrap();
        assert!(captured.is_none());
        process.kill().unwrap();
        assert!(!process.wait().unwrap().success());
    }

    #[test]
    fn test_write_stdin() {
        let process = spawn("cat");
        process.write_stdin(b"echoed\n").unwrap();
        assert_eq!(process.read_stdout_line().unwrap(), b"echoed\n");
        process.close_stdin().unwrap();
        assert!(process.read_stdout_line().unwrap().is_empty());
        assert!(process.write_stdin(b"late").is_err());
        process.wait().unwrap();
    }

    #[test]
    fn test_kill_after_exit() {
        let process = spawn("true");
        process.wait().unwrap();
        assert!(process.kill().is_ok());
    }
}
