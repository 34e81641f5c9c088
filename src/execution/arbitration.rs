//! How stdout and stderr combine into one result.
//!
//! Both execution models go through these functions, so the blocking and
//! suspend-on-I/O drivers cannot drift apart.

use super::state::LifecycleFlags;
use crate::error::{Result, ShellError};
use crate::output::Decoder;

/// What an iteration step should do after reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineStep {
    /// Hand this line to the caller.
    Yield(String),
    /// Both streams are exhausted; close and stop.
    Exhausted,
    /// The timeout fired; close and raise.
    TimedOut,
}

fn non_empty(bytes: Option<Vec<u8>>) -> Option<Vec<u8>> {
    bytes.filter(|b| !b.is_empty())
}

fn stderr_error(decoder: &mut Decoder, stderr: &[u8]) -> Result<ShellError> {
    Ok(ShellError::Command(decoder.decode(stderr)?.unwrap_or_default()))
}

/// Combine the full output of a finished process.
///
/// Stdout alone is returned decoded. Any stderr output marks the handle as
/// having errors; with `raise_on_stderr` it becomes a [`ShellError::Command`]
/// even when stdout has content, otherwise it is appended to stdout after a
/// newline (or returned alone).
pub(crate) fn arbitrate(
    stdout: &[u8],
    stderr: &[u8],
    decoder: &mut Decoder,
    raise_on_stderr: bool,
    flags: &LifecycleFlags,
) -> Result<Option<String>> {
    if stderr.is_empty() {
        return Ok(decoder.decode(stdout)?);
    }

    flags.mark_errors();
    if raise_on_stderr {
        return Err(stderr_error(decoder, stderr)?);
    }
    let error_text = decoder.decode(stderr)?.unwrap_or_default();
    match decoder.decode(stdout)? {
        Some(output) => Ok(Some(format!("{output}\n{error_text}"))),
        None => Ok(Some(error_text)),
    }
}

/// Decide one iteration step.
///
/// `stdout_line` is `None` once stdout is exhausted; `stderr_line` is only
/// read after that, and is `None` or empty once stderr is exhausted too.
pub(crate) fn decide_line(
    stdout_line: Option<Vec<u8>>,
    stderr_line: Option<Vec<u8>>,
    decoder: &mut Decoder,
    raise_on_stderr: bool,
    flags: &LifecycleFlags,
) -> Result<LineStep> {
    let mut line = non_empty(stdout_line);
    if line.is_none() {
        if let Some(error_line) = non_empty(stderr_line) {
            flags.mark_errors();
            if raise_on_stderr {
                return Err(stderr_error(decoder, &error_line)?);
            }
            line = Some(error_line);
        }
    }

    if flags.timed_out() {
        return Ok(LineStep::TimedOut);
    }
    match line {
        Some(line) => Ok(LineStep::Yield(
            decoder.decode(&line)?.unwrap_or_default(),
        )),
        None => Ok(LineStep::Exhausted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stdout: &[u8], stderr: &[u8], raise: bool) -> (Result<Option<String>>, bool) {
        let flags = LifecycleFlags::default();
        let mut decoder = Decoder::new();
        let result = arbitrate(stdout, stderr, &mut decoder, raise, &flags);
        (result, flags.has_errors())
    }

    #[test]
    fn test_both_empty() {
        let (result, errors) = run(b"", b"", false);
        assert_eq!(result.unwrap(), None);
        assert!(!errors);
    }

    #[test]
    fn test_stdout_only() {
        let (result, errors) = run(b"foo\n", b"", true);
        assert_eq!(result.unwrap().as_deref(), Some("foo"));
        assert!(!errors);
    }

    #[test]
    fn test_stderr_only() {
        let (result, errors) = run(b"", b"foo\n", false);
        assert_eq!(result.unwrap().as_deref(), Some("foo"));
        assert!(errors);
    }

    #[test]
    fn test_both_joined() {
        let (result, errors) = run(b"out\n", b"err\n", false);
        assert_eq!(result.unwrap().as_deref(), Some("out\nerr"));
        assert!(errors);
    }

    #[test]
    fn test_raise_takes_precedence_over_stdout() {
        let (result, errors) = run(b"out\n", b"  bad thing\n", true);
        match result {
            Err(ShellError::Command(text)) => assert_eq!(text, "bad thing"),
            other => panic!("expected command error, got {other:?}"),
        }
        assert!(errors);
    }

    fn step(
        stdout: Option<&[u8]>,
        stderr: Option<&[u8]>,
        raise: bool,
        flags: &LifecycleFlags,
    ) -> Result<LineStep> {
        let mut decoder = Decoder::new();
        decide_line(
            stdout.map(<[u8]>::to_vec),
            stderr.map(<[u8]>::to_vec),
            &mut decoder,
            raise,
            flags,
        )
    }

    #[test]
    fn test_step_yields_stdout() {
        let flags = LifecycleFlags::default();
        let result = step(Some(b"line\n"), None, true, &flags).unwrap();
        assert_eq!(result, LineStep::Yield("line".into()));
        assert!(!flags.has_errors());
    }

    #[test]
    fn test_step_blank_line_yields_empty() {
        let flags = LifecycleFlags::default();
        let result = step(Some(b"\n"), None, true, &flags).unwrap();
        assert_eq!(result, LineStep::Yield(String::new()));
    }

    #[test]
    fn test_step_yields_stderr_when_not_raising() {
        let flags = LifecycleFlags::default();
        let result = step(None, Some(b"oops\n"), false, &flags).unwrap();
        assert_eq!(result, LineStep::Yield("oops".into()));
        assert!(flags.has_errors());
    }

    #[test]
    fn test_step_raises_stderr() {
        let flags = LifecycleFlags::default();
        let err = step(Some(b""), Some(b"oops\n"), true, &flags).unwrap_err();
        assert!(matches!(err, ShellError::Command(ref text) if text == "oops"));
        assert!(flags.has_errors());
    }

    #[test]
    fn test_step_exhausted() {
        let flags = LifecycleFlags::default();
        assert_eq!(step(None, Some(b""), true, &flags).unwrap(), LineStep::Exhausted);
        assert_eq!(step(None, None, true, &flags).unwrap(), LineStep::Exhausted);
    }

    #[test]
    fn test_step_timed_out_wins() {
        let flags = LifecycleFlags::default();
        flags.mark_timed_out();
        assert_eq!(step(Some(b"late\n"), None, true, &flags).unwrap(), LineStep::TimedOut);
        assert_eq!(step(None, None, true, &flags).unwrap(), LineStep::TimedOut);
    }
}
