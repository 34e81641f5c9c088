//! Command lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle state of a [`CommandHandle`](super::CommandHandle).
///
/// ```text
/// Unstarted -> Running -> Completed -> Closing -> Closed
///                    \--> TimedOut ---/
///                     \--------------/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    /// Configured, no process yet.
    #[default]
    Unstarted,
    /// The process has been spawned.
    Running,
    /// A single-shot read collected all output.
    Completed,
    /// The timeout fired.
    TimedOut,
    /// Teardown has begun.
    Closing,
    /// The process has been reaped. Nothing touches it again.
    Closed,
}

impl CommandState {
    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandState::Closed)
    }

    /// Check if the process may still produce output.
    pub fn is_live(&self) -> bool {
        matches!(self, CommandState::Running)
    }
}

/// The two ways a handle can be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// The calling thread blocks on process I/O.
    Blocking,
    /// The caller suspends on I/O inside a tokio scheduler.
    Suspended,
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionModel::Blocking => f.write_str("blocking"),
            ExecutionModel::Suspended => f.write_str("suspend-on-I/O"),
        }
    }
}

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Flags shared between a handle and its timeout machinery.
///
/// Every flag only ever goes from `false` to `true`. Completion and timeout
/// share one outcome slot that is settled once; whichever lands first wins.
#[derive(Debug, Default)]
pub(crate) struct LifecycleFlags {
    started: AtomicBool,
    has_errors: AtomicBool,
    outcome: AtomicU8,
    closing: AtomicBool,
    closed: AtomicBool,
    iterating: AtomicBool,
}

impl LifecycleFlags {
    pub(crate) fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_errors(&self) {
        self.has_errors.store(true, Ordering::SeqCst);
    }

    fn settle(&self, outcome: u8) -> bool {
        self.outcome
            .compare_exchange(PENDING, outcome, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.outcome.load(Ordering::SeqCst) == TIMED_OUT
    }

    pub(crate) fn completed(&self) -> bool {
        self.outcome.load(Ordering::SeqCst) == COMPLETED
    }

    /// Record a timeout. Returns `false` if the run already completed.
    pub(crate) fn mark_timed_out(&self) -> bool {
        self.settle(TIMED_OUT)
    }

    /// Record completion. Returns `false` if the timeout already fired.
    pub(crate) fn mark_completed(&self) -> bool {
        self.settle(COMPLETED)
    }

    pub(crate) fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Set the closing flag, returning whether it was already set.
    pub(crate) fn begin_closing(&self) -> bool {
        self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn iterating(&self) -> bool {
        self.iterating.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_iterating(&self) {
        self.iterating.store(true, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> CommandState {
        if self.closed() {
            CommandState::Closed
        } else if self.closing() {
            CommandState::Closing
        } else if self.timed_out() {
            CommandState::TimedOut
        } else if self.completed() {
            CommandState::Completed
        } else if self.started() {
            CommandState::Running
        } else {
            CommandState::Unstarted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(CommandState::default(), CommandState::Unstarted);
        assert_eq!(LifecycleFlags::default().state(), CommandState::Unstarted);
    }

    #[test]
    fn test_state_progression() {
        let flags = LifecycleFlags::default();
        flags.mark_started();
        assert_eq!(flags.state(), CommandState::Running);

        flags.mark_completed();
        assert_eq!(flags.state(), CommandState::Completed);

        assert!(!flags.begin_closing());
        assert_eq!(flags.state(), CommandState::Closing);
        assert!(flags.begin_closing());

        flags.mark_closed();
        assert_eq!(flags.state(), CommandState::Closed);
    }

    #[test]
    fn test_timed_out_precedes_closing() {
        let flags = LifecycleFlags::default();
        flags.mark_started();
        flags.mark_timed_out();
        assert_eq!(flags.state(), CommandState::TimedOut);
        flags.begin_closing();
        assert_eq!(flags.state(), CommandState::Closing);
        assert!(flags.timed_out());
    }

    #[test]
    fn test_completion_beats_late_timeout() {
        let flags = LifecycleFlags::default();
        flags.mark_started();
        assert!(flags.mark_completed());
        assert!(!flags.mark_timed_out());
        assert!(!flags.timed_out());
        assert_eq!(flags.state(), CommandState::Completed);
    }

    #[test]
    fn test_timeout_beats_late_completion() {
        let flags = LifecycleFlags::default();
        flags.mark_started();
        assert!(flags.mark_timed_out());
        assert!(!flags.mark_completed());
        assert!(!flags.completed());
        assert_eq!(flags.state(), CommandState::TimedOut);
    }

    #[test]
    fn test_is_terminal() {
        assert!(!CommandState::Unstarted.is_terminal());
        assert!(!CommandState::Running.is_terminal());
        assert!(!CommandState::TimedOut.is_terminal());
        assert!(!CommandState::Closing.is_terminal());
        assert!(CommandState::Closed.is_terminal());
    }

    #[test]
    fn test_is_live() {
        assert!(CommandState::Running.is_live());
        assert!(!CommandState::Completed.is_live());
        assert!(!CommandState::Closed.is_live());
    }

    #[test]
    fn test_model_display() {
        assert_eq!(ExecutionModel::Blocking.to_string(), "blocking");
        assert_eq!(ExecutionModel::Suspended.to_string(), "suspend-on-I/O");
    }
}
