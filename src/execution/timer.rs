//! Cancellable one-shot timer thread for the blocking model.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

/// Cancelling side of a timer started with [`start`].
///
/// Dropping it cancels the timer as well.
#[derive(Debug)]
pub(crate) struct TimerCancel(Option<Sender<()>>);

impl TimerCancel {
    /// Stop the timer from firing. No-op once fired.
    pub(crate) fn cancel(&mut self) {
        drop(self.0.take());
    }
}

/// Run `callback` on a background thread once `after` elapses, unless
/// cancelled first.
///
/// The join handle is returned separately so whoever waits for an
/// in-flight callback is never the callback's own thread.
pub(crate) fn start<F>(after: Duration, callback: F) -> std::io::Result<(TimerCancel, JoinHandle<()>)>
where
    F: FnOnce() + Send + 'static,
{
    let (cancel, cancelled) = mpsc::channel::<()>();
    let thread = std::thread::Builder::new()
        .name("shell-exec-timeout".into())
        .spawn(move || match cancelled.recv_timeout(after) {
            Err(RecvTimeoutError::Timeout) => {
                debug!(?after, "timer fired");
                callback();
            }
            // Cancelled, or the owner went away
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        })?;
    Ok((TimerCancel(Some(cancel)), thread))
}
