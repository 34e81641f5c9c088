//! # shell-exec
//!
//! Run shell commands with a timeout, capturing or streaming their output.
//!
//! A command is described by a [`CommandConfig`] and driven through a
//! [`CommandHandle`]. The process is spawned lazily on first use, either by
//! a thread that blocks on I/O or by a task that suspends on I/O inside a
//! tokio runtime, and is torn down exactly once however the run ends.
//!
//! ## Features
//!
//! - **Two execution models**: blocking threads or a tokio scheduler
//! - **Line streaming**: stdout first, then stderr, one decoded line at a time
//! - **Timeouts**: the process is killed and the caller gets a timeout error
//! - **Encoding detection**: the first non-empty output picks the encoding
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_exec::{CommandConfig, CommandHandle};
//!
//! fn main() -> shell_exec::Result<()> {
//!     // Initialize logging
//!     shell_exec::logging::try_init().ok();
//!
//!     // One-shot: run, capture, close
//!     let host = shell_exec::exec("hostname")?;
//!     println!("running on {}", host.unwrap_or_default());
//!
//!     // Streaming with a timeout
//!     let config = CommandConfig::new("ls -1 /").timeout(Duration::from_secs(5));
//!     CommandHandle::new(config).scoped(|command| {
//!         for line in command.lines() {
//!             println!("{}", line?);
//!         }
//!         Ok(())
//!     })
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod output;
pub mod process;

// Re-export commonly used types
pub use error::{DecodeError, Result, ShellError};
pub use execution::{
    create, exec, exec_async, run, run_async, AsyncLines, CommandConfig, CommandHandle,
    CommandState, ExecutionModel, Lines, DEFAULT_TIMEOUT,
};
pub use output::{detect_encoding, Decoder};
pub use process::{AsyncProcess, BlockingProcess, KillSwitch, Spawn, SystemShell};
