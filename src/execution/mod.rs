//! Command execution engine.
//!
//! This module provides the command lifecycle:
//! - Lazy spawn on first read or iteration step
//! - Blocking and suspend-on-I/O execution models
//! - Timeouts and idempotent teardown
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_exec::execution::{run, CommandConfig};
//!
//! let output = run(CommandConfig::new("uname -a").timeout(Duration::from_secs(5)))?;
//! println!("{}", output.unwrap_or_default());
//! # Ok::<(), shell_exec::ShellError>(())
//! ```

mod arbitration;
mod command;
mod executor;
mod handle;
mod state;
mod timer;

pub use command::{CommandConfig, DEFAULT_TIMEOUT};
pub use executor::{create, exec, exec_async, run, run_async};
pub use handle::{AsyncLines, CommandHandle, Lines};
pub use state::{CommandState, ExecutionModel};
