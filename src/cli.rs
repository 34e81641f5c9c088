//! Command-line interface for shell-exec.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Command line to run. Trailing positionals are joined with spaces.
    pub command: Option<String>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Timeout in seconds; zero disables it.
    pub timeout_secs: Option<f64>,
    /// Output encoding label.
    pub encoding: Option<String>,
    /// Print stderr output instead of failing on it.
    pub no_raise: bool,
    /// Stream output line by line.
    pub lines: bool,
    /// Use the suspend-on-I/O execution model.
    pub use_async: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut words: Vec<String> = Vec::new();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: f64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout", value.clone()))?;
                if Duration::try_from_secs_f64(secs).is_err() {
                    return Err(ArgsError::InvalidValue("timeout", value));
                }
                result.timeout_secs = Some(secs);
            }
            Short('e') | Long("encoding") => {
                result.encoding = Some(parser.value()?.parse()?);
            }
            Long("no-raise") => {
                result.no_raise = true;
            }
            Long("lines") => {
                result.lines = true;
            }
            Long("async") => {
                result.use_async = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                words.push(val.string()?);
                for rest in parser.raw_args()? {
                    words.push(
                        rest.into_string()
                            .map_err(|s| ArgsError::UnexpectedArgument(s.to_string_lossy().into()))?,
                    );
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    if !words.is_empty() {
        result.command = Some(words.join(" "));
    }
    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-exec {version}
Run a shell command with a timeout and print its output

USAGE:
    shell-exec [OPTIONS] <COMMAND>...

OPTIONS:
    -C, --cwd <DIR>         Working directory for the command
    -t, --timeout <SECS>    Timeout in seconds, 0 disables [default: 60]
    -e, --encoding <LABEL>  Output encoding (detected when omitted)
        --no-raise          Print stderr output instead of failing on it
        --lines             Stream output line by line
        --async             Use the suspend-on-I/O execution model
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELL_EXEC_TIMEOUT      Timeout in seconds (overrides config)
    SHELL_EXEC_ENCODING     Output encoding (overrides config)
    SHELL_EXEC_LOG_LEVEL    Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    0    Command produced its output
    1    Command failed or wrote to stderr
    124  Command timed out

EXAMPLES:
    # Print the hostname
    shell-exec hostname

    # Stream a long listing, giving up after 5 seconds
    shell-exec -t 5 --lines 'ls -la /usr/lib'

    # Decode legacy output
    shell-exec -e windows-1252 'cat legacy.txt'
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-exec {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Argument that is not valid UTF-8.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
