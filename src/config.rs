//! Configuration management for shell-exec.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::execution::{CommandConfig, DEFAULT_TIMEOUT};

/// Binary settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Command defaults.
    pub command: CommandSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Defaults applied to every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSection {
    /// Timeout in seconds; zero disables it.
    pub timeout_secs: f64,
    /// Output encoding label; detected when unset.
    pub encoding: Option<String>,
    /// Fail when the command writes to stderr.
    pub raise_on_stderr: bool,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            encoding: None,
            raise_on_stderr: true,
            working_dir: None,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Accept only values that fit a [`Duration`].
fn check_timeout(secs: f64) -> Result<f64, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map(|_| secs)
        .map_err(|_| ConfigError::InvalidTimeout(secs.to_string()))
}

fn parse_timeout(value: &str) -> Result<f64, ConfigError> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidTimeout(value.to_string()))?;
    check_timeout(secs)
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let settings: Self = serde_json::from_str(&content).map_err(ConfigError::Json)?;
        check_timeout(settings.command.timeout_secs)?;
        Ok(settings)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup (for testing).
    pub fn apply_env_from<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = var("SHELL_EXEC_TIMEOUT") {
            self.command.timeout_secs = parse_timeout(&timeout)?;
        }

        if let Some(encoding) = var("SHELL_EXEC_ENCODING") {
            if !encoding.is_empty() {
                self.command.encoding = Some(encoding);
            }
        }

        if let Some(level) = var("SHELL_EXEC_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(secs) = args.timeout_secs {
            self.command.timeout_secs = check_timeout(secs)?;
        }

        if let Some(ref encoding) = args.encoding {
            self.command.encoding = Some(encoding.clone());
        }

        if args.no_raise {
            self.command.raise_on_stderr = false;
        }

        if let Some(ref dir) = args.cwd {
            self.command.working_dir = Some(dir.clone());
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        Ok(())
    }

    /// Load settings with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut settings = match args.config {
            Some(ref path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env()?;
        settings.apply_args(args)?;
        Ok(settings)
    }

    /// The configured timeout, `None` when disabled or out of range.
    pub fn timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.command.timeout_secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
    }

    /// Build the configuration for one command.
    pub fn to_command_config(&self, command_line: impl Into<String>) -> CommandConfig {
        let mut config = CommandConfig::new(command_line).raise_on_stderr(self.command.raise_on_stderr);
        config = match self.timeout() {
            Some(timeout) => config.timeout(timeout),
            None => config.without_timeout(),
        };
        if let Some(ref encoding) = self.command.encoding {
            config = config.encoding(encoding.clone());
        }
        if let Some(ref dir) = self.command.working_dir {
            config = config.working_dir(dir.clone());
        }
        config
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Timeout that is negative, not a number, or too large.
    InvalidTimeout(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidTimeout(value) => write!(f, "invalid timeout: {}", value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.timeout(), Some(DEFAULT_TIMEOUT));
        assert!(settings.command.raise_on_stderr);
        assert!(settings.command.encoding.is_none());
        assert_eq!(settings.log_filter(), "warn");
    }

    #[test]
    fn test_settings_from_json() {
        let json = r#"{
            "command": {
                "timeout_secs": 2.5,
                "encoding": "windows-1252",
                "raise_on_stderr": false
            },
            "logging": { "level": "debug" }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(settings.command.encoding.as_deref(), Some("windows-1252"));
        assert!(!settings.command.raise_on_stderr);
        assert_eq!(settings.log_filter(), "debug");
    }

    #[test]
    fn test_settings_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "command": { "timeout_secs": 0 } }"#).unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.timeout(), None);
        assert!(settings.command.raise_on_stderr); // Default
    }

    #[test]
    fn test_settings_negative_timeout_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "command": { "timeout_secs": -3 } }"#).unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env_from(env(&[
                ("SHELL_EXEC_TIMEOUT", "7"),
                ("SHELL_EXEC_ENCODING", "shift_jis"),
                ("RUST_LOG", "trace"),
            ]))
            .unwrap();
        assert_eq!(settings.timeout(), Some(Duration::from_secs(7)));
        assert_eq!(settings.command.encoding.as_deref(), Some("shift_jis"));
        assert_eq!(settings.log_filter(), "trace");
    }

    #[test]
    fn test_env_log_level_beats_rust_log() {
        let mut settings = Settings::default();
        settings
            .apply_env_from(env(&[("SHELL_EXEC_LOG_LEVEL", "info"), ("RUST_LOG", "trace")]))
            .unwrap();
        assert_eq!(settings.log_filter(), "info");
    }

    #[test]
    fn test_settings_huge_timeout_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "command": { "timeout_secs": 1e20 } }"#).unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_env_huge_timeout_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_env_from(env(&[("SHELL_EXEC_TIMEOUT", "1e20")]));
        assert!(matches!(result, Err(ConfigError::InvalidTimeout(_))));
        assert_eq!(settings.timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_apply_args_huge_timeout_rejected() {
        let mut settings = Settings::default();
        let args = Args {
            timeout_secs: Some(1e20),
            ..Args::default()
        };
        assert!(matches!(
            settings.apply_args(&args),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_out_of_range_timeout_never_panics() {
        let mut settings = Settings::default();
        for secs in [1e20, f64::INFINITY, f64::NAN, -1.0] {
            settings.command.timeout_secs = secs;
            assert_eq!(settings.timeout(), None);
            assert_eq!(settings.to_command_config("true").timeout, None);
        }
    }

    #[test]
    fn test_env_invalid_timeout() {
        let mut settings = Settings::default();
        let result = settings.apply_env_from(env(&[("SHELL_EXEC_TIMEOUT", "later")]));
        assert!(matches!(result, Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_apply_args() {
        let mut settings = Settings::default();
        let args = Args {
            timeout_secs: Some(0.0),
            encoding: Some("utf-16le".to_string()),
            no_raise: true,
            cwd: Some(PathBuf::from("/tmp")),
            log_level: Some("debug".to_string()),
            ..Args::default()
        };

        settings.apply_args(&args).unwrap();

        assert_eq!(settings.timeout(), None);
        assert_eq!(settings.command.encoding.as_deref(), Some("utf-16le"));
        assert!(!settings.command.raise_on_stderr);
        assert_eq!(settings.command.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(settings.log_filter(), "debug");
    }

    #[test]
    fn test_to_command_config() {
        let mut settings = Settings::default();
        settings.command.encoding = Some("utf-8".to_string());
        settings.command.raise_on_stderr = false;

        let config = settings.to_command_config("hostname");
        assert_eq!(config.command_line, "hostname");
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(config.encoding.as_deref(), Some("utf-8"));
        assert!(!config.raise_on_stderr);
        assert!(config.working_dir.is_none());
    }

    #[test]
    fn test_settings_serialization() {
        let json = serde_json::to_string_pretty(&Settings::default()).unwrap();
        assert!(json.contains("\"timeout_secs\""));
        assert!(json.contains("\"level\""));
    }
}
