//! Environment-variable configuration loading.
//!
//! Mirrors `spr_adbi.dispatcher.adbi_dispatcher.create_dispatcher`'s behavior of
//! collecting every missing required variable and failing once with all of them
//! listed, rather than clap's usual one-complaint-at-a-time behavior (§7).

use clap::ValueEnum;
use std::env;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("{}", .0.join("\n"))]
pub struct ConfigError(Vec<String>);

/// Minimum log level to emit, loaded from `ADBI_LOG_LEVEL` (default `info`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(LogLevel::Critical),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unrecognized log level {other:?}")),
        }
    }
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => slog::Level::Critical,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Trace => slog::Level::Trace,
        }
    }
}

/// Accumulates configuration problems across several environment variables so callers
/// can report every missing one at once, instead of stopping at the first.
#[derive(Default)]
pub struct EnvLoader {
    errors: Vec<String>,
}

impl EnvLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a required environment variable, recording an error if it's absent.
    pub fn require(&mut self, name: &str) -> Option<String> {
        match env::var(name) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                self.errors
                    .push(format!("Please specify {name} by the {name} environment variable."));
                None
            }
        }
    }

    /// Records an arbitrary validation error against the accumulated message, for
    /// checks that don't fit `require`/`optional_parsed` (e.g. a numeric range).
    pub fn reject(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Reads an optional environment variable.
    pub fn optional(&self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }

    /// Reads an optional environment variable, parsing it and falling back to
    /// `default` when absent. A present-but-unparseable value is recorded as an error.
    pub fn optional_parsed<T>(&mut self, name: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    self.errors.push(format!("{name} is set to {raw:?}, which is invalid: {e}"));
                    default
                }
            },
        }
    }

    /// Consumes the loader, returning every collected error joined into one message,
    /// or `Ok(())` if none were recorded.
    pub fn finish(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_multiple_missing_variables_into_one_message() {
        // Use names that are exceedingly unlikely to be set in any test environment.
        let mut loader = EnvLoader::new();
        loader.require("ADBI_TEST_UNSET_VAR_ONE");
        loader.require("ADBI_TEST_UNSET_VAR_TWO");
        let err = loader.finish().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ADBI_TEST_UNSET_VAR_ONE"));
        assert!(message.contains("ADBI_TEST_UNSET_VAR_TWO"));
        assert_eq!(message.lines().count(), 2);
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("bogus".parse::<LogLevel>().is_err());
    }
}
