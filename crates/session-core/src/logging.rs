//! Logging setup for applications embedding the session
//!
//! Every session actor runs inside a `session` span carrying the session id,
//! so each line it logs names the session it belongs to.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::ConfigError;

/// Target prefix of everything this crate logs
pub const SESSION_TARGET: &str = "peerlink_session_core";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for everything outside this crate
    pub level: Level,
    /// Level for session logs; falls back to `level`
    pub session_level: Option<Level>,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Log one line when a session span closes, with its id and lifetime
    pub session_lifetimes: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            session_level: None,
            json: false,
            file_info: false,
            session_lifetimes: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_session_level(mut self, level: Level) -> Self {
        self.session_level = Some(level);
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_session_lifetimes(mut self) -> Self {
        self.session_lifetimes = true;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        match self.session_level {
            Some(session_level) => format!(
                "{},{}={}",
                level_name(self.level),
                SESSION_TARGET,
                level_name(session_level)
            ),
            None => level_name(self.level).to_string(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.session_lifetimes {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` replaces the configured directives when set. Fails if a global
/// subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<(), ConfigError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(config.directives()),
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(config.span_events())
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::info!(target: SESSION_TARGET, "Session logging enabled ({})", config.directives());
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level, ConfigError> {
    Level::from_str(level).map_err(|_| ConfigError::InvalidLogLevel(level.to_string()))
}
