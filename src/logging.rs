//! Tracing subscriber setup for the `flatbatch` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the application. Logs go to stderr so that stdout stays usable by
//! [`ConsoleSink`](crate::sink::ConsoleSink).
//!
//! `RUST_LOG` directives are honoured on top of the configured level.
//!
//! ```no_run
//! use flatbatch::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::from_env()?)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow!("invalid log level: {s}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow!("invalid log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Extra comma-separated directives, e.g. `flatbatch::pipeline=debug`.
    pub filter_directives: Option<String>,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            filter_directives: None,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `FLATBATCH_LOG_LEVEL`, `FLATBATCH_LOG_FORMAT`
    /// and `FLATBATCH_LOG_FILTER`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unrecognised value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("FLATBATCH_LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Ok(format) = std::env::var("FLATBATCH_LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Ok(filter) = std::env::var("FLATBATCH_LOG_FILTER") {
            config.filter_directives = Some(filter);
        }
        Ok(config)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter =
            EnvFilter::from_default_env().add_directive(self.level.to_tracing_level().into());
        if let Some(directives) = &self.filter_directives {
            for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .trim()
                        .parse()
                        .with_context(|| format!("parse filter directive {directive:?}"))?,
                );
            }
        }
        Ok(filter)
    }
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
///
/// Returns an error for a bad filter directive or if a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .context("install log subscriber")?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
            .context("install log subscriber")?,
    }
    Ok(())
}
