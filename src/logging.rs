//! Tracing setup
//!
//! Structured logging for the testbed built on `tracing` and `tracing-subscriber`:
//! - console output in pretty, compact or JSON form
//! - `RUST_LOG` style filtering, falling back to the configured level
//! - an optional plain-text log file, written next to experiment data
//!
//! # Example
//! ```no_run
//! use hcit_daq::{config::TestbedConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TestbedConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(testbed = %config.application.name, "Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::{LogFormat, TestbedConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Console output format
    pub format: LogFormat,
    /// Whether to include span events (NEW, CLOSE)
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (pretty format only)
    pub with_ansi: bool,
    /// Append log lines to this file as well
    pub log_file: Option<PathBuf>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
            log_file: None,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the testbed configuration
    pub fn from_testbed_config(config: &TestbedConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Pretty console output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Console format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Log span close events with their durations.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Colored console output.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Also log to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Initialize tracing from the testbed configuration
pub fn init_from_config(config: &TestbedConfig) -> Result<(), String> {
    init(TracingConfig::from_testbed_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns `Ok(())`,
/// which keeps it safe to call from tests and from every experiment entry point.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console: BoxedLayer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .boxed(),
    };

    let mut layers: Vec<BoxedLayer> = vec![console];
    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create log directory: {}", e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}
