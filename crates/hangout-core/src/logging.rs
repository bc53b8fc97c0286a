//! Subscriber installation and task spans
//!
//! Library code only emits `tracing` events. Applications call
//! [`setup_logging`] once; tests call [`init_for_tests`], which tolerates an
//! already installed subscriber. Background tasks spawned by signaling and
//! in-process pairing run inside a [`task_span`] so their events carry the
//! peer id and what the task does.

use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::{Level, Span};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Environment variable holding extra filter directives
pub const LOG_ENV: &str = "HANGOUT_LOG";

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "HANGOUT_LOG_FORMAT";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" | "" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!("unknown log format '{}'", other))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for this crate's events
    pub level: Level,
    /// Additional `EnvFilter` directives, e.g. `webrtc=warn`
    pub directives: Vec<String>,
    /// Output format
    pub format: LogFormat,
    /// Include source file and line
    pub file_info: bool,
    /// Log when task spans close, with their busy time
    pub span_timing: bool,
    /// Write through the libtest capture instead of stdout
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            format: LogFormat::default(),
            file_info: false,
            span_timing: false,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    /// Settings at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Settings from `HANGOUT_LOG` and `HANGOUT_LOG_FORMAT`.
    ///
    /// `HANGOUT_LOG` is either a bare level (`debug`) or a comma separated
    /// directive list (`hangout_core=debug,webrtc=warn`).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var(LOG_ENV) {
            config = config.with_filter(&value)?;
        }
        if let Ok(value) = env::var(LOG_FORMAT_ENV) {
            config.format = value.parse()?;
        }
        Ok(config)
    }

    /// Debug output captured per test
    pub fn for_tests() -> Self {
        Self {
            level: Level::DEBUG,
            test_writer: true,
            ..Default::default()
        }
    }

    /// Apply a level or a directive list
    pub fn with_filter(mut self, filter: &str) -> Result<Self> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Ok(self);
        }
        if let Ok(level) = parse_log_level(filter) {
            self.level = level;
            return Ok(self);
        }
        for directive in filter.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            directive
                .parse::<tracing_subscriber::filter::Directive>()
                .map_err(|e| Error::config(format!("invalid log directive '{}': {}", directive, e)))?;
            self.directives.push(directive.to_string());
        }
        Ok(self)
    }

    /// Output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Include source file and line
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Log task span timings on close
    pub fn with_span_timing(mut self) -> Self {
        self.span_timing = true;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let level = self.level.to_string().to_ascii_lowercase();
        let mut filter = EnvFilter::new(format!("warn,hangout_core={}", level));
        for directive in &self.directives {
            let directive = directive
                .parse()
                .map_err(|e| Error::config(format!("invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install the global subscriber.
///
/// Fails with a configuration error if a subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = if config.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match (config.format, config.test_writer) {
        (LogFormat::Json, true) => builder.json().with_test_writer().try_init(),
        (LogFormat::Json, false) => builder.json().try_init(),
        (LogFormat::Pretty, true) => builder.pretty().with_test_writer().try_init(),
        (LogFormat::Pretty, false) => builder.pretty().try_init(),
        (LogFormat::Compact, true) => builder.compact().with_test_writer().try_init(),
        (LogFormat::Compact, false) => builder.compact().try_init(),
    };
    installed.map_err(|e| Error::config(format!("failed to install subscriber: {}", e)))?;

    tracing::debug!(version = crate::VERSION, format = %config.format, "logging ready");
    Ok(())
}

/// Install the test subscriber unless one is already present.
///
/// `HANGOUT_LOG` still overrides the level when set.
pub fn init_for_tests() {
    let config = match env::var(LOG_ENV) {
        Ok(value) => LoggingConfig::for_tests()
            .with_filter(&value)
            .unwrap_or_else(|_| LoggingConfig::for_tests()),
        Err(_) => LoggingConfig::for_tests(),
    };
    let _ = setup_logging(config);
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| Error::config(format!("invalid log level '{}'", level)))
}

/// Span for a background task working on behalf of one peer
pub fn task_span(peer: &str, task: &'static str) -> Span {
    tracing::debug_span!("hangout", peer = %peer, task)
}
