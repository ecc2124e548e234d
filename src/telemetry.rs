//! Telemetry logic.
//! Diagnostics are forwarded to a [`Logger`] using syslog severities.

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Syslog-style severity, `0` being the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

impl Severity {
    /// Numeric level.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Informational,
            7 => Severity::Debug,
            _ => return Err(value),
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Emergency => "EMERG",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRIT",
            Severity::Error => "ERR",
            Severity::Warning => "WARN",
            Severity::Notice => "NOTICE",
            Severity::Informational => "INFO",
            Severity::Debug => "DEBUG",
        };
        f.write_str(name)
    }
}

/// Log sink.
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Forwards messages to [`tracing`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, message: &str) {
        let level = severity.level();
        match severity {
            Severity::Emergency
            | Severity::Alert
            | Severity::Critical
            | Severity::Error => {
                tracing::error!(syslog_level = level, "{message}")
            },
            Severity::Warning => {
                tracing::warn!(syslog_level = level, "{message}")
            },
            Severity::Notice | Severity::Informational => {
                tracing::info!(syslog_level = level, "{message}")
            },
            Severity::Debug => {
                tracing::debug!(syslog_level = level, "{message}")
            },
        }
    }
}

/// Logger gated by the `log_enabled` switch.
#[derive(Clone)]
pub struct ConnectorLog {
    logger: Arc<dyn Logger>,
    enabled: bool,
}

impl ConnectorLog {
    pub fn new(logger: Arc<dyn Logger>, enabled: bool) -> Self {
        Self { logger, enabled }
    }

    pub fn log(&self, severity: Severity, message: impl AsRef<str>) {
        if self.enabled {
            self.logger.log(severity, message.as_ref());
        }
    }

    /// Log at [`Severity::Notice`].
    pub fn notice(&self, message: impl AsRef<str>) {
        self.log(Severity::Notice, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Severity::Warning, message);
    }

    /// Dump a value at [`Severity::Debug`]. Formatting is skipped when
    /// logging is disabled.
    pub fn dump(&self, label: &str, value: &impl fmt::Debug) {
        if self.enabled {
            self.logger
                .log(Severity::Debug, &format!("{label}: {value:#?}"));
        }
    }
}

impl fmt::Debug for ConnectorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorLog")
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
