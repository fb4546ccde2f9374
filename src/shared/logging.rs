use std::fmt::Display;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "TFDISCOVER_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Unknown names fall back to `Info`
    pub fn parse(value: &str) -> LogLevel {
        match value.trim().to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(level: LogLevel) -> String {
    format!("tfdiscover={}", level)
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// reserved for the report.
pub fn init() {
    let level = std::env::var(LOG_LEVEL_ENV)
        .map(|value| LogLevel::parse(&value))
        .unwrap_or(LogLevel::Info);

    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
