//! Logging - tracing subscriber for the service and CLI
//!
//! Format comes from [`Config::log_format`](crate::Config) (`TIPJAR_LOG_FORMAT`,
//! `--log-format`). Filtering follows `RUST_LOG`, falling back to
//! [`DEFAULT_FILTER`], which keeps dependency noise (hyper, zeromq) out.

use tracing_subscriber::{fmt, EnvFilter};

/// Service and request logs at info, everything else at warn.
pub const DEFAULT_FILTER: &str = "warn,tipjar=info,tower_http=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, for a developer's terminal
    #[default]
    Pretty,
    /// One line per event, for journald and docker logs
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self { LogFormat::Pretty => "pretty", LogFormat::Compact => "compact", LogFormat::Json => "json" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" | "text" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }

    /// Format when none is configured: pretty on a terminal, compact otherwise.
    pub fn for_stderr() -> Self {
        use std::io::IsTerminal;
        if std::io::stderr().is_terminal() { LogFormat::Pretty } else { LogFormat::Compact }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber on stderr. A second call is a no-op.
pub fn init_logging(format: LogFormat) {
    let builder = fmt::Subscriber::builder().with_env_filter(env_filter()).with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(format = format.as_str(), "logging initialized");
    }
}
