//! Tracing initialisation for test binaries
//!
//! Text output by default; `ODH_LOG_FORMAT=json` switches to JSON lines for CI
//! log collectors. `RUST_LOG` overrides the default filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,odh_e2e=debug,kube=warn,hyper=warn,tower=warn";

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "ODH_LOG_FORMAT";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single line output
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Read the format from the environment, text when unset or unknown
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global subscriber.
///
/// Safe to call from every test: once a subscriber is installed further calls
/// are no-ops.
pub fn init_tracing() {
    init_tracing_with(LogFormat::from_env());
}

/// Install the global subscriber with an explicit format
pub fn init_tracing_with(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_test_writer())
            .try_init(),
    };
}
