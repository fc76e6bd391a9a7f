//! Tracing setup for the `evalrun` binary.
//!
//! [`init_tracing`] installs the global subscriber once; later calls are
//! ignored because a process can only have one global subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that forces JSON log lines when set to `json`.
pub const LOG_FORMAT_ENV: &str = "EVALRUN_LOG_FORMAT";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Pick the format from a CLI flag, falling back to [`LOG_FORMAT_ENV`].
    pub fn resolve(json_flag: bool, env_value: Option<&str>) -> Self {
        if json_flag || env_value.is_some_and(|v| v.eq_ignore_ascii_case("json")) {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Run and metric
/// lifecycle events come from [`crate::obs`]; this only decides where they go.
pub fn init_tracing(json: bool, level: Level) {
    let env_format = std::env::var(LOG_FORMAT_ENV).ok();
    let format = LogFormat::resolve(json, env_format.as_deref());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(false).json())
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
