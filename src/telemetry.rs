//! Tracing subscriber setup for the binaries.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Fallback filter variable consulted when `RUST_LOG` is unset.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Output format switch; `json` selects structured JSON lines.
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        /// Directive that was rejected.
        directive: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Interprets a `LOG_FORMAT` value; anything but `json` selects text.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Picks the filter directive: `RUST_LOG`, then `LOG_LEVEL`, then `info`.
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .into_iter()
        .chain(log_level)
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Installs the global subscriber from the process environment.
///
/// # Errors
///
/// Returns [`TelemetryError`] for an unparsable filter or when a subscriber
/// is already installed.
pub fn init_tracing() -> Result<(), TelemetryError> {
    let directive = filter_directive(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        std::env::var(ENV_LOG_LEVEL).ok(),
    );
    let filter = EnvFilter::try_new(&directive)
        .map_err(|source| TelemetryError::Filter { directive, source })?;
    let format = LogFormat::parse(std::env::var(ENV_LOG_FORMAT).ok().as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init()?,
    }
    Ok(())
}
