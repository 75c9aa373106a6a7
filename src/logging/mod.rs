//! Logging setup for raseen-vault
//!
//! `RUST_LOG` wins when set; otherwise the crate logs at `LOG_LEVEL` and
//! dependencies at `info`. `LOG_FORMAT=json` switches to one JSON object per
//! line for log shippers.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter directive used when `RUST_LOG` is absent
pub fn default_directive(log_level: &str) -> String {
    format!("raseen_vault={},info", log_level)
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
    }
}
