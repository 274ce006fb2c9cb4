//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a binary target at `level`.
///
/// `"catwaf_daemon"` + `"debug"` becomes `"catwaf_daemon=debug"`.
pub fn default_filter(target: &str, level: &str) -> String {
    format!("{target}={level}")
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. With `log_json` the
/// subscriber emits one JSON object per event for log aggregation.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_joins_target_and_level() {
        assert_eq!(default_filter("catwaf_daemon", "warn"), "catwaf_daemon=warn");
    }
}
