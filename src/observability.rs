//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "OVIRT_IMAGER_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset: this crate at info, dependencies
/// (reqwest, hyper) only when they warn.
pub const DEFAULT_LOG_FILTER: &str = "warn,ovirt_imager=info";

/// Target of build progress lines rendered by [`crate::ui::TracingUi`].
///
/// Lets `RUST_LOG=ovirt_imager::progress=off` silence progress while keeping
/// diagnostics, or the reverse.
pub const UI_TARGET: &str = "ovirt_imager::progress";

fn wants_json(value: Option<String>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false)
}

fn env_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize tracing subscriber once for the process.
///
/// Log format defaults to compact text and can be switched to JSON via
/// `OVIRT_IMAGER_LOG_FORMAT=json`. Filter defaults to [`DEFAULT_LOG_FILTER`]
/// if `RUST_LOG` is unset or unparsable.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let env_filter = env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok());
        let json = wants_json(std::env::var(LOG_FORMAT_ENV).ok());

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_target(false))
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

// Installing the global subscriber is exercised in tests/observability.rs,
// which runs in its own process.
#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn json_format_selection() {
        assert!(wants_json(Some("JSON".to_string())));
        assert!(!wants_json(Some("compact".to_string())));
        assert!(!wants_json(None));
    }

    #[test]
    fn default_filter_is_crate_scoped() {
        assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            env_filter(Some("ovirt_imager=debug".to_string())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert!(UI_TARGET.starts_with(env!("CARGO_CRATE_NAME")));
    }
}
