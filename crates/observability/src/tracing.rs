//! Tracing/logging initialization.
//!
//! Pipeline spans carry `invoice_id`, `shipment_id` and `correlation_id`
//! fields; JSON output keeps them as structured keys.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    /// Human-readable, for local runs.
    Pretty,
}

/// Initialize JSON tracing, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::Json, DEFAULT_FILTER);
}

/// Initialize tracing with an explicit format; `RUST_LOG` still wins over
/// `default_filter` when set.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_with(format: LogFormat, default_filter: &str) -> bool {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_filter);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}

/// Filter from `directives` when they parse, otherwise from `default_filter`.
fn build_filter(directives: Option<&str>, default_filter: &str) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_filter_on_bad_directives() {
        let filter = build_filter(Some("movebill=notalevel"), "warn");
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn uses_directives_when_valid() {
        let filter = build_filter(Some("movebill_infra=debug"), "info");
        assert_eq!(filter.to_string(), "movebill_infra=debug");
    }

    #[test]
    fn second_init_is_a_no_op() {
        init_with(LogFormat::Pretty, DEFAULT_FILTER);
        assert!(!init_with(LogFormat::Json, DEFAULT_FILTER));
    }
}
