//! Logging setup.
//!
//! The configured level (`logging.level`) is the default for every target.
//! `RUST_LOG`, when set, adds per-target directives on top of it, e.g.
//! `RUST_LOG=eventlink::transport=trace`.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .try_init();
}

/// Build the filter for `level` plus whatever `RUST_LOG` holds.
/// Unknown levels fall back to `info`.
pub fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy()
}

fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "warning" => LevelFilter::WARN,
        other => other.parse().unwrap_or(LevelFilter::INFO),
    }
}
