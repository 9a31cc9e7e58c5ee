use serial_test::serial;
use tracing::level_filters::LevelFilter;

use super::logging;

#[test]
#[serial]
fn test_configured_level_is_the_default() {
    temp_env::with_var_unset("RUST_LOG", || {
        let hint = |level: &str| logging::filter_for(level).max_level_hint();
        assert_eq!(hint("debug"), Some(LevelFilter::DEBUG));
        assert_eq!(hint("WARNING"), Some(LevelFilter::WARN));
        assert_eq!(hint("error"), Some(LevelFilter::ERROR));
        assert_eq!(hint("loud"), Some(LevelFilter::INFO));
    });
}

#[test]
#[serial]
fn test_rust_log_adds_target_directives() {
    temp_env::with_var("RUST_LOG", Some("eventlink::transport=trace"), || {
        let filter = logging::filter_for("warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    });
}

#[test]
#[serial]
fn test_init_can_run_more_than_once() {
    logging::init("info");
    logging::init("debug");
}
