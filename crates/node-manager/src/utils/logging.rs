use log::LevelFilter;

pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // "info" and anything unrecognized
        _ => LevelFilter::Info,
    }
}

/// Initializes `env_logger` at `level`. HTTP client internals stay at warn.
pub fn setup_logging(level: &str) {
    let log_level = parse_log_level(level);
    env_logger::Builder::new()
        .filter_level(log_level)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .format_timestamp_millis()
        .init();
    log::debug!("Log level: {log_level}");
}
