//! stderr logging for the `nox-logger` binary.

use std::env;
use std::sync::Once;

use log::LevelFilter;

const LOG_ENV: &str = "NOX_LOGGER_LOG";

static INIT: Once = Once::new();

/// First level that parses, in order: the command line, `NOX_LOGGER_LOG`, `RUST_LOG`.
/// Falls back to `info`.
fn resolve_level(cli: Option<&str>) -> LevelFilter {
    let candidates = [
        cli.map(str::to_owned),
        env::var(LOG_ENV).ok(),
        env::var("RUST_LOG").ok(),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|value| value.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. Later calls are ignored.
pub fn init_logging(level: Option<&str>) {
    let level = resolve_level(level);
    INIT.call_once(|| {
        env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_level_wins() {
        assert_eq!(resolve_level(Some("debug")), LevelFilter::Debug);
        assert_eq!(resolve_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(resolve_level(Some(" off ")), LevelFilter::Off);
    }

    #[test]
    fn unknown_level_falls_through() {
        assert_eq!(resolve_level(Some("loud")), resolve_level(None));
    }
}
