// src/logging.rs

use std::io::Write;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Install the global logger.
///
/// Level precedence: `level` argument, then `RUST_LOG`, then `info`. Calling this twice is
/// harmless; the second call is ignored.
pub fn init_logging(level: Option<&str>) {
    let log_level = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| {
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|v| v.parse::<LevelFilter>().ok())
        })
        .unwrap_or(LevelFilter::Info);

    let result = Builder::new()
        .filter_level(log_level)
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:5} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if result.is_ok() {
        log::debug!("logger initialized (level: {log_level})");
    }
}
