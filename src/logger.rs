use chrono::Local;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Timestamped `env_logger` output. `RUST_LOG` wins over the `info` default.
pub fn init() {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .filter(Some("actix_server"), LevelFilter::Warn)
        .parse_env(Env::default());

    // A second init (tests, embedded use) keeps the first logger.
    if builder.try_init().is_ok() {
        log::info!("Logger initialized.");
    }
}
