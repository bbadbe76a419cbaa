/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/
use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

/// Environment variable read by [`setup_logger`].
pub const LOG_LEVEL_ENV: &str = "LOGLEVEL";

fn level_from_str(value: &str) -> Level {
    match value.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Installs a global `tracing` subscriber, reading the level from `LOGLEVEL`.
///
/// Defaults to `INFO` when the variable is unset or unrecognised. Calling this more
/// than once is harmless; only the first call installs a subscriber.
pub fn setup_logger() {
    let level = env::var(LOG_LEVEL_ENV)
        .map(|value| level_from_str(&value))
        .unwrap_or(Level::INFO);
    setup_logger_with_level(level);
}

/// Installs a global `tracing` subscriber with an explicit maximum level.
pub fn setup_logger_with_level(level: Level) {
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!("Log level set to: {}", level);
        }
    });
}
