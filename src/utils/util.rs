use signal_hook::low_level::signal_name;
use signal_hook::{consts::SIGINT, consts::SIGTERM, iterator::Signals};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::info;

use crate::utils::ChannelError;

/// Milliseconds since the Unix epoch, saturating to 0 if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Sets up a signal hook for SIGINT and SIGTERM.
///
/// A dedicated thread waits for the first of those signals, logs its name and wakes
/// every waiter on `shutdown_signal`, so that a binary can `disconnect()` its
/// [`crate::connection::ConnectionManager`] and flush the session checkpoint before
/// exiting.
///
/// # Errors
///
/// Returns [`ChannelError::Config`] if the signal iterator cannot be registered.
pub fn setup_signal_hook(shutdown_signal: Arc<Notify>) -> Result<(), ChannelError> {
    let signals = &[SIGINT, SIGTERM];
    let mut signals_iterator = Signals::new(signals)
        .map_err(|e| ChannelError::Config(format!("failed to register signal hook: {e}")))?;

    std::thread::spawn(move || {
        if let Some(signal) = signals_iterator.forever().next() {
            info!(
                "Received signal: {}",
                signal_name(signal).unwrap_or("unknown")
            );
            shutdown_signal.notify_waiters();
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(unix_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_unix_millis_is_non_decreasing() {
        let first = unix_millis();
        let second = unix_millis();
        assert!(second >= first);
    }
}
