//! # ConnectionManager Example
//!
//! Keeps a WebSocket connection alive for a minute and prints everything the
//! resilience layer does along the way.
//!
//! ## Features Demonstrated:
//! - Automatic reconnection with exponential backoff and jitter
//! - Heartbeat monitoring and quality grading
//! - Store-and-forward delivery of messages sent while disconnected
//! - Session resumption across restarts through a file-backed store
//! - Graceful shutdown handling
//!
//! Usage: `connection_manager_example [wss://host/path]`

use colored::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use steadylink_rs::connection::{
    ChannelConfig, ConnectionListener, ConnectionManager, DropReason, HeartbeatConfig,
    InboundMessage, QualityGrade, ReconnectionConfig, StatusUpdate,
};
use steadylink_rs::session::FileSessionStore;
use steadylink_rs::transport::wire::Payload;
use steadylink_rs::utils::{setup_logger, setup_signal_hook};

const DEFAULT_TARGET: &str = "wss://echo.websocket.org";

/// Listener that logs every notification with some color
pub struct LoggingListener;

impl ConnectionListener for LoggingListener {
    fn on_status_change(&self, update: &StatusUpdate) {
        info!(
            "🔌 {} -> {} (grade {}, score {}, queued {}, attempts {})",
            update.previous.to_string().dimmed(),
            update.state.to_string().bright_cyan().bold(),
            update.grade,
            update.health_score,
            update.queue_depth,
            update.reconnect_attempts
        );
    }

    fn on_quality_change(&self, grade: QualityGrade, health_score: u8) {
        let label = match grade {
            QualityGrade::Excellent | QualityGrade::Good => grade.to_string().bright_green(),
            QualityGrade::Poor => grade.to_string().bright_yellow(),
            QualityGrade::Critical | QualityGrade::Offline => grade.to_string().bright_red(),
        };
        info!("💓 Quality {} (score {})", label, health_score);
    }

    fn on_message(&self, message: &InboundMessage) {
        info!(
            "📨 seq={:?} session={:?} {}",
            message.seq,
            message.session_id,
            message.payload.to_string().bright_white()
        );
    }

    fn on_message_dropped(&self, payload: &Payload, reason: DropReason) {
        warn!("🗑️  Dropped {} ({})", payload, reason);
    }

    fn on_reconnection_exhausted(&self, attempts: u32) {
        error!(
            "{}",
            format!("❌ Gave up after {attempts} reconnection attempts").bright_red()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logger();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_TARGET.to_string());

    info!(
        "{}",
        "🚀 Starting ConnectionManager Example"
            .bright_magenta()
            .bold()
    );

    let reconnection_config = ReconnectionConfig::default()
        .with_max_attempts(10)
        .with_initial_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .with_backoff_multiplier(1.5)
        .with_jitter_enabled(true);

    let heartbeat_config = HeartbeatConfig::default()
        .with_interval(Duration::from_secs(15))
        .with_timeout(Duration::from_secs(5));

    info!(
        "⚙️  Reconnection config: max_attempts={:?}, initial_delay={}s, max_delay={}s, multiplier={}, jitter={}",
        reconnection_config.max_attempts,
        reconnection_config.initial_delay.as_secs(),
        reconnection_config.max_delay.as_secs(),
        reconnection_config.backoff_multiplier,
        reconnection_config.jitter_enabled
    );

    let config = ChannelConfig::default()
        .reconnection(reconnection_config)
        .heartbeat(heartbeat_config);

    let store = Arc::new(FileSessionStore::new(
        std::env::temp_dir().join("steadylink-demo").join("session.json"),
    ));
    let manager = ConnectionManager::with_websocket(config, store)?;
    let _registration = manager.subscribe(Arc::new(LoggingListener));

    let shutdown_signal = Arc::new(Notify::new());
    setup_signal_hook(Arc::clone(&shutdown_signal))?;

    // Queued until the connection opens, then delivered in order.
    manager.send(json!({"hello": "before connect"})).await?;

    info!("🔌 Connecting to {}", target.bright_cyan());
    manager.connect(target.as_str()).await?;

    info!(
        "{}",
        "   Try disconnecting your network to see recovery in action!".dimmed()
    );

    let mut ticker = interval(Duration::from_secs(5));
    let mut counter = 0u64;
    let deadline = sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = shutdown_signal.notified() => {
                info!("{}", "🛑 Shutdown signal received".bright_yellow());
                break;
            }
            _ = &mut deadline => {
                info!("{}", "⏰ Demo timeout reached".bright_blue());
                break;
            }
            _ = ticker.tick() => {
                counter += 1;
                match manager.send(json!({"tick": counter})).await {
                    Ok(status) => info!("📤 tick {} {:?}", counter, status),
                    Err(e) => warn!("📤 tick {} not accepted: {}", counter, e),
                }
            }
        }
    }

    info!("{}", "🔄 Initiating graceful shutdown...".bright_yellow());
    let diagnostics = manager.diagnostics().await?;
    manager.shutdown().await?;

    let metrics = diagnostics.metrics;
    info!(
        "📊 Final Metrics - Total: {}, Successful reconnections: {}, Failed attempts: {}, Heartbeat failures: {}, Latency: {:?} ms",
        metrics.total_connections.to_string().bright_cyan(),
        metrics.successful_reconnections.to_string().bright_green(),
        metrics.failed_connections.to_string().bright_red(),
        metrics.heartbeat_failures.to_string().bright_yellow(),
        metrics.latency_ms
    );
    if let Some(session) = diagnostics.session {
        info!(
            "💾 Session {:?} resumes after seq {} (client {})",
            session.session_id, session.last_message_seq, session.client_id
        );
    }

    info!(
        "{}",
        "✅ ConnectionManager example completed successfully!"
            .bright_green()
            .bold()
    );
    Ok(())
}
