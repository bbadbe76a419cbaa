use colored::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use steadylink_rs::connection::{
    ChannelConnectionListener, ConnectionEvent, ConnectionManager,
};
use steadylink_rs::utils::{setup_logger, setup_signal_hook};
use tokio::sync::Notify;
use tracing::{info, warn};

const TARGET: &str = "wss://echo.websocket.org";

/// Example demonstrating channel-based event processing.
///
/// This example shows how to use `ChannelConnectionListener` to receive
/// connection events through a tokio channel, processing them in a separate
/// task while the main task keeps sending.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logger();

    info!(
        "{}",
        "🚀 Starting Channel-based Listener Example"
            .bright_green()
            .bold()
    );

    let manager = ConnectionManager::with_defaults()?;
    let (listener, mut events) = ChannelConnectionListener::create_channel();
    let registration = manager.subscribe(Arc::new(listener));

    let processor_handle = tokio::spawn(async move {
        info!("{}", "📡 Event processor task started".bright_cyan());
        let mut messages = 0u64;
        let mut transitions = 0u64;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::StatusChanged(update) => {
                    transitions += 1;
                    info!("🔌 {} -> {}", update.previous, update.state);
                }
                ConnectionEvent::Message(message) => {
                    messages += 1;
                    info!("📨 #{} {}", messages, message.payload);
                }
                ConnectionEvent::QualityChanged {
                    grade,
                    health_score,
                } => info!("💓 {} ({})", grade, health_score),
                ConnectionEvent::MessageDropped { payload, reason } => {
                    warn!("🗑️  {} dropped: {}", payload, reason)
                }
                ConnectionEvent::ReconnectionExhausted { attempts } => {
                    warn!("❌ exhausted after {} attempts", attempts)
                }
            }
        }

        info!(
            "{}",
            format!("📈 Final Stats: {messages} messages, {transitions} transitions")
                .bright_yellow()
        );
    });

    let shutdown_signal = Arc::new(Notify::new());
    setup_signal_hook(Arc::clone(&shutdown_signal))?;

    manager.connect(TARGET).await?;
    for n in 0..5 {
        manager.send(json!({"n": n})).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    tokio::select! {
        _ = shutdown_signal.notified() => info!("{}", "🛑 Shutdown signal received".bright_yellow()),
        _ = tokio::time::sleep(Duration::from_secs(20)) => {}
    }

    manager.disconnect().await?;
    // Dropping the listener closes the channel and ends the processor.
    registration.unsubscribe();
    let _ = processor_handle.await;
    manager.shutdown().await?;
    Ok(())
}
