//! # steadylink-rs
//!
//! A resilience layer for clients that keep a long-lived, message-oriented duplex
//! connection to a server across unreliable networks: mobile handoffs, sleep and
//! wake, server restarts.
//!
//! ## Features
//!
//! - **Connection lifecycle**: a five-state machine (`DISCONNECTED`, `CONNECTING`,
//!   `OPEN`, `RECOVERING`, `OFFLINE`) driven by one background task
//! - **Liveness detection**: heartbeat probes with round-trip measurement; three
//!   consecutive timeouts mark the connection as dead
//! - **Adaptive reconnection**: exponential backoff with jitter and an attempt
//!   ceiling, bypassed when the network comes back
//! - **Quality scoring**: a 0-100 health score and a discrete grade, with a
//!   preemptive reconnect when quality collapses
//! - **Store and forward**: a bounded FIFO queue for payloads sent while the
//!   connection is down
//! - **Session resumption**: a durable record of the last processed sequence
//!   number, sent to the server on every attempt
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use steadylink_rs::connection::{
//!     ChannelConfig, ChannelConnectionListener, ConnectionEvent, ConnectionManager,
//! };
//! use steadylink_rs::session::FileSessionStore;
//!
//! # async fn example() -> Result<(), steadylink_rs::utils::ChannelError> {
//! let store = Arc::new(FileSessionStore::new("/var/lib/myapp/session.json"));
//! let manager = ConnectionManager::with_websocket(ChannelConfig::default(), store)?;
//!
//! let (listener, mut events) = ChannelConnectionListener::create_channel();
//! let _registration = manager.subscribe(Arc::new(listener));
//!
//! manager.connect("wss://chat.example.com/socket").await?;
//! manager.send(json!({"text": "hello"})).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ConnectionEvent::StatusChanged(update) = event {
//!         println!("{} -> {}", update.previous, update.state);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Every lifecycle step is logged through `tracing`. Binaries can call
//! [`utils::setup_logger`] to install a subscriber whose level comes from the
//! `LOGLEVEL` environment variable.

/// Connection manager, its configuration and its building blocks.
pub mod connection;

/// Store-and-forward queue for outbound payloads.
pub mod queue;

/// Durable session records used to resume after reconnects and restarts.
pub mod session;

/// Transport adapters and the wire codec.
pub mod transport;

/// Errors, logging and signal handling.
pub mod utils;
