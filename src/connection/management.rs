/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Connection management with automatic recovery.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to a task that owns the
//! connection and every piece of state around it: heartbeat monitor, reconnection
//! strategist, outbound queue, session tracker and metrics. Public calls, transport
//! events and timer firings are all processed by that task one at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::config::ChannelConfig;
use crate::connection::driver::{Command, Driver};
use crate::connection::listener::{ConnectionListener, ListenerHandle, ListenerRegistry};
use crate::connection::metrics::ConnectionMetrics;
use crate::connection::quality::{NetworkClass, QualityGrade};
use crate::session::{MemorySessionStore, SessionRecord, SessionStore};
use crate::transport::wire::Payload;
use crate::transport::{Transport, WebSocketTransport};
use crate::utils::ChannelError;

/// Current state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none wanted, or reconnection gave up
    Disconnected,
    /// First attempt after `connect()` or a scheduled retry is in progress
    Connecting,
    /// Connection is established and usable
    Open,
    /// An established connection was lost and is being restored
    Recovering,
    /// No network, or offline mode is forced
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Recovering => "RECOVERING",
            ConnectionState::Offline => "OFFLINE",
        };
        write!(f, "{name}")
    }
}

/// What happened to a payload handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Written to the open connection
    Sent,
    /// Stored in the outbound queue for a later connection
    Queued,
}

/// Read-only snapshot of the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    /// Connection state
    pub state: ConnectionState,
    /// Quality grade
    pub grade: QualityGrade,
    /// Counters and quality inputs
    pub metrics: ConnectionMetrics,
    /// Pending outbound items
    pub queue_depth: usize,
    /// Whether offline mode is forced
    pub offline_mode: bool,
    /// Last reachability hint
    pub reachable: bool,
    /// Last reported network class
    pub network_class: NetworkClass,
    /// Probe interval in use
    pub heartbeat_interval: Duration,
    /// Whether automatic reconnection gave up
    pub exhausted: bool,
    /// Target of the last `connect()`
    pub target: Option<String>,
    /// Current session record, once loaded
    pub session: Option<SessionRecord>,
}

/// Main connection manager that orchestrates reconnection, heartbeat, queueing and
/// session resumption.
///
/// Must be created inside a tokio runtime. Dropping every clone stops the
/// background task and closes the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    listeners: Arc<ListenerRegistry>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("listeners", &self.listeners)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager using `transport` and `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] for an invalid configuration or when called
    /// outside a tokio runtime.
    pub fn new(
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Config(format!("no tokio runtime: {e}")))?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerRegistry::new());
        let driver = Driver::new(
            config,
            transport,
            store,
            Arc::clone(&listeners),
            commands.downgrade(),
        );
        runtime.spawn(driver.run(receiver));
        info!("Connection manager started");

        Ok(Self {
            commands,
            listeners,
        })
    }

    /// Creates a manager over WebSocket with the given session store.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::new`].
    pub fn with_websocket(
        config: ChannelConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ChannelError> {
        Self::new(config, Arc::new(WebSocketTransport::new()), store)
    }

    /// Creates a manager over WebSocket with default configuration and a session
    /// that only lives as long as the process.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::new`].
    pub fn with_defaults() -> Result<Self, ChannelError> {
        Self::with_websocket(ChannelConfig::default(), Arc::new(MemorySessionStore::new()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ChannelError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ChannelError::ManagerClosed)?;
        response.await.map_err(|_| ChannelError::ManagerClosed)
    }

    /// Starts connecting to `target` and keeps the connection alive until
    /// [`ConnectionManager::disconnect`].
    ///
    /// Calling it again with the same target while a connection is active or being
    /// established is a no-op. While offline the target is remembered and the
    /// connection starts when the network returns.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] when a connection to a different
    /// target is active.
    pub async fn connect(&self, target: impl Into<String>) -> Result<(), ChannelError> {
        let target = target.into();
        debug!("connect({}) requested", target);
        self.request(|reply| Command::Connect { target, reply })
            .await?
    }

    /// Closes the connection and stops reconnecting. Metrics are reset; the
    /// outbound queue is kept. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn disconnect(&self) -> Result<(), ChannelError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Sends `payload` now if the connection is open and nothing is waiting ahead
    /// of it, otherwise queues it. Never waits for the network.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ReconnectionExhausted`] once automatic reconnection
    /// gave up, until `connect()` or `reconnect_now()` is called. Returns
    /// [`ChannelError::Codec`] if the payload cannot be encoded.
    pub async fn send(&self, payload: Payload) -> Result<SendStatus, ChannelError> {
        self.request(|reply| Command::Send { payload, reply })
            .await?
    }

    /// Forces offline mode on or off. While on, no connection is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn set_offline_mode(&self, enabled: bool) -> Result<(), ChannelError> {
        self.request(|reply| Command::SetOfflineMode { enabled, reply })
            .await
    }

    /// Drops the current connection and attempt state and reconnects immediately,
    /// with a fresh backoff episode.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] while offline or when no connection
    /// is wanted.
    pub async fn reconnect_now(&self) -> Result<(), ChannelError> {
        self.request(|reply| Command::ReconnectNow { reply })
            .await?
    }

    /// Registers `listener` after every existing one.
    pub fn subscribe(&self, listener: Arc<dyn ConnectionListener>) -> ListenerHandle {
        self.listeners.register(listener)
    }

    /// Snapshot of the manager's state.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn diagnostics(&self) -> Result<Diagnostics, ChannelError> {
        self.request(|reply| Command::Diagnostics { reply }).await
    }

    /// Gets the current connection state
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn get_connection_state(&self) -> Result<ConnectionState, ChannelError> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Reports whether the platform currently has a network.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn report_reachability(&self, reachable: bool) -> Result<(), ChannelError> {
        self.request(|reply| Command::Reachability {
            reachable,
            reply: Some(reply),
        })
        .await
    }

    /// Follows a reachability feed until either side goes away.
    pub fn watch_reachability(&self, mut feed: watch::Receiver<bool>) -> JoinHandle<()> {
        let commands = self.commands.downgrade();
        tokio::spawn(async move {
            let mut reachable = *feed.borrow_and_update();
            loop {
                let Some(sender) = commands.upgrade() else {
                    break;
                };
                let forwarded = sender.send(Command::Reachability {
                    reachable,
                    reply: None,
                });
                drop(sender);
                if forwarded.is_err() || feed.changed().await.is_err() {
                    break;
                }
                reachable = *feed.borrow_and_update();
            }
            debug!("Reachability watcher stopped");
        })
    }

    /// Reports the class of the current network; metered networks probe less often.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn report_network_class(&self, class: NetworkClass) -> Result<(), ChannelError> {
        self.request(|reply| Command::NetworkClass { class, reply })
            .await
    }

    /// Discards every queued payload without notifying listeners. Returns how many
    /// were discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was shut down.
    pub async fn clear_queue(&self) -> Result<usize, ChannelError> {
        self.request(|reply| Command::ClearQueue { reply }).await
    }

    /// Destroys the session record, in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the store cannot be cleared.
    pub async fn forget_session(&self) -> Result<(), ChannelError> {
        self.request(|reply| Command::ForgetSession { reply })
            .await?
    }

    /// Disconnects and stops the background task. Every later call fails with
    /// [`ChannelError::ManagerClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ManagerClosed`] if the manager was already shut down.
    pub async fn shutdown(&self) -> Result<(), ChannelError> {
        info!("Shutting down connection manager");
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
