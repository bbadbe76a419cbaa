/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::management::ConnectionState;
use crate::connection::quality::QualityGrade;
use crate::transport::wire::Payload;

/// Snapshot pushed to listeners on every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// State after the transition
    pub state: ConnectionState,
    /// State before the transition
    pub previous: ConnectionState,
    /// Current quality grade
    pub grade: QualityGrade,
    /// Current health score
    pub health_score: u8,
    /// Whether offline mode is forced by the application
    pub offline_mode: bool,
    /// Reconnection attempts in the current recovery episode
    pub reconnect_attempts: u32,
    /// Items waiting in the outbound queue
    pub queue_depth: usize,
}

/// An application message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sequence number within the session, if the server assigns one
    pub seq: Option<u64>,
    /// Session the message belongs to
    pub session_id: Option<String>,
    /// Application payload
    pub payload: Payload,
}

/// Why a queued payload was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted to make room for a newer item
    QueueOverflow,
    /// Failed to send too many times
    RetryLimitExceeded,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::QueueOverflow => write!(f, "queue overflow"),
            DropReason::RetryLimitExceeded => write!(f, "retry limit exceeded"),
        }
    }
}

/// Interface to be implemented to follow the connection's lifecycle.
///
/// Callbacks run on the manager's task, in registration order, after the
/// transitions that produced them are complete. They must not block. Calling
/// back into the [`crate::connection::ConnectionManager`] from a callback is
/// allowed; the call is processed after the current batch of notifications.
pub trait ConnectionListener: Send + Sync {
    /// Called on every state transition.
    fn on_status_change(&self, _update: &StatusUpdate) {}

    /// Called when the quality grade changes.
    fn on_quality_change(&self, _grade: QualityGrade, _health_score: u8) {}

    /// Called for each application message received.
    fn on_message(&self, _message: &InboundMessage) {}

    /// Called when a queued payload is dropped and will never be sent.
    fn on_message_dropped(&self, _payload: &Payload, _reason: DropReason) {}

    /// Called when automatic reconnection gives up.
    fn on_reconnection_exhausted(&self, _attempts: u32) {}
}

/// Notification produced by the manager, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// See [`ConnectionListener::on_status_change`]
    StatusChanged(StatusUpdate),
    /// See [`ConnectionListener::on_quality_change`]
    QualityChanged {
        /// New grade
        grade: QualityGrade,
        /// Score at the time of the change
        health_score: u8,
    },
    /// See [`ConnectionListener::on_message`]
    Message(InboundMessage),
    /// See [`ConnectionListener::on_message_dropped`]
    MessageDropped {
        /// Payload that will not be sent
        payload: Payload,
        /// Why it was dropped
        reason: DropReason,
    },
    /// See [`ConnectionListener::on_reconnection_exhausted`]
    ReconnectionExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
}

impl ConnectionEvent {
    fn deliver(&self, listener: &dyn ConnectionListener) {
        match self {
            ConnectionEvent::StatusChanged(update) => listener.on_status_change(update),
            ConnectionEvent::QualityChanged {
                grade,
                health_score,
            } => listener.on_quality_change(*grade, *health_score),
            ConnectionEvent::Message(message) => listener.on_message(message),
            ConnectionEvent::MessageDropped { payload, reason } => {
                listener.on_message_dropped(payload, *reason)
            }
            ConnectionEvent::ReconnectionExhausted { attempts } => {
                listener.on_reconnection_exhausted(*attempts)
            }
        }
    }
}

type Entries = Mutex<Vec<(u64, Arc<dyn ConnectionListener>)>>;

/// Ordered set of registered listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Arc<Entries>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` after every existing one.
    pub fn register(&self, listener: Arc<dyn ConnectionListener>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock_entries(&self.entries).push((id, listener));
        debug!("Listener {} registered", id);
        ListenerHandle {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener registered at the time of the call.
    ///
    /// The list is copied first, so listeners may unsubscribe (themselves or
    /// others) from inside a callback.
    pub fn dispatch(&self, event: &ConnectionEvent) {
        let snapshot: Vec<Arc<dyn ConnectionListener>> = lock_entries(&self.entries)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            event.deliver(listener.as_ref());
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

fn lock_entries(entries: &Entries) -> std::sync::MutexGuard<'_, Vec<(u64, Arc<dyn ConnectionListener>)>> {
    entries.lock().unwrap_or_else(|poisoned| {
        warn!("Listener registry mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Registration returned by [`crate::connection::ConnectionManager::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`ListenerHandle::unsubscribe`].
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    entries: Weak<Entries>,
}

impl ListenerHandle {
    /// Identifier of the registration.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. Calling it again, or after the manager is gone, is a
    /// no-op.
    pub fn unsubscribe(&self) {
        if let Some(entries) = self.entries.upgrade() {
            let mut entries = lock_entries(&entries);
            let before = entries.len();
            entries.retain(|(id, _)| *id != self.id);
            if entries.len() != before {
                debug!("Listener {} unsubscribed", self.id);
            }
        }
    }
}

/// Listener that forwards every notification to an unbounded channel.
///
/// # Examples
///
/// ```
/// use steadylink_rs::connection::{ChannelConnectionListener, ConnectionEvent};
///
/// let (listener, mut rx) = ChannelConnectionListener::create_channel();
/// // manager.subscribe(std::sync::Arc::new(listener));
/// # drop(listener);
/// # assert!(rx.try_recv().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConnectionListener {
    sender: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelConnectionListener {
    /// Creates a listener forwarding to `sender`.
    pub fn new(sender: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { sender }
    }

    /// Creates a listener together with the receiving end of its channel.
    pub fn create_channel() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        if self.sender.send(event).is_err() {
            debug!("Connection event receiver dropped");
        }
    }
}

impl ConnectionListener for ChannelConnectionListener {
    fn on_status_change(&self, update: &StatusUpdate) {
        self.forward(ConnectionEvent::StatusChanged(update.clone()));
    }

    fn on_quality_change(&self, grade: QualityGrade, health_score: u8) {
        self.forward(ConnectionEvent::QualityChanged {
            grade,
            health_score,
        });
    }

    fn on_message(&self, message: &InboundMessage) {
        self.forward(ConnectionEvent::Message(message.clone()));
    }

    fn on_message_dropped(&self, payload: &Payload, reason: DropReason) {
        self.forward(ConnectionEvent::MessageDropped {
            payload: payload.clone(),
            reason,
        });
    }

    fn on_reconnection_exhausted(&self, attempts: u32) {
        self.forward(ConnectionEvent::ReconnectionExhausted { attempts });
    }
}
