//! Shared helpers for the integration tests: a scripted in-memory transport and
//! small utilities around the listener channel.

#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steadylink_rs::connection::{
    ChannelConfig, ChannelConnectionListener, ConnectionEvent, ConnectionManager,
    ConnectionState, ReconnectionConfig,
};
use steadylink_rs::session::{MemorySessionStore, SessionStore};
use steadylink_rs::transport::wire::Frame;
use steadylink_rs::transport::{EventSink, ResumeParams, Transport, TransportEvent, TransportHandle};
use steadylink_rs::utils::ChannelError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

pub const TARGET: &str = "wss://chat.example.com/socket";

/// How the next `open` call behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Accept,
    Reject(&'static str),
    Hang,
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub attempt: u64,
    pub target: String,
    pub resume: ResumeParams,
    pub at: Instant,
}

struct Shared {
    script: VecDeque<OpenBehavior>,
    default: OpenBehavior,
    auto_pong: bool,
    fail_sends: bool,
    opens: Vec<OpenRecord>,
    sinks: Vec<EventSink>,
    sent: Vec<(u64, Frame)>,
    closes: Vec<(u64, u16)>,
}

/// In-memory transport whose open results are scripted by the test.
///
/// Accepted connections answer probes automatically unless `set_auto_pong(false)`.
#[derive(Clone)]
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                script: VecDeque::new(),
                default: OpenBehavior::Accept,
                auto_pong: true,
                fail_sends: false,
                opens: Vec::new(),
                sinks: Vec::new(),
                sent: Vec::new(),
                closes: Vec::new(),
            })),
        }
    }

    pub fn script(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.shared.lock().unwrap().script.extend(behaviors);
    }

    pub fn set_default(&self, behavior: OpenBehavior) {
        self.shared.lock().unwrap().default = behavior;
    }

    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.lock().unwrap().auto_pong = enabled;
    }

    pub fn set_fail_sends(&self, enabled: bool) {
        self.shared.lock().unwrap().fail_sends = enabled;
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.shared.lock().unwrap().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().unwrap().opens.len()
    }

    pub fn frames(&self) -> Vec<(u64, Frame)> {
        self.shared.lock().unwrap().sent.clone()
    }

    /// Application payloads written so far, in order.
    pub fn data_sent(&self) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter_map(|(_, frame)| match frame {
                Frame::Data { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn pings_sent(&self) -> usize {
        self.frames()
            .iter()
            .filter(|(_, frame)| matches!(frame, Frame::Ping { .. }))
            .count()
    }

    pub fn closes(&self) -> Vec<(u64, u16)> {
        self.shared.lock().unwrap().closes.clone()
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.closes().into_iter().map(|(_, code)| code).collect()
    }

    fn sink(&self, index: Option<usize>) -> EventSink {
        let shared = self.shared.lock().unwrap();
        let index = index.unwrap_or(shared.sinks.len() - 1);
        shared.sinks[index].clone()
    }

    /// Emits `event` on the most recent connection.
    pub fn emit(&self, event: TransportEvent) {
        self.sink(None).emit(event);
    }

    /// Emits `event` on the connection opened by the `index`-th call to `open`.
    pub fn emit_on(&self, index: usize, event: TransportEvent) {
        self.sink(Some(index)).emit(event);
    }

    pub fn server_close(&self) {
        self.emit(TransportEvent::Closed {
            code: 1001,
            reason: "server restart".to_string(),
        });
    }

    pub fn server_frame(&self, frame: &Frame) {
        self.emit(TransportEvent::MessageReceived(frame.encode().unwrap()));
    }

    pub fn server_message(&self, session_id: &str, seq: u64, payload: Value) {
        self.server_frame(&Frame::Message {
            seq: Some(seq),
            session_id: Some(session_id.to_string()),
            payload,
        });
    }
}

impl Transport for ScriptedTransport {
    fn open(
        &self,
        target: &str,
        resume: &ResumeParams,
        sink: EventSink,
    ) -> BoxFuture<'static, Result<Box<dyn TransportHandle>, ChannelError>> {
        let attempt = sink.attempt();
        let behavior = {
            let mut shared = self.shared.lock().unwrap();
            shared.opens.push(OpenRecord {
                attempt,
                target: target.to_string(),
                resume: resume.clone(),
                at: Instant::now(),
            });
            shared.sinks.push(sink.clone());
            let default = shared.default.clone();
            shared.script.pop_front().unwrap_or(default)
        };

        match behavior {
            OpenBehavior::Accept => {
                let handle: Box<dyn TransportHandle> = Box::new(ScriptedHandle {
                    attempt,
                    sink,
                    shared: Arc::clone(&self.shared),
                });
                futures_util::future::ready(Ok(handle)).boxed()
            }
            OpenBehavior::Reject(reason) => futures_util::future::ready(Err(
                ChannelError::TransportUnavailable(reason.to_string()),
            ))
            .boxed(),
            OpenBehavior::Hang => futures_util::future::pending().boxed(),
        }
    }
}

struct ScriptedHandle {
    attempt: u64,
    sink: EventSink,
    shared: Arc<Mutex<Shared>>,
}

impl TransportHandle for ScriptedHandle {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), ChannelError> {
        let frame = Frame::decode(&bytes)?;
        let reply = {
            let mut shared = self.shared.lock().unwrap();
            if shared.fail_sends {
                return Err(ChannelError::SendFailed("scripted failure".to_string()));
            }
            shared.sent.push((self.attempt, frame.clone()));
            match frame {
                Frame::Ping { nonce, sent_at_ms } if shared.auto_pong => {
                    Some(Frame::Pong { nonce, sent_at_ms })
                }
                _ => None,
            }
        };
        if let Some(reply) = reply {
            self.sink
                .emit(TransportEvent::MessageReceived(reply.encode()?));
        }
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        self.shared.lock().unwrap().closes.push((self.attempt, code));
    }
}

/// Deterministic defaults: no jitter, everything else as shipped.
pub fn test_config() -> ChannelConfig {
    ChannelConfig::default().reconnection(ReconnectionConfig::default().with_jitter_enabled(false))
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub transport: ScriptedTransport,
    pub store: MemorySessionStore,
    pub events: UnboundedReceiver<ConnectionEvent>,
}

impl Harness {
    pub fn new(config: ChannelConfig) -> Self {
        let transport = ScriptedTransport::new();
        let store = MemorySessionStore::new();
        Self::with_parts(config, transport, Arc::new(store.clone()), store)
    }

    pub fn with_store(config: ChannelConfig, store: Arc<dyn SessionStore>) -> Self {
        Self::with_parts(config, ScriptedTransport::new(), store, MemorySessionStore::new())
    }

    fn with_parts(
        config: ChannelConfig,
        transport: ScriptedTransport,
        store: Arc<dyn SessionStore>,
        view: MemorySessionStore,
    ) -> Self {
        let manager =
            ConnectionManager::new(config, Arc::new(transport.clone()), store).unwrap();
        let (listener, events) = ChannelConnectionListener::create_channel();
        manager.subscribe(Arc::new(listener));
        Self {
            manager,
            transport,
            store: view,
            events,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.manager.get_connection_state().await.unwrap()
    }

    /// Everything listeners received since the last call.
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// States entered since the last call to `take_events`.
    pub fn take_states(&mut self) -> Vec<ConnectionState> {
        states(&self.take_events())
    }
}

pub fn states(events: &[ConnectionEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            ConnectionEvent::StatusChanged(update) => Some(update.state),
            _ => None,
        })
        .collect()
}

/// Lets spawned tasks and queued commands run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
