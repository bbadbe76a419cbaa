/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! The task behind [`crate::connection::ConnectionManager`].
//!
//! Every input is a [`Command`] on one channel and is handled to completion before
//! the next one is read. Listener notifications produced while handling a command
//! are collected and delivered once the command is done, so listeners never observe
//! a half-finished transition.

use std::fmt;
use std::mem;
use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::config::ChannelConfig;
use crate::connection::heartbeat::{HeartbeatMonitor, Probe, TickDecision, TimeoutOutcome};
use crate::connection::listener::{
    ConnectionEvent, DropReason, InboundMessage, ListenerRegistry, StatusUpdate,
};
use crate::connection::management::{ConnectionState, Diagnostics, SendStatus};
use crate::connection::metrics::ConnectionMetrics;
use crate::connection::quality::{
    AssessmentContext, NetworkClass, QualityAssessor, QualityGrade,
};
use crate::connection::reconnect::{ReconnectionStrategist, RetryPlan};
use crate::connection::timer::Timer;
use crate::queue::{OutboundItem, OutboundQueue};
use crate::session::{Observation, SessionStore, SessionTracker};
use crate::transport::wire::{Frame, Payload};
use crate::transport::{EventSink, Transport, TransportEvent, TransportHandle, close_code};
use crate::utils::{ChannelError, unix_millis};

type OpenResult = Result<Box<dyn TransportHandle>, ChannelError>;

/// Inputs of the manager task.
pub(crate) enum Command {
    Connect {
        target: String,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        payload: Payload,
        reply: oneshot::Sender<Result<SendStatus, ChannelError>>,
    },
    SetOfflineMode {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    ReconnectNow {
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Diagnostics {
        reply: oneshot::Sender<Diagnostics>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Reachability {
        reachable: bool,
        reply: Option<oneshot::Sender<()>>,
    },
    NetworkClass {
        class: NetworkClass,
        reply: oneshot::Sender<()>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    ForgetSession {
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    OpenCompleted {
        attempt: u64,
        result: OpenResult,
    },
    Transport {
        attempt: u64,
        event: TransportEvent,
    },
    RetryDue {
        generation: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
    ProbeTimeout {
        generation: u64,
        nonce: u64,
    },
    CheckpointDue {
        generation: u64,
    },
}

/// Why an established connection is being abandoned.
#[derive(Debug, Clone)]
enum DisconnectionReason {
    /// The peer closed the connection
    Closed { code: u16, reason: String },
    /// The transport reported an error
    NetworkError(String),
    /// Probes stopped coming back
    HeartbeatTimeout,
    /// Quality fell below the repair threshold
    PoorQuality,
}

impl fmt::Display for DisconnectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectionReason::Closed { code, reason } => {
                write!(f, "closed by peer ({code}): {reason}")
            }
            DisconnectionReason::NetworkError(detail) => write!(f, "network error: {detail}"),
            DisconnectionReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            DisconnectionReason::PoorQuality => write!(f, "poor connection quality"),
        }
    }
}

impl DisconnectionReason {
    /// Code used when closing our side of the connection.
    fn close_code(&self) -> u16 {
        match self {
            DisconnectionReason::Closed { .. } | DisconnectionReason::NetworkError(_) => {
                close_code::NORMAL
            }
            DisconnectionReason::HeartbeatTimeout => close_code::SUSPECTED_DEAD,
            DisconnectionReason::PoorQuality => close_code::PREEMPTIVE_RECONNECT,
        }
    }
}

pub(crate) struct Driver {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerRegistry>,
    commands: WeakUnboundedSender<Command>,
    epoch: Instant,

    state: ConnectionState,
    target: Option<String>,
    wants_connection: bool,
    offline_mode: bool,
    reachable: bool,
    /// Attempts made before the strategist gave up
    exhausted: Option<u32>,
    network_class: NetworkClass,
    grade: QualityGrade,

    metrics: ConnectionMetrics,
    heartbeat: HeartbeatMonitor,
    strategist: ReconnectionStrategist,
    queue: OutboundQueue,
    session: SessionTracker,

    handle: Option<Box<dyn TransportHandle>>,
    attempt: u64,
    pending_open: Option<JoinHandle<()>>,
    early_events: Vec<TransportEvent>,
    verified: bool,

    retry_timer: Timer,
    heartbeat_timer: Timer,
    probe_timer: Timer,
    checkpoint_timer: Timer,

    outbox: Vec<ConnectionEvent>,
}

impl Driver {
    pub(crate) fn new(
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        listeners: Arc<ListenerRegistry>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            metrics: ConnectionMetrics::new(config.latency_window),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            strategist: ReconnectionStrategist::new(config.reconnection.clone()),
            queue: OutboundQueue::new(&config.queue),
            session: SessionTracker::new(store),
            config,
            transport,
            listeners,
            commands,
            epoch: Instant::now(),
            state: ConnectionState::Disconnected,
            target: None,
            wants_connection: false,
            offline_mode: false,
            reachable: true,
            exhausted: None,
            network_class: NetworkClass::Unmetered,
            grade: QualityGrade::Excellent,
            handle: None,
            attempt: 0,
            pending_open: None,
            early_events: Vec::new(),
            verified: false,
            retry_timer: Timer::new(),
            heartbeat_timer: Timer::new(),
            probe_timer: Timer::new(),
            checkpoint_timer: Timer::new(),
            outbox: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            let stop = self.handle_command(command);
            self.flush();
            if stop {
                break;
            }
        }
        commands.close();
        self.stop();
        self.flush();
        debug!("Connection manager task stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { target, reply } => {
                let _ = reply.send(self.connect(target));
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send { payload, reply } => {
                let _ = reply.send(self.send(payload));
            }
            Command::SetOfflineMode { enabled, reply } => {
                self.set_offline_mode(enabled);
                let _ = reply.send(());
            }
            Command::ReconnectNow { reply } => {
                let _ = reply.send(self.reconnect_now());
            }
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Reachability { reachable, reply } => {
                self.set_reachability(reachable);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::NetworkClass { class, reply } => {
                self.set_network_class(class);
                let _ = reply.send(());
            }
            Command::ClearQueue { reply } => {
                let cleared = self.queue.clear();
                info!("Cleared {} queued items", cleared);
                let _ = reply.send(cleared);
            }
            Command::ForgetSession { reply } => {
                let _ = reply.send(self.session.forget());
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return true;
            }
            Command::OpenCompleted { attempt, result } => self.on_open_completed(attempt, result),
            Command::Transport { attempt, event } => self.on_transport_event(attempt, event),
            Command::RetryDue { generation } => {
                if self.retry_timer.accept(generation) {
                    self.on_retry_due();
                }
            }
            Command::HeartbeatTick { generation } => {
                if self.heartbeat_timer.accept(generation) {
                    self.on_heartbeat_tick();
                }
            }
            Command::ProbeTimeout { generation, nonce } => {
                if self.probe_timer.accept(generation) {
                    self.on_probe_timeout(nonce);
                }
            }
            Command::CheckpointDue { generation } => {
                if self.checkpoint_timer.accept(generation) {
                    self.checkpoint();
                    if self.handle.is_some() {
                        self.schedule_checkpoint();
                    }
                }
            }
        }
        false
    }

    fn flush(&mut self) {
        for event in mem::take(&mut self.outbox) {
            self.listeners.dispatch(&event);
        }
    }

    // ----- public operations -------------------------------------------------

    fn connect(&mut self, target: String) -> Result<(), ChannelError> {
        let active = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Recovering
        );
        if active {
            if self.target.as_deref() == Some(target.as_str()) {
                debug!("Already connected or connecting to {}", target);
                return Ok(());
            }
            return Err(ChannelError::invalid_state(self.state, "connect"));
        }

        info!("Connecting to {}", target);
        self.target = Some(target);
        self.wants_connection = true;
        self.exhausted = None;
        self.retry_timer.cancel();
        self.strategist.reset();
        self.metrics.reconnect_attempts = 0;

        if self.offline_mode || !self.reachable {
            info!("Network unavailable, connection deferred until it returns");
            self.transition(ConnectionState::Offline);
            return Ok(());
        }
        self.transition(ConnectionState::Connecting);
        self.start_attempt();
        Ok(())
    }

    fn disconnect(&mut self) {
        info!("Disconnect requested");
        self.wants_connection = false;
        self.exhausted = None;
        self.retry_timer.cancel();
        self.drop_connection(close_code::NORMAL, "client disconnect");
        self.strategist.reset();
        self.metrics.reset();
        self.refresh_grade();
        self.transition(ConnectionState::Disconnected);
    }

    fn send(&mut self, payload: Payload) -> Result<SendStatus, ChannelError> {
        if let Some(attempts) = self.exhausted {
            return Err(ChannelError::ReconnectionExhausted { attempts });
        }
        let now = Instant::now();
        let clear_to_send = self.state == ConnectionState::Open && self.queue.is_empty();
        if let (true, Some(handle)) = (clear_to_send, self.handle.as_mut()) {
            let bytes = Frame::Data {
                payload: payload.clone(),
            }
            .encode()?;
            let len = bytes.len();
            match handle.send(bytes) {
                Ok(()) => {
                    self.metrics.record_sent(len, now);
                    return Ok(SendStatus::Sent);
                }
                Err(e) => {
                    warn!("Send failed, queueing payload: {}", e);
                    let item = OutboundItem::new(payload, now);
                    if let Some(dropped) = self.queue.requeue_failed(item) {
                        self.report_dropped(dropped.payload, DropReason::RetryLimitExceeded);
                    }
                    self.connection_lost(DisconnectionReason::NetworkError(e.to_string()));
                    return Ok(SendStatus::Queued);
                }
            }
        }

        if let Some(evicted) = self.queue.enqueue(OutboundItem::new(payload, now)) {
            self.metrics.messages_evicted += 1;
            self.outbox.push(ConnectionEvent::MessageDropped {
                payload: evicted.payload,
                reason: DropReason::QueueOverflow,
            });
        }
        Ok(SendStatus::Queued)
    }

    fn set_offline_mode(&mut self, enabled: bool) {
        if self.offline_mode == enabled {
            return;
        }
        info!("Offline mode {}", if enabled { "enabled" } else { "disabled" });
        self.offline_mode = enabled;
        if enabled {
            self.go_offline();
        } else if self.reachable {
            self.come_online();
        }
    }

    fn reconnect_now(&mut self) -> Result<(), ChannelError> {
        if self.state == ConnectionState::Offline
            || !self.wants_connection
            || self.target.is_none()
        {
            return Err(ChannelError::invalid_state(self.state, "reconnect_now"));
        }

        info!("Immediate reconnection requested");
        self.exhausted = None;
        self.strategist.reset();
        self.metrics.reconnect_attempts = 0;
        self.retry_timer.cancel();
        self.drop_connection(close_code::RECONNECT_REQUESTED, "reconnect requested");

        let next = match self.state {
            ConnectionState::Open | ConnectionState::Recovering => ConnectionState::Recovering,
            _ => ConnectionState::Connecting,
        };
        self.transition(next);
        self.start_attempt();
        Ok(())
    }

    fn set_reachability(&mut self, reachable: bool) {
        if self.reachable == reachable {
            return;
        }
        info!(
            "Network {}",
            if reachable { "reachable" } else { "unreachable" }
        );
        self.reachable = reachable;
        self.refresh_grade();
        if !reachable {
            self.go_offline();
        } else if !self.offline_mode {
            self.come_online();
        }
    }

    fn set_network_class(&mut self, class: NetworkClass) {
        if self.network_class == class {
            return;
        }
        self.network_class = class;
        let interval = QualityAssessor::heartbeat_interval(&self.config.heartbeat, class);
        info!("Network class {:?}, heartbeat interval {:?}", class, interval);
        self.heartbeat.set_interval(interval);
        if self.heartbeat.is_armed() {
            self.schedule_heartbeat();
        }
    }

    fn diagnostics(&mut self) -> Diagnostics {
        Diagnostics {
            state: self.state,
            grade: self.grade,
            metrics: self.metrics.clone(),
            queue_depth: self.queue.len(),
            offline_mode: self.offline_mode,
            reachable: self.reachable,
            network_class: self.network_class,
            heartbeat_interval: self.heartbeat.interval(),
            exhausted: self.exhausted.is_some(),
            target: self.target.clone(),
            session: self.session.record().cloned(),
        }
    }

    fn stop(&mut self) {
        self.wants_connection = false;
        self.retry_timer.cancel();
        self.drop_connection(close_code::NORMAL, "client shutdown");
        self.transition(ConnectionState::Disconnected);
    }

    // ----- connection attempts -----------------------------------------------

    fn start_attempt(&mut self) {
        let Some(target) = self.target.clone() else {
            warn!("No target to connect to");
            return;
        };
        self.abort_pending_open();
        self.attempt += 1;
        let attempt = self.attempt;
        self.early_events.clear();

        let resume = self.session.resume_params();
        debug!(
            "Opening attempt {} to {} (session {:?}, seq {})",
            attempt, target, resume.session_id, resume.last_message_seq
        );

        let events = self.commands.clone();
        let sink = EventSink::new(attempt, move |attempt, event| {
            events
                .upgrade()
                .is_some_and(|tx| tx.send(Command::Transport { attempt, event }).is_ok())
        });
        let open = self.transport.open(&target, &resume, sink);
        let timeout = self.config.reconnection.timeout;
        let completions = self.commands.clone();

        self.pending_open = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, open).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::TransportUnavailable(format!(
                    "open timed out after {timeout:?}"
                ))),
            };
            let undelivered = match completions.upgrade() {
                Some(tx) => match tx.send(Command::OpenCompleted { attempt, result }) {
                    Ok(()) => None,
                    Err(SendError(Command::OpenCompleted { result, .. })) => Some(result),
                    Err(_) => None,
                },
                None => Some(result),
            };
            if let Some(Ok(mut handle)) = undelivered {
                handle.close(close_code::NORMAL, "connection manager gone");
            }
        }));
    }

    fn abort_pending_open(&mut self) {
        if let Some(task) = self.pending_open.take() {
            debug!("Aborting pending open for attempt {}", self.attempt);
            task.abort();
        }
    }

    fn on_open_completed(&mut self, attempt: u64, result: OpenResult) {
        if attempt != self.attempt || self.pending_open.is_none() {
            debug!("Ignoring open result of superseded attempt {}", attempt);
            if let Ok(mut handle) = result {
                handle.close(close_code::SUPERSEDED, "superseded attempt");
            }
            return;
        }
        self.pending_open = None;

        match result {
            Ok(handle) => self.on_opened(handle),
            Err(e) => {
                warn!("Connection attempt {} failed: {}", attempt, e);
                self.metrics.failed_connections += 1;
                self.early_events.clear();
                if self.state == ConnectionState::Connecting {
                    self.transition(ConnectionState::Disconnected);
                }
                self.schedule_retry();
            }
        }
    }

    fn on_opened(&mut self, handle: Box<dyn TransportHandle>) {
        info!("Connection attempt {} opened", self.attempt);
        let now = Instant::now();
        if let Some(mut previous) = self.handle.replace(handle) {
            previous.close(close_code::SUPERSEDED, "superseded attempt");
        }
        self.metrics.total_connections += 1;
        self.metrics.consecutive_failed_probes = 0;
        self.metrics.last_updated = Some(now);
        self.verified = false;

        self.session.mark_connected(unix_millis());
        self.checkpoint();
        self.schedule_checkpoint();

        let interval =
            QualityAssessor::heartbeat_interval(&self.config.heartbeat, self.network_class);
        self.heartbeat.set_interval(interval);
        self.heartbeat.arm();
        if self.heartbeat.is_armed() {
            self.schedule_heartbeat();
            if let Some(probe) = self.heartbeat.probe_now(now) {
                self.send_probe(probe);
            }
        } else {
            self.on_verified();
        }

        if self.state == ConnectionState::Connecting {
            self.enter_open();
        }

        let attempt = self.attempt;
        for event in mem::take(&mut self.early_events) {
            self.on_transport_event(attempt, event);
        }
    }

    /// First round-trip on the current connection.
    fn on_verified(&mut self) {
        if self.verified {
            return;
        }
        self.verified = true;
        if self.strategist.attempts() > 0 {
            info!(
                "Connection verified after {} reconnection attempts",
                self.strategist.attempts()
            );
        }
        self.strategist.reset();
        self.metrics.reconnect_attempts = 0;
        if self.state == ConnectionState::Recovering {
            self.metrics.successful_reconnections += 1;
            self.enter_open();
        }
    }

    fn enter_open(&mut self) {
        self.transition(ConnectionState::Open);
        self.drain_queue();
    }

    fn drain_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let metrics = &mut self.metrics;
        let now = Instant::now();
        let report = self.queue.drain_with(|item| {
            let bytes = Frame::Data {
                payload: item.payload.clone(),
            }
            .encode()?;
            let len = bytes.len();
            handle.send(bytes)?;
            metrics.record_sent(len, now);
            Ok(())
        });
        if let Some(e) = &report.error {
            warn!(
                "Queue drain stopped after {} items: {}",
                report.sent, e
            );
        } else {
            info!("Drained {} queued items", report.sent);
        }
        for dropped in report.dropped {
            self.report_dropped(dropped.payload, DropReason::RetryLimitExceeded);
        }
        if let Some(e) = report.error {
            self.connection_lost(DisconnectionReason::NetworkError(e.to_string()));
        }
    }

    fn report_dropped(&mut self, payload: Payload, reason: DropReason) {
        warn!("Dropping queued payload: {}", reason);
        self.metrics.messages_dropped += 1;
        self.outbox
            .push(ConnectionEvent::MessageDropped { payload, reason });
    }

    // ----- transport events --------------------------------------------------

    fn on_transport_event(&mut self, attempt: u64, event: TransportEvent) {
        if attempt != self.attempt {
            debug!("Ignoring event from superseded attempt {}: {}", attempt, event);
            return;
        }
        if self.handle.is_none() {
            if self.pending_open.is_some() {
                self.early_events.push(event);
            } else {
                debug!("Ignoring event without a connection: {}", event);
            }
            return;
        }

        match event {
            TransportEvent::MessageReceived(bytes) => self.on_frame(&bytes),
            TransportEvent::Closed { code, reason } => {
                self.connection_lost(DisconnectionReason::Closed { code, reason })
            }
            TransportEvent::Errored(detail) => {
                self.connection_lost(DisconnectionReason::NetworkError(detail))
            }
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let now = Instant::now();
        self.metrics.record_received(bytes.len(), now);
        self.heartbeat.note_traffic(now);

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping undecodable frame: {}", e);
                return;
            }
        };

        match frame {
            Frame::Pong { nonce, .. } => {
                if let Some(latency) = self.heartbeat.on_reply(nonce, now) {
                    self.probe_timer.cancel();
                    let latency_ms = latency.as_millis() as u64;
                    debug!("Heartbeat round-trip {} ms", latency_ms);
                    self.metrics.record_latency(latency_ms, now);
                    self.metrics.consecutive_failed_probes = 0;
                    self.on_verified();
                    self.assess(0);
                }
            }
            Frame::Ping { nonce, sent_at_ms } => {
                self.send_control(Frame::Pong { nonce, sent_at_ms });
            }
            Frame::Message {
                seq,
                session_id,
                payload,
            } => {
                if self.session.observe(session_id.as_deref(), seq) == Observation::Stale {
                    debug!("Delivering message with stale seq {:?}", seq);
                }
                self.outbox.push(ConnectionEvent::Message(InboundMessage {
                    seq,
                    session_id,
                    payload,
                }));
            }
            Frame::Data { payload } => {
                self.outbox.push(ConnectionEvent::Message(InboundMessage {
                    seq: None,
                    session_id: None,
                    payload,
                }));
            }
        }
    }

    fn send_control(&mut self, frame: Frame) {
        let kind = frame.kind();
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {} frame: {}", kind, e);
                return;
            }
        };
        let len = bytes.len();
        if let Some(handle) = self.handle.as_mut() {
            match handle.send(bytes) {
                Ok(()) => self.metrics.record_control_bytes(len),
                Err(e) => warn!("Failed to send {} frame: {}", kind, e),
            }
        }
    }

    /// Tears down the current connection and decides what comes next.
    fn connection_lost(&mut self, reason: DisconnectionReason) {
        if self.handle.is_none() {
            return;
        }
        warn!("Connection lost: {}", reason);
        let code = reason.close_code();
        let unverified = !self.verified;
        self.drop_connection(code, "connection lost");

        match self.state {
            ConnectionState::Open => self.transition(ConnectionState::Recovering),
            ConnectionState::Recovering if unverified => {
                self.metrics.failed_connections += 1;
            }
            _ => {}
        }
        self.schedule_retry();
    }

    /// Releases the connection, the pending open and the timers that belong to a
    /// connection. The retry timer is left alone.
    fn drop_connection(&mut self, code: u16, reason: &str) {
        self.abort_pending_open();
        self.early_events.clear();
        // Events still in flight from this attempt must be ignored.
        self.attempt += 1;

        self.heartbeat_timer.cancel();
        self.probe_timer.cancel();
        self.checkpoint_timer.cancel();
        self.heartbeat.disarm();
        self.verified = false;

        if let Some(mut handle) = self.handle.take() {
            debug!("Closing connection ({}): {}", code, reason);
            handle.close(code, reason);
            self.checkpoint();
        }
    }

    fn schedule_retry(&mut self) {
        match self.strategist.schedule_next() {
            RetryPlan::Retry { attempt, delay } => {
                info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                self.metrics.reconnect_attempts = attempt;
                let commands = self.commands.clone();
                self.retry_timer.schedule(delay, move |generation| {
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx.send(Command::RetryDue { generation });
                    }
                });
            }
            RetryPlan::Exhausted { attempts } => {
                error!("Reconnection exhausted after {} attempts", attempts);
                self.exhausted = Some(attempts);
                self.transition(ConnectionState::Disconnected);
                self.outbox
                    .push(ConnectionEvent::ReconnectionExhausted { attempts });
            }
            RetryPlan::Disabled => {
                info!("Automatic reconnection disabled, staying disconnected");
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    fn on_retry_due(&mut self) {
        if !self.wants_connection || self.state == ConnectionState::Offline {
            return;
        }
        if self.handle.is_some() || self.pending_open.is_some() {
            debug!("Retry due while attempt {} is active, skipping", self.attempt);
            return;
        }
        if self.state == ConnectionState::Disconnected {
            self.transition(ConnectionState::Connecting);
        }
        self.start_attempt();
    }

    // ----- offline handling --------------------------------------------------

    fn go_offline(&mut self) {
        if self.state == ConnectionState::Offline {
            return;
        }
        self.retry_timer.cancel();
        self.drop_connection(close_code::GOING_AWAY, "network unavailable");
        self.transition(ConnectionState::Offline);
    }

    fn come_online(&mut self) {
        if self.state != ConnectionState::Offline {
            return;
        }
        if self.wants_connection && self.exhausted.is_none() && self.target.is_some() {
            info!("Network available again, reconnecting immediately");
            self.transition(ConnectionState::Connecting);
            self.start_attempt();
        } else {
            self.transition(ConnectionState::Disconnected);
        }
    }

    // ----- heartbeat ---------------------------------------------------------

    fn schedule_heartbeat(&mut self) {
        let commands = self.commands.clone();
        self.heartbeat_timer
            .schedule(self.heartbeat.interval(), move |generation| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::HeartbeatTick { generation });
                }
            });
    }

    fn on_heartbeat_tick(&mut self) {
        let now = Instant::now();
        match self.heartbeat.on_tick(now) {
            TickDecision::Send(probe) => self.send_probe(probe),
            TickDecision::SkipRecentTraffic => debug!("Recent traffic, skipping probe"),
            TickDecision::SkipOutstanding => debug!("Probe outstanding, skipping tick"),
            TickDecision::Disarmed => return,
        }
        self.schedule_heartbeat();
    }

    fn send_probe(&mut self, probe: Probe) {
        let sent_at_ms = probe.sent_at.saturating_duration_since(self.epoch).as_millis() as u64;
        self.send_control(Frame::Ping {
            nonce: probe.nonce,
            sent_at_ms,
        });
        let commands = self.commands.clone();
        let nonce = probe.nonce;
        self.probe_timer
            .schedule(self.heartbeat.probe_timeout(), move |generation| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::ProbeTimeout { generation, nonce });
                }
            });
    }

    fn on_probe_timeout(&mut self, nonce: u64) {
        match self.heartbeat.on_timeout(nonce) {
            TimeoutOutcome::Stale => {}
            TimeoutOutcome::Missed { consecutive } => {
                self.metrics.consecutive_failed_probes = consecutive;
                self.assess(1);
                if self.handle.is_some()
                    && self.state == ConnectionState::Recovering
                    && !self.verified
                {
                    warn!("Reconnection could not be verified");
                    self.connection_lost(DisconnectionReason::HeartbeatTimeout);
                }
            }
            TimeoutOutcome::SuspectedDead { consecutive } => {
                self.metrics.consecutive_failed_probes = consecutive;
                self.metrics.heartbeat_failures += 1;
                self.assess(1);
                self.connection_lost(DisconnectionReason::HeartbeatTimeout);
            }
        }
    }

    // ----- quality -----------------------------------------------------------

    fn assess(&mut self, new_failed_probes: u32) {
        let context = AssessmentContext {
            new_failed_probes,
            connected: self.state == ConnectionState::Open,
            reachable: self.reachable,
            now: Instant::now(),
        };
        let assessment = QualityAssessor::assess(&self.metrics, &context);
        self.metrics.health_score = assessment.health_score;
        self.set_grade(assessment.grade);

        if assessment.preemptive_reconnect && self.state == ConnectionState::Open {
            warn!(
                "Health score {} below threshold, reconnecting preemptively",
                assessment.health_score
            );
            self.connection_lost(DisconnectionReason::PoorQuality);
        }
    }

    fn refresh_grade(&mut self) {
        let grade = QualityAssessor::grade_for(
            self.metrics.health_score,
            self.metrics.mean_latency_ms(),
            self.reachable,
        );
        self.set_grade(grade);
    }

    fn set_grade(&mut self, grade: QualityGrade) {
        if grade == self.grade {
            return;
        }
        if grade.is_degraded() {
            warn!(
                "Connection quality degraded: {} -> {} (score {})",
                self.grade, grade, self.metrics.health_score
            );
        } else {
            info!("Connection quality {} -> {}", self.grade, grade);
        }
        self.grade = grade;
        self.outbox.push(ConnectionEvent::QualityChanged {
            grade,
            health_score: self.metrics.health_score,
        });
    }

    // ----- session -----------------------------------------------------------

    fn checkpoint(&mut self) {
        if let Err(e) = self.session.checkpoint() {
            warn!("Session checkpoint failed: {}", e);
        }
    }

    fn schedule_checkpoint(&mut self) {
        let commands = self.commands.clone();
        self.checkpoint_timer
            .schedule(self.config.checkpoint_interval, move |generation| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::CheckpointDue { generation });
                }
            });
    }

    // ----- state -------------------------------------------------------------

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        info!("Connection state {} -> {}", previous, next);
        self.push_status(previous);
    }

    fn push_status(&mut self, previous: ConnectionState) {
        self.outbox.push(ConnectionEvent::StatusChanged(StatusUpdate {
            state: self.state,
            previous,
            grade: self.grade,
            health_score: self.metrics.health_score,
            offline_mode: self.offline_mode,
            reconnect_attempts: self.metrics.reconnect_attempts,
            queue_depth: self.queue.len(),
        }));
    }
}
