/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Liveness probing.
//!
//! The monitor does not own timers. The manager calls [`HeartbeatMonitor::on_tick`]
//! every interval and [`HeartbeatMonitor::on_timeout`] when a probe's deadline
//! passes; the monitor decides what to send and when the connection is suspected
//! dead.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::config::HeartbeatConfig;

/// A probe that has been handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Identifier echoed by the reply
    pub nonce: u64,
    /// When the probe was sent
    pub sent_at: Instant,
}

/// What a heartbeat tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Send this probe and start its timeout.
    Send(Probe),
    /// Inbound traffic within the last interval already proves liveness.
    SkipRecentTraffic,
    /// A probe is still waiting for its reply.
    SkipOutstanding,
    /// The monitor is not armed.
    Disarmed,
}

/// Result of a probe timing out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The probe was lost; the connection is still given the benefit of the doubt.
    Missed {
        /// Consecutive failures so far
        consecutive: u32,
    },
    /// Too many consecutive failures: the connection should be restarted.
    SuspectedDead {
        /// Consecutive failures so far
        consecutive: u32,
    },
    /// The timeout belongs to a probe that was already answered or discarded.
    Stale,
}

/// Monitors connection health through heartbeats
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    interval: Duration,
    armed: bool,
    next_nonce: u64,
    outstanding: Option<Probe>,
    consecutive_failed: u32,
    last_traffic: Option<Instant>,
    round_trips: u64,
}

impl HeartbeatMonitor {
    /// Creates a new, disarmed heartbeat monitor
    pub fn new(config: HeartbeatConfig) -> Self {
        let interval = config.interval;
        Self {
            config,
            interval,
            armed: false,
            next_nonce: 0,
            outstanding: None,
            consecutive_failed: 0,
            last_traffic: None,
            round_trips: 0,
        }
    }

    /// Starts monitoring a freshly opened connection.
    pub fn arm(&mut self) {
        if !self.config.enabled {
            debug!("Heartbeat disabled, not arming monitor");
            return;
        }
        self.armed = true;
        self.outstanding = None;
        self.consecutive_failed = 0;
        self.last_traffic = None;
        self.round_trips = 0;
        debug!("Heartbeat monitor armed with interval {:?}", self.interval);
    }

    /// Stops monitoring; any outstanding probe is forgotten.
    pub fn disarm(&mut self) {
        if self.armed {
            debug!("Heartbeat monitor disarmed");
        }
        self.armed = false;
        self.outstanding = None;
    }

    /// Whether the monitor is currently armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Current interval between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Changes the tick interval, e.g. when the network class changes.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// How long to wait for a reply.
    pub fn probe_timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Probe currently awaiting its reply.
    pub fn outstanding(&self) -> Option<Probe> {
        self.outstanding
    }

    /// Probes that timed out in a row.
    pub fn consecutive_failed(&self) -> u32 {
        self.consecutive_failed
    }

    /// Successful round-trips since the monitor was armed.
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Notes inbound traffic, which implies liveness.
    pub fn note_traffic(&mut self, now: Instant) {
        self.last_traffic = Some(now);
    }

    /// Periodic tick: decide whether a probe must be sent.
    ///
    /// Traffic observed within the last interval skips the probe; so does an
    /// outstanding probe, so at most one is ever in flight.
    pub fn on_tick(&mut self, now: Instant) -> TickDecision {
        if !self.armed {
            return TickDecision::Disarmed;
        }
        if self.outstanding.is_some() {
            return TickDecision::SkipOutstanding;
        }
        if let Some(last) = self.last_traffic
            && now.saturating_duration_since(last) < self.interval
        {
            return TickDecision::SkipRecentTraffic;
        }
        TickDecision::Send(self.issue(now))
    }

    /// Sends a probe regardless of recent traffic, used to verify a new connection.
    ///
    /// Returns `None` when disarmed or when a probe is already outstanding.
    pub fn probe_now(&mut self, now: Instant) -> Option<Probe> {
        if !self.armed || self.outstanding.is_some() {
            return None;
        }
        Some(self.issue(now))
    }

    fn issue(&mut self, now: Instant) -> Probe {
        self.next_nonce += 1;
        let probe = Probe {
            nonce: self.next_nonce,
            sent_at: now,
        };
        self.outstanding = Some(probe);
        probe
    }

    /// Handles a probe reply. Returns the round-trip time if `nonce` matches the
    /// outstanding probe.
    pub fn on_reply(&mut self, nonce: u64, now: Instant) -> Option<Duration> {
        match self.outstanding {
            Some(probe) if probe.nonce == nonce => {
                self.outstanding = None;
                self.consecutive_failed = 0;
                self.round_trips += 1;
                self.last_traffic = Some(now);
                Some(now.saturating_duration_since(probe.sent_at))
            }
            _ => {
                debug!("Ignoring reply for unknown probe {}", nonce);
                None
            }
        }
    }

    /// Handles the deadline of probe `nonce` passing without a reply.
    pub fn on_timeout(&mut self, nonce: u64) -> TimeoutOutcome {
        match self.outstanding {
            Some(probe) if probe.nonce == nonce && self.armed => {
                self.outstanding = None;
                self.consecutive_failed += 1;
                let consecutive = self.consecutive_failed;
                if consecutive >= self.config.max_missed {
                    warn!(
                        "Maximum missed heartbeats ({}) reached, connection suspected dead",
                        self.config.max_missed
                    );
                    TimeoutOutcome::SuspectedDead { consecutive }
                } else {
                    warn!("Heartbeat probe {} timed out ({} in a row)", nonce, consecutive);
                    TimeoutOutcome::Missed { consecutive }
                }
            }
            _ => TimeoutOutcome::Stale,
        }
    }
}
