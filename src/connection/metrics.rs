/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::collections::VecDeque;
use tokio::time::Instant;

/// Health score every fresh set of metrics starts from.
pub const INITIAL_HEALTH_SCORE: u8 = 100;

/// Connection metrics for monitoring and debugging
///
/// Survives transient reconnects so backoff and quality history carry over a recovery
/// episode; only a user-initiated disconnect resets it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionMetrics {
    /// Round-trip time of the most recent probe
    pub latency_ms: Option<u64>,
    /// Probes that timed out in a row
    pub consecutive_failed_probes: u32,
    /// Continuous quality estimate in `[0, 100]`
    pub health_score: u8,
    /// Reconnection attempts in the current recovery episode
    pub reconnect_attempts: u32,
    /// Application messages written to the transport
    pub messages_sent: u64,
    /// Frames received from the transport
    pub messages_received: u64,
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Bytes received from the transport
    pub bytes_received: u64,
    /// Last time inbound traffic was observed
    pub last_activity_at: Option<Instant>,
    /// Total number of connections opened
    pub total_connections: u64,
    /// Connections that were re-established after a loss
    pub successful_reconnections: u64,
    /// Connection attempts that failed to open
    pub failed_connections: u64,
    /// Times the heartbeat declared the connection dead
    pub heartbeat_failures: u64,
    /// Queued items evicted because the queue was full
    pub messages_evicted: u64,
    /// Queued items dropped after exhausting their retries
    pub messages_dropped: u64,
    /// Timestamp of when these metrics were last updated
    pub last_updated: Option<Instant>,
    recent_latencies: VecDeque<u64>,
    latency_window: usize,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ConnectionMetrics {
    /// Creates empty metrics keeping the last `latency_window` probe latencies.
    pub fn new(latency_window: usize) -> Self {
        let latency_window = latency_window.max(1);
        Self {
            latency_ms: None,
            consecutive_failed_probes: 0,
            health_score: INITIAL_HEALTH_SCORE,
            reconnect_attempts: 0,
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last_activity_at: None,
            total_connections: 0,
            successful_reconnections: 0,
            failed_connections: 0,
            heartbeat_failures: 0,
            messages_evicted: 0,
            messages_dropped: 0,
            last_updated: None,
            recent_latencies: VecDeque::with_capacity(latency_window),
            latency_window,
        }
    }

    /// Resets everything, keeping the configured latency window.
    pub fn reset(&mut self) {
        *self = Self::new(self.latency_window);
    }

    /// Records a probe round-trip, evicting the oldest sample when the window is full.
    pub fn record_latency(&mut self, latency_ms: u64, now: Instant) {
        if self.recent_latencies.len() == self.latency_window {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency_ms);
        self.latency_ms = Some(latency_ms);
        self.last_updated = Some(now);
    }

    /// Mean of the recent probe latencies, if any were recorded.
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.recent_latencies.is_empty() {
            return None;
        }
        let total: u64 = self.recent_latencies.iter().sum();
        Some(total as f64 / self.recent_latencies.len() as f64)
    }

    /// Recent probe latencies, oldest first.
    pub fn recent_latencies(&self) -> impl Iterator<Item = u64> + '_ {
        self.recent_latencies.iter().copied()
    }

    /// Records inbound traffic of `bytes` bytes.
    pub fn record_received(&mut self, bytes: usize, now: Instant) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity_at = Some(now);
        self.last_updated = Some(now);
    }

    /// Records an outbound application message of `bytes` bytes.
    pub fn record_sent(&mut self, bytes: usize, now: Instant) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_updated = Some(now);
    }

    /// Records control traffic (probes, replies) that is not an application message.
    pub fn record_control_bytes(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }
}
