/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::QueueConfig;
use crate::transport::wire::Payload;
use crate::utils::ChannelError;

/// A payload waiting for an open connection.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundItem {
    /// Application payload
    pub payload: Payload,
    /// When the payload was first queued
    pub enqueued_at: Instant,
    /// Failed send attempts so far
    pub attempt_count: u32,
}

impl OutboundItem {
    /// Wraps a payload that has not been attempted yet.
    pub fn new(payload: Payload, enqueued_at: Instant) -> Self {
        Self {
            payload,
            enqueued_at,
            attempt_count: 0,
        }
    }
}

/// Outcome of one [`OutboundQueue::drain_with`] pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Items handed to the transport
    pub sent: usize,
    /// Items given up on after reaching the retry ceiling
    pub dropped: Vec<OutboundItem>,
    /// Error that stopped the drain, if any
    pub error: Option<ChannelError>,
}

impl DrainReport {
    /// Whether the queue was emptied without a failure.
    pub fn completed(&self) -> bool {
        self.error.is_none()
    }
}

/// Bounded FIFO store-and-forward queue.
///
/// Items are never reordered. When full, the oldest item is evicted to make room.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<OutboundItem>,
    capacity: usize,
    max_item_attempts: u32,
}

impl OutboundQueue {
    /// Creates an empty queue.
    pub fn new(config: &QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            max_item_attempts: config.max_item_attempts.max(1),
        }
    }

    /// Appends `item`, returning the evicted head if the queue was full.
    pub fn enqueue(&mut self, item: OutboundItem) -> Option<OutboundItem> {
        let evicted = if self.items.len() >= self.capacity {
            let evicted = self.items.pop_front();
            warn!("Outbound queue full ({}), evicting oldest item", self.capacity);
            evicted
        } else {
            None
        };
        self.items.push_back(item);
        debug!("Queued outbound item, depth {}", self.items.len());
        evicted
    }

    /// Records a failed send of `item`. Returns it back if it reached the retry
    /// ceiling and must be dropped, otherwise puts it back at the front.
    pub fn requeue_failed(&mut self, mut item: OutboundItem) -> Option<OutboundItem> {
        item.attempt_count += 1;
        if item.attempt_count >= self.max_item_attempts {
            warn!(
                "Dropping outbound item after {} failed attempts",
                item.attempt_count
            );
            return Some(item);
        }
        self.items.push_front(item);
        None
    }

    /// Sends queued items in order through `send` until the queue is empty or a
    /// send fails. The failed item stays at the front with its attempt count
    /// incremented, unless that reached the retry ceiling.
    pub fn drain_with<F>(&mut self, mut send: F) -> DrainReport
    where
        F: FnMut(&OutboundItem) -> Result<(), ChannelError>,
    {
        let mut report = DrainReport::default();
        while let Some(item) = self.items.pop_front() {
            match send(&item) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    debug!("Drain aborted after {} items: {}", report.sent, e);
                    if let Some(dropped) = self.requeue_failed(item) {
                        report.dropped.push(dropped);
                    }
                    report.error = Some(e);
                    break;
                }
            }
        }
        if report.sent > 0 {
            debug!(
                "Drained {} outbound items, {} remaining",
                report.sent,
                self.items.len()
            );
        }
        report
    }

    /// Removes every pending item, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of pending items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pending items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OutboundItem> {
        self.items.iter()
    }
}
