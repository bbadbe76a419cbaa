/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Cancellable one-shot timers for the manager loop.
//!
//! A firing is delivered as a message carrying the generation it was scheduled
//! with. Cancelling or rescheduling bumps the generation, so a firing that was
//! already queued when the timer was cancelled is recognised as stale.

use std::time::Duration;
use tokio::task::JoinHandle;

/// One-shot timer whose firings are stamped with a generation.
#[derive(Debug, Default)]
pub struct Timer {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Creates an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `fire(generation)` after `delay`, replacing any pending firing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation);
        }));
    }

    /// Cancels the pending firing, if any.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a firing stamped `generation` is still current. Accepting it
    /// disarms the timer.
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.task.is_some() && generation == self.generation {
            self.task = None;
            true
        } else {
            false
        }
    }

    /// Whether a firing is pending.
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
