//! Synchronized starts across workers.
//!
//! Participants signal and wait; the last one to arrive releases the whole
//! generation. A waiter that times out withdraws its signal so a stale
//! arrival never counts towards the next generation.

use crate::events::{BARRIER_TIMEOUT, EventBus};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct BarrierState {
    participants: usize,
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
pub struct TradeBarrier {
    state: Mutex<BarrierState>,
    released: watch::Sender<u64>,
}

impl Default for TradeBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeBarrier {
    pub fn new() -> Self {
        let (released, _) = watch::channel(0);
        Self {
            state: Mutex::new(BarrierState::default()),
            released,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn participants(&self) -> usize {
        self.lock().participants
    }

    /// Returns the new participant count.
    pub fn add_participant(&self) -> usize {
        let mut state = self.lock();
        state.participants += 1;
        state.participants
    }

    /// Returns the new participant count.
    ///
    /// Leaving can complete a generation the remaining waiters were
    /// blocked on.
    pub fn remove_participant(&self) -> usize {
        let mut state = self.lock();
        state.participants = state.participants.saturating_sub(1);
        if state.arrived > 0 && state.arrived >= state.participants {
            self.release(&mut state);
        }
        state.participants
    }

    fn release(&self, state: &mut BarrierState) {
        state.arrived = 0;
        state.generation += 1;
        self.released.send_replace(state.generation);
    }

    /// Signal readiness and wait for every participant to do the same.
    ///
    /// Returns `true` when released, `false` on timeout.
    pub async fn signal_and_wait(&self, timeout: Duration) -> bool {
        let mut rx = self.released.subscribe();
        let generation = {
            let mut state = self.lock();
            state.arrived += 1;
            if state.arrived >= state.participants {
                self.release(&mut state);
                return true;
            }
            state.generation
        };

        let waited = tokio::time::timeout(timeout, rx.wait_for(|g| *g > generation)).await;
        if matches!(waited, Ok(Ok(_))) {
            return true;
        }

        let mut state = self.lock();
        if state.generation != generation {
            // Released between the timeout firing and taking the lock.
            return true;
        }
        state.arrived = state.arrived.saturating_sub(1);
        false
    }
}

/// One worker's membership in the barrier.
///
/// Leaves the barrier when dropped.
pub struct BarrierMember {
    barrier: Arc<TradeBarrier>,
    worker: String,
    base_timeout: Duration,
    joined: bool,
    consecutive_failures: u32,
    events: EventBus,
}

impl BarrierMember {
    pub fn new(
        barrier: Arc<TradeBarrier>,
        worker: impl Into<String>,
        base_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            barrier,
            worker: worker.into(),
            base_timeout,
            joined: false,
            consecutive_failures: 0,
            events,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Timeout for the next wait: doubled right after a timed-out wait.
    pub fn next_timeout(&self) -> Duration {
        if self.consecutive_failures > 0 {
            self.base_timeout * 2
        } else {
            self.base_timeout
        }
    }

    /// Join or leave on a change of `should_sync`; otherwise a no-op.
    pub fn update(&mut self, should_sync: bool) {
        if should_sync == self.joined {
            return;
        }
        let count = if should_sync {
            self.barrier.add_participant()
        } else {
            self.barrier.remove_participant()
        };
        self.joined = should_sync;
        debug!(
            worker = %self.worker,
            joined = should_sync,
            participants = count,
            "Barrier membership changed"
        );
    }

    /// Wait at the barrier when joined and `should_sync`.
    ///
    /// A timeout is not fatal: the worker proceeds alone.
    pub async fn wait_if_applicable(&mut self, should_sync: bool) -> bool {
        if !should_sync || !self.joined {
            return false;
        }
        let timeout = self.next_timeout();
        if self.barrier.signal_and_wait(timeout).await {
            self.consecutive_failures = 0;
            info!(worker = %self.worker, "Barrier released, starting search");
            true
        } else {
            self.consecutive_failures += 1;
            warn!(
                worker = %self.worker,
                timeout_secs = timeout.as_secs(),
                failures = self.consecutive_failures,
                "Barrier timed out, proceeding alone"
            );
            self.events.emit(
                BARRIER_TIMEOUT,
                &json!({
                    "worker": self.worker,
                    "timeout_secs": timeout.as_secs(),
                    "participants": self.barrier.participants(),
                }),
            );
            false
        }
    }

    pub fn leave(&mut self) {
        self.update(false);
    }
}

impl Drop for BarrierMember {
    fn drop(&mut self) {
        self.leave();
    }
}
