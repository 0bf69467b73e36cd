//! Event broadcast for trade telemetry and echo channels.
//!
//! Front-ends that used to be fed through global forwarders subscribe here
//! instead; the engine only ever calls [`EventBus::emit`].

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

pub const TRADE_STARTED: &str = "trade_started";
pub const TRADE_FINISHED: &str = "trade_finished";
pub const CLONE_RESULT: &str = "clone_result";
pub const BARRIER_TIMEOUT: &str = "barrier_timeout";
pub const WORKER_RECONNECT: &str = "worker_reconnect";
pub const ABUSE_DETECTED: &str = "abuse_detected";

/// Broadcast channel for engine events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// The effective buffer is clamped to at least `DEFAULT_BUFFER`.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
