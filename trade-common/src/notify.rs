//! Requester notification sink.

use crate::payload::Payload;
use crate::types::TradeOutcome;

/// Callbacks invoked as a request progresses.
///
/// Each request carries its own sink. Exactly one of [`finished`] or
/// [`canceled`] is called per terminal outcome.
///
/// [`finished`]: TradeNotifier::finished
/// [`canceled`]: TradeNotifier::canceled
pub trait TradeNotifier: Send + Sync {
    fn initialized(&self, request_id: u64);

    fn searching(&self, request_id: u64);

    fn message(&self, request_id: u64, text: &str);

    /// A message with an attached payload (dumps, "here's what you showed me").
    fn message_with_payload(&self, request_id: u64, payload: &Payload, text: &str);

    fn finished(&self, request_id: u64, received: &Payload);

    fn canceled(&self, request_id: u64, outcome: TradeOutcome);
}

/// Sink that drops everything. Used by fallback-source requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl TradeNotifier for NullNotifier {
    fn initialized(&self, _request_id: u64) {}
    fn searching(&self, _request_id: u64) {}
    fn message(&self, _request_id: u64, _text: &str) {}
    fn message_with_payload(&self, _request_id: u64, _payload: &Payload, _text: &str) {}
    fn finished(&self, _request_id: u64, _received: &Payload) {}
    fn canceled(&self, _request_id: u64, _outcome: TradeOutcome) {}
}
