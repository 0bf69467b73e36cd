//! Retry decisions for failed requests and the device reconnect ladder.

use crate::events::{EventBus, WORKER_RECONNECT};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trade_common::config::TimingsSection;
use trade_common::{DeviceFacade, PriorityTier, RoutineKind, TradeOutcome, TradeRequest, TradeType};

/// Fixed part of the pause between reconnect attempts.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);

/// What happens to a request that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queue once more at the given tier.
    Requeue(PriorityTier),
    Cancel,
}

/// Decide whether a failed request gets its single retry.
///
/// Template-match requests and requests already retried never do. Clones
/// on a flex worker that clones while idle are dropped too: the idle source
/// will produce a fresh one.
pub fn classify(
    request: &TradeRequest,
    outcome: TradeOutcome,
    tier: PriorityTier,
    initial_routine: RoutineKind,
    clone_while_idle: bool,
) -> RetryDecision {
    let idle_clone = request.trade_type == TradeType::Clone
        && initial_routine == RoutineKind::FlexTrade
        && clone_while_idle;
    if outcome.should_attempt_retry()
        && request.trade_type != TradeType::Random
        && !request.is_retry
        && !idle_clone
    {
        RetryDecision::Requeue(tier.min(PriorityTier::TIER2))
    } else {
        RetryDecision::Cancel
    }
}

/// Bounded reconnect attempts after a connectivity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(timings: &TimingsSection) -> Self {
        Self {
            attempts: timings.reconnect_attempts,
            delay: RECONNECT_BASE_DELAY + Duration::from_millis(timings.extra_reconnect_delay_ms),
        }
    }

    /// Try to bring the transport back. Returns `false` when every attempt
    /// failed or the worker was cancelled in between.
    pub async fn reconnect(
        &self,
        device: &dyn DeviceFacade,
        worker: &str,
        events: &EventBus,
        cancel: &CancellationToken,
    ) -> bool {
        for attempt in 1..=self.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.delay) => {}
            }
            let result = device.reset_connection().await;
            let success = result.is_ok();
            events.emit(
                WORKER_RECONNECT,
                &json!({ "worker": worker, "attempt": attempt, "success": success }),
            );
            match result {
                Ok(()) => {
                    info!(worker, attempt, "Reconnected to device");
                    return true;
                }
                Err(e) => warn!(worker, attempt, error = %e, "Reconnect attempt failed"),
            }
        }
        warn!(worker, attempts = self.attempts, "Giving up on reconnecting");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trade_common::mock_device::MockConsole;
    use trade_common::{NullNotifier, Payload, PartnerInfo, TrainerInfo};

    fn request(trade_type: TradeType, is_retry: bool) -> TradeRequest {
        let mut r = TradeRequest::new(
            1,
            trade_type,
            Payload::empty(),
            TrainerInfo::new("Req", 5),
            1,
            Arc::new(NullNotifier),
        );
        r.is_retry = is_retry;
        r
    }

    #[test]
    fn retryable_failure_is_requeued_at_most_tier_two() {
        let r = request(TradeType::Specific, false);
        assert_eq!(
            classify(&r, TradeOutcome::NoTrainerFound, PriorityTier::TIER3, RoutineKind::LinkTrade, false),
            RetryDecision::Requeue(PriorityTier::TIER2)
        );
        assert_eq!(
            classify(&r, TradeOutcome::RecoverStart, PriorityTier::FAVORED, RoutineKind::LinkTrade, false),
            RetryDecision::Requeue(PriorityTier::FAVORED)
        );
    }

    #[test]
    fn partner_failures_and_second_attempts_are_cancelled() {
        let fresh = request(TradeType::Specific, false);
        assert_eq!(
            classify(&fresh, TradeOutcome::TrainerTooSlow, PriorityTier::TIER2, RoutineKind::LinkTrade, false),
            RetryDecision::Cancel
        );
        let retried = request(TradeType::Specific, true);
        assert_eq!(
            classify(&retried, TradeOutcome::NoTrainerFound, PriorityTier::TIER2, RoutineKind::LinkTrade, false),
            RetryDecision::Cancel
        );
        let random = request(TradeType::Random, false);
        assert_eq!(
            classify(&random, TradeOutcome::NoTrainerFound, PriorityTier::FREE, RoutineKind::LinkTrade, false),
            RetryDecision::Cancel
        );
    }

    #[test]
    fn idle_clones_on_flex_workers_are_not_retried() {
        let clone = request(TradeType::Clone, false);
        assert_eq!(
            classify(&clone, TradeOutcome::NoTrainerFound, PriorityTier::FREE, RoutineKind::FlexTrade, true),
            RetryDecision::Cancel
        );
        assert_eq!(
            classify(&clone, TradeOutcome::NoTrainerFound, PriorityTier::FREE, RoutineKind::Clone, true),
            RetryDecision::Requeue(PriorityTier::TIER2)
        );
    }

    fn console() -> MockConsole {
        MockConsole::new(&PartnerInfo {
            nid: 0,
            name: "Host".to_string(),
            tid7: 1,
            sid7: 1,
            game: 50,
            gender: 0,
            language: 2,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_reports_each_attempt() {
        let device = console();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let policy = ReconnectPolicy {
            attempts: 3,
            delay: Duration::from_secs(5),
        };

        assert!(policy.reconnect(&device, "w1", &events, &CancellationToken::new()).await);
        assert_eq!(device.reconnects(), 1);
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["event"], WORKER_RECONNECT);
        assert_eq!(msg["data"]["success"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_attempts() {
        let device = console();
        device.set_reconnect_allowed(false);
        let policy = ReconnectPolicy {
            attempts: 4,
            delay: Duration::from_secs(1),
        };
        let started = tokio::time::Instant::now();

        assert!(!policy.reconnect(&device, "w1", &EventBus::default(), &CancellationToken::new()).await);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn delay_adds_configured_extra() {
        let timings = TimingsSection {
            extra_reconnect_delay_ms: 2_500,
            reconnect_attempts: 7,
            ..TimingsSection::default()
        };
        let policy = ReconnectPolicy::from_config(&timings);
        assert_eq!(policy.attempts, 7);
        assert_eq!(policy.delay, Duration::from_millis(7_500));
    }
}
