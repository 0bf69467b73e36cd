//! Trade queue and dispatcher.
//!
//! One ordered map per routine, keyed by `(tier, arrival)`. Workers take
//! requests out of the map, which hands them exclusive ownership; nothing
//! else holds a reference to a dequeued request.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use trade_common::config::DistributionSection;
use trade_common::{
    NullNotifier, Payload, PriorityTier, RoutineKind, TradeRequest, TradeType, TrainerInfo,
};

/// Exclusive upper bound of an eight-digit link code.
pub const CODE_SPACE: u32 = 100_000_000;

/// A request handed to a worker together with the tier it was queued at.
#[derive(Debug)]
pub struct Assignment {
    pub request: TradeRequest,
    pub tier: PriorityTier,
}

/// Link codes for requests the daemon creates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCodePolicy {
    pub fixed: u32,
    pub random: bool,
}

impl LinkCodePolicy {
    pub fn from_config(section: &DistributionSection) -> Self {
        Self {
            fixed: section.trade_code,
            random: section.random_code,
        }
    }

    pub fn next_code(&self) -> u32 {
        if self.random {
            fastrand::u32(0..CODE_SPACE)
        } else {
            self.fixed % CODE_SPACE
        }
    }
}

/// Generator of lowest-tier requests, consulted only when the primary
/// queues for a routine are empty.
pub trait FallbackSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether workers in `routine` may draw from this source.
    fn serves(&self, routine: RoutineKind) -> bool;

    fn next(&self, id: u64) -> Option<TradeRequest>;
}

/// Fresh clone requests while the clone queue is empty.
pub struct IdleCloneSource {
    codes: LinkCodePolicy,
}

impl IdleCloneSource {
    pub fn new(codes: LinkCodePolicy) -> Self {
        Self { codes }
    }
}

impl FallbackSource for IdleCloneSource {
    fn name(&self) -> &'static str {
        "clone"
    }

    fn serves(&self, routine: RoutineKind) -> bool {
        matches!(routine, RoutineKind::Clone | RoutineKind::FlexTrade)
    }

    fn next(&self, id: u64) -> Option<TradeRequest> {
        Some(TradeRequest::new(
            id,
            TradeType::Clone,
            Payload::empty(),
            TrainerInfo::new("Clone Fallback", 0),
            self.codes.next_code(),
            Arc::new(NullNotifier),
        ))
    }
}

/// Template-match requests carrying a random payload from a pool.
pub struct DistributionPool {
    payloads: Vec<Payload>,
    codes: LinkCodePolicy,
}

impl DistributionPool {
    pub fn new(payloads: Vec<Payload>, codes: LinkCodePolicy) -> Self {
        Self { payloads, codes }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl FallbackSource for DistributionPool {
    fn name(&self) -> &'static str {
        "distribution"
    }

    fn serves(&self, routine: RoutineKind) -> bool {
        matches!(routine, RoutineKind::LinkTrade | RoutineKind::FlexTrade)
    }

    fn next(&self, id: u64) -> Option<TradeRequest> {
        if self.payloads.is_empty() {
            return None;
        }
        let payload = self.payloads[fastrand::usize(..self.payloads.len())].clone();
        Some(TradeRequest::new(
            id,
            TradeType::Random,
            payload,
            TrainerInfo::new("Distribution", 0),
            self.codes.next_code(),
            Arc::new(NullNotifier),
        )
        .synchronized(true))
    }
}

type Queue = BTreeMap<(PriorityTier, u64), TradeRequest>;

/// Shared queues for every routine plus the fallback sources.
#[derive(Default)]
pub struct Dispatcher {
    queues: Mutex<HashMap<RoutineKind, Queue>>,
    arrivals: AtomicU64,
    ids: AtomicU64,
    fallbacks: Vec<Box<dyn FallbackSource>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback source; sources are consulted in registration order.
    pub fn with_fallback(mut self, source: impl FallbackSource + 'static) -> Self {
        info!("Registered {} fallback source", source.name());
        self.fallbacks.push(Box::new(source));
        self
    }

    /// Fresh request id.
    pub fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RoutineKind, Queue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `request` at `tier` behind everything already at that tier.
    pub fn enqueue(&self, mut request: TradeRequest, tier: PriorityTier) {
        request.processing = false;
        let arrival = self.arrivals.fetch_add(1, Ordering::Relaxed);
        let routine = request.trade_type.routine();
        debug!(
            request_id = request.id,
            trade_type = %request.trade_type,
            %tier,
            "Enqueued trade"
        );
        self.lock()
            .entry(routine)
            .or_default()
            .insert((tier, arrival), request);
    }

    /// Queue a failed request once more at `tier`.
    ///
    /// Requests that already were retried, and template-match requests,
    /// are dropped instead. Returns whether the request was requeued.
    pub fn requeue_retry(&self, mut request: TradeRequest, tier: PriorityTier) -> bool {
        if request.is_retry || request.trade_type == TradeType::Random {
            return false;
        }
        request.is_retry = true;
        self.enqueue(request, tier);
        true
    }

    /// Take the best request for `routine`, falling back to the registered
    /// sources when the primary queues are empty.
    pub fn try_dequeue(&self, routine: RoutineKind) -> Option<Assignment> {
        if !routine.is_trading() {
            return None;
        }
        if let Some(assignment) = self.take_primary(routine) {
            return Some(assignment);
        }
        self.fallbacks
            .iter()
            .filter(|source| source.serves(routine))
            .find_map(|source| source.next(self.next_id()))
            .map(|mut request| {
                request.processing = true;
                Assignment {
                    request,
                    tier: PriorityTier::FREE,
                }
            })
    }

    fn take_primary(&self, routine: RoutineKind) -> Option<Assignment> {
        let mut queues = self.lock();
        let source = if routine == RoutineKind::FlexTrade {
            queues
                .iter()
                .filter_map(|(kind, queue)| queue.keys().next().map(|key| (*key, *kind)))
                .min_by_key(|(key, _)| *key)
                .map(|(_, kind)| kind)?
        } else {
            routine
        };
        let ((tier, _), mut request) = queues.get_mut(&source)?.pop_first()?;
        request.processing = true;
        Some(Assignment { request, tier })
    }

    /// Remove a queued request, e.g. when the requester cancels.
    pub fn remove(&self, request_id: u64) -> Option<TradeRequest> {
        let mut queues = self.lock();
        for queue in queues.values_mut() {
            let key = queue
                .iter()
                .find(|(_, r)| r.id == request_id)
                .map(|(key, _)| *key);
            if let Some(key) = key {
                return queue.remove(&key);
            }
        }
        None
    }

    /// Queued requests for `routine` (all routines for `FlexTrade`).
    pub fn pending(&self, routine: RoutineKind) -> usize {
        let queues = self.lock();
        match routine {
            RoutineKind::FlexTrade => queues.values().map(BTreeMap::len).sum(),
            other => queues.get(&other).map_or(0, BTreeMap::len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(d: &Dispatcher, trade_type: TradeType) -> TradeRequest {
        TradeRequest::new(
            d.next_id(),
            trade_type,
            Payload::empty(),
            TrainerInfo::new("Juliana", 1),
            1234_5678,
            Arc::new(NullNotifier),
        )
    }

    #[test]
    fn lower_tier_wins_and_fifo_within_tier() {
        let d = Dispatcher::new();
        let late_low = request(&d, TradeType::Specific);
        let first_high = request(&d, TradeType::Specific);
        let second_high = request(&d, TradeType::Specific);
        let (late_id, first_id, second_id) = (late_low.id, first_high.id, second_high.id);

        d.enqueue(first_high, PriorityTier::TIER3);
        d.enqueue(second_high, PriorityTier::TIER3);
        d.enqueue(late_low, PriorityTier::FAVORED);

        let order: Vec<u64> = std::iter::from_fn(|| d.try_dequeue(RoutineKind::LinkTrade))
            .map(|a| a.request.id)
            .collect();
        assert_eq!(order, vec![late_id, first_id, second_id]);
    }

    #[test]
    fn dequeue_marks_processing_and_reports_tier() {
        let d = Dispatcher::new();
        d.enqueue(request(&d, TradeType::Clone), PriorityTier::TIER2);
        let assignment = d.try_dequeue(RoutineKind::Clone).unwrap();
        assert!(assignment.request.processing);
        assert_eq!(assignment.tier, PriorityTier::TIER2);
        assert!(d.try_dequeue(RoutineKind::Clone).is_none());
    }

    #[test]
    fn routines_only_see_their_queue_except_flex() {
        let d = Dispatcher::new();
        d.enqueue(request(&d, TradeType::Dump), PriorityTier::TIER3);
        d.enqueue(request(&d, TradeType::Clone), PriorityTier::TIER2);

        assert!(d.try_dequeue(RoutineKind::LinkTrade).is_none());
        assert!(d.try_dequeue(RoutineKind::Idle).is_none());
        assert_eq!(d.pending(RoutineKind::FlexTrade), 2);

        let first = d.try_dequeue(RoutineKind::FlexTrade).unwrap();
        assert_eq!(first.request.trade_type, TradeType::Clone);
        let second = d.try_dequeue(RoutineKind::FlexTrade).unwrap();
        assert_eq!(second.request.trade_type, TradeType::Dump);
    }

    #[test]
    fn retries_are_granted_once_and_never_for_random() {
        let d = Dispatcher::new();
        assert!(d.requeue_retry(request(&d, TradeType::Specific), PriorityTier::TIER2));
        let retried = d.try_dequeue(RoutineKind::LinkTrade).unwrap().request;
        assert!(retried.is_retry);
        assert_eq!(retried.trade_type, TradeType::Specific);

        assert!(!d.requeue_retry(retried, PriorityTier::TIER2));
        assert!(!d.requeue_retry(request(&d, TradeType::Random), PriorityTier::TIER2));
        assert_eq!(d.pending(RoutineKind::LinkTrade), 0);
    }

    #[test]
    fn fallbacks_apply_only_to_their_routines() {
        let codes = LinkCodePolicy {
            fixed: 1111_2222,
            random: false,
        };
        let pool_payload = Payload {
            species: 133,
            ..Payload::default()
        };
        let d = Dispatcher::new()
            .with_fallback(IdleCloneSource::new(codes))
            .with_fallback(DistributionPool::new(vec![pool_payload], codes));

        let clone = d.try_dequeue(RoutineKind::Clone).unwrap();
        assert_eq!(clone.request.trade_type, TradeType::Clone);
        assert_eq!(clone.tier, PriorityTier::FREE);
        assert_eq!(clone.request.code, 1111_2222);

        let random = d.try_dequeue(RoutineKind::LinkTrade).unwrap();
        assert_eq!(random.request.trade_type, TradeType::Random);
        assert_eq!(random.request.payload.species, 133);
        assert!(random.request.synchronized);
        assert!(!clone.request.synchronized);

        assert!(d.try_dequeue(RoutineKind::Dump).is_none());
    }

    #[test]
    fn queued_requests_beat_fallbacks() {
        let codes = LinkCodePolicy { fixed: 0, random: true };
        let d = Dispatcher::new().with_fallback(IdleCloneSource::new(codes));
        let queued = request(&d, TradeType::Clone);
        let id = queued.id;
        d.enqueue(queued, PriorityTier::TIER3);
        assert_eq!(d.try_dequeue(RoutineKind::Clone).unwrap().request.id, id);
        let fallback = d.try_dequeue(RoutineKind::Clone).unwrap();
        assert!(fallback.request.code < CODE_SPACE);
    }

    #[test]
    fn remove_takes_request_out_of_queue() {
        let d = Dispatcher::new();
        let r = request(&d, TradeType::Dump);
        let id = r.id;
        d.enqueue(r, PriorityTier::TIER3);
        assert_eq!(d.remove(id).map(|r| r.id), Some(id));
        assert!(d.remove(id).is_none());
        assert_eq!(d.pending(RoutineKind::Dump), 0);
    }

    proptest! {
        #[test]
        fn dequeue_order_is_tier_then_arrival(tiers in proptest::collection::vec(1u32..5, 1..40)) {
            let d = Dispatcher::new();
            let mut expected = Vec::new();
            for (arrival, tier) in tiers.iter().enumerate() {
                let r = request(&d, TradeType::Specific);
                expected.push((*tier, arrival, r.id));
                d.enqueue(r, PriorityTier(*tier));
            }
            expected.sort();
            let order: Vec<u64> = std::iter::from_fn(|| d.try_dequeue(RoutineKind::LinkTrade))
                .map(|a| a.request.id)
                .collect();
            let expected_ids: Vec<u64> = expected.into_iter().map(|(_, _, id)| id).collect();
            prop_assert_eq!(order, expected_ids);
        }
    }
}
