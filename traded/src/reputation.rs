//! Partner reputation gate.
//!
//! Keeps two bounded histories of partners seen: one for distribution-style
//! trades (template matches and clones) and one for direct requests. A
//! partner is refused when banned, when they come back to a distribution
//! worker inside the cooldown, or when one online id shows up for two
//! different requesters.

use crate::events::{ABUSE_DETECTED, EventBus};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use trade_common::config::AbuseSection;
use trade_common::{PartnerInfo, TradeOutcome, TradeRequest, TradeType};

/// Which history a trade type is tracked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Distribution,
    Repeat,
}

impl HistoryKind {
    pub fn for_trade(trade_type: TradeType) -> Self {
        match trade_type {
            TradeType::Random | TradeType::Clone => Self::Distribution,
            TradeType::Specific | TradeType::Dump => Self::Repeat,
        }
    }
}

#[derive(Debug, Clone)]
struct SeenPartner {
    nid: u64,
    name: String,
    requester_id: u64,
    seen_at: Instant,
}

/// Ring buffer of recently seen partners, one entry per online id.
#[derive(Debug)]
struct PartnerHistory {
    entries: RwLock<VecDeque<SeenPartner>>,
    capacity: usize,
}

impl PartnerHistory {
    fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn find(&self, nid: u64) -> Option<SeenPartner> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().find(|e| e.nid == nid).cloned()
    }

    /// Insert or refresh `nid`, evicting the oldest entry when full.
    fn register(&self, nid: u64, name: &str, requester_id: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.nid != nid);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(SeenPartner {
            nid,
            name: name.to_string(),
            requester_id,
            seen_at: Instant::now(),
        });
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct ReputationGate {
    banned: HashSet<u64>,
    cooldown: Duration,
    echo_online_id: bool,
    mention: String,
    distribution: PartnerHistory,
    repeat: PartnerHistory,
    events: EventBus,
}

impl ReputationGate {
    pub fn new(section: &AbuseSection, events: EventBus) -> Self {
        Self {
            banned: section.banned_ids.iter().copied().collect(),
            cooldown: Duration::from_secs(section.trade_cooldown_mins * 60),
            echo_online_id: section.echo_online_id,
            mention: section.abuse_echo_mention.clone(),
            distribution: PartnerHistory::new(section.history_capacity),
            repeat: PartnerHistory::new(section.history_capacity),
            events,
        }
    }

    fn history(&self, kind: HistoryKind) -> &PartnerHistory {
        match kind {
            HistoryKind::Distribution => &self.distribution,
            HistoryKind::Repeat => &self.repeat,
        }
    }

    /// Number of partners currently remembered in `kind`.
    pub fn seen(&self, kind: HistoryKind) -> usize {
        self.history(kind).len()
    }

    /// Verdict on `partner` for `request`: `Success` or `SuspiciousActivity`.
    pub fn check(&self, worker: &str, request: &TradeRequest, partner: &PartnerInfo) -> TradeOutcome {
        if self.banned.contains(&partner.nid) {
            self.report(worker, partner, "banned", format!("{} is banned", partner.name));
            return TradeOutcome::SuspiciousActivity;
        }

        let kind = HistoryKind::for_trade(request.trade_type);
        let Some(previous) = self.history(kind).find(partner.nid) else {
            return TradeOutcome::Success;
        };

        if kind == HistoryKind::Distribution && !self.cooldown.is_zero() {
            let elapsed = previous.seen_at.elapsed();
            if elapsed < self.cooldown {
                let left = (self.cooldown - elapsed).as_secs().div_ceil(60);
                self.report(
                    worker,
                    partner,
                    "cooldown",
                    format!("{} is ignoring the trade cooldown ({left} min left)", partner.name),
                );
                return TradeOutcome::SuspiciousActivity;
            }
        }

        if kind == HistoryKind::Repeat
            && previous.requester_id != 0
            && request.trainer.id != 0
            && previous.requester_id != request.trainer.id
        {
            self.report(
                worker,
                partner,
                "multiple_accounts",
                format!(
                    "{} was previously seen as {} for another requester",
                    partner.name, previous.name
                ),
            );
            return TradeOutcome::SuspiciousActivity;
        }

        TradeOutcome::Success
    }

    /// Remember `partner` as traded with.
    pub fn register(&self, kind: HistoryKind, partner: &PartnerInfo, requester_id: u64) {
        debug!(nid = partner.nid, name = %partner.name, ?kind, "Registered partner");
        self.history(kind).register(partner.nid, &partner.name, requester_id);
    }

    /// Publish an abuse finding on the event bus.
    pub fn report(&self, worker: &str, partner: &PartnerInfo, reason: &str, detail: String) {
        let mut message = detail;
        if self.echo_online_id {
            message.push_str(&format!("\nID: {}", partner.nid));
        }
        if !self.mention.trim().is_empty() {
            message = format!("{} {message}", self.mention);
        }
        warn!(worker, partner = %partner.name, reason, "Abuse detected");
        self.events.emit(
            ABUSE_DETECTED,
            &json!({
                "worker": worker,
                "reason": reason,
                "partner": partner.name,
                "message": message,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trade_common::{NullNotifier, Payload, TrainerInfo};

    fn partner(nid: u64) -> PartnerInfo {
        PartnerInfo {
            nid,
            name: format!("P{nid}"),
            tid7: 123_456,
            sid7: 1,
            game: 50,
            gender: 0,
            language: 2,
        }
    }

    fn request(trade_type: TradeType, requester: u64) -> TradeRequest {
        TradeRequest::new(
            1,
            trade_type,
            Payload::empty(),
            TrainerInfo::new("Req", requester),
            1234_5678,
            Arc::new(NullNotifier),
        )
    }

    fn gate(section: AbuseSection) -> ReputationGate {
        ReputationGate::new(&section, EventBus::default())
    }

    #[test]
    fn banned_partner_is_refused() {
        let gate = gate(AbuseSection {
            banned_ids: vec![42],
            ..AbuseSection::default()
        });
        assert_eq!(
            gate.check("w1", &request(TradeType::Specific, 1), &partner(42)),
            TradeOutcome::SuspiciousActivity
        );
        assert_eq!(
            gate.check("w1", &request(TradeType::Specific, 1), &partner(43)),
            TradeOutcome::Success
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_applies_to_distribution_history_only() {
        let gate = gate(AbuseSection {
            trade_cooldown_mins: 5,
            ..AbuseSection::default()
        });
        let p = partner(7);
        gate.register(HistoryKind::Distribution, &p, 0);
        gate.register(HistoryKind::Repeat, &p, 1);

        assert_eq!(
            gate.check("w1", &request(TradeType::Random, 0), &p),
            TradeOutcome::SuspiciousActivity
        );
        assert_eq!(
            gate.check("w1", &request(TradeType::Specific, 1), &p),
            TradeOutcome::Success
        );

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(
            gate.check("w1", &request(TradeType::Clone, 0), &p),
            TradeOutcome::Success
        );
    }

    #[test]
    fn one_online_id_for_two_requesters_is_flagged() {
        let gate = gate(AbuseSection::default());
        let p = partner(9);
        gate.register(HistoryKind::Repeat, &p, 100);
        assert_eq!(
            gate.check("w1", &request(TradeType::Specific, 100), &p),
            TradeOutcome::Success
        );
        assert_eq!(
            gate.check("w1", &request(TradeType::Specific, 200), &p),
            TradeOutcome::SuspiciousActivity
        );
    }

    #[test]
    fn history_is_bounded_and_refreshes_in_place() {
        let gate = gate(AbuseSection {
            history_capacity: 2,
            ..AbuseSection::default()
        });
        gate.register(HistoryKind::Distribution, &partner(1), 0);
        gate.register(HistoryKind::Distribution, &partner(2), 0);
        gate.register(HistoryKind::Distribution, &partner(1), 0);
        assert_eq!(gate.seen(HistoryKind::Distribution), 2);
        gate.register(HistoryKind::Distribution, &partner(3), 0);
        assert_eq!(gate.seen(HistoryKind::Distribution), 2);
        assert!(gate.distribution.find(2).is_none());
        assert!(gate.distribution.find(1).is_some());
    }

    #[tokio::test]
    async fn abuse_event_carries_mention_and_id() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let gate = ReputationGate::new(
            &AbuseSection {
                banned_ids: vec![5],
                echo_online_id: true,
                abuse_echo_mention: "@mods".to_string(),
                ..AbuseSection::default()
            },
            events,
        );
        gate.check("w2", &request(TradeType::Random, 0), &partner(5));

        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["event"], ABUSE_DETECTED);
        assert_eq!(parsed["data"]["reason"], "banned");
        let text = parsed["data"]["message"].as_str().unwrap();
        assert!(text.starts_with("@mods "));
        assert!(text.ends_with("ID: 5"));
    }
}
