//! Process-wide trade counters shared by every worker.

use crate::swap::{SwapInstructionSet, SwapKind};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use trade_common::TradeType;

#[derive(Debug, Default)]
pub struct TradeCounters {
    trades: AtomicU64,
    distributions: AtomicU64,
    clones: AtomicU64,
    dumps: AtomicU64,
    swaps: [AtomicU64; SwapKind::ALL.len()],
    genned_sets: AtomicU64,
}

/// Point-in-time copy of [`TradeCounters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub trades: u64,
    pub distributions: u64,
    pub clones: u64,
    pub dumps: u64,
    pub swaps: Vec<(SwapKind, u64)>,
}

impl TradeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed exchange under its trade type.
    pub fn record_completed(&self, trade_type: TradeType) {
        let counter = match trade_type {
            TradeType::Random => &self.distributions,
            TradeType::Clone => &self.clones,
            TradeType::Specific | TradeType::Dump => &self.trades,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dump(&self) {
        self.dumps.fetch_add(1, Ordering::Relaxed);
    }

    /// Count every instruction kind applied in one clone.
    pub fn add_swaps(&self, set: &SwapInstructionSet) {
        for kind in set.kinds() {
            self.swaps[kind.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sequence number for the next archived genned specification.
    pub fn next_genned_set(&self) -> u64 {
        self.genned_sets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            trades: self.trades.load(Ordering::Relaxed),
            distributions: self.distributions.load(Ordering::Relaxed),
            clones: self.clones.load(Ordering::Relaxed),
            dumps: self.dumps.load(Ordering::Relaxed),
            swaps: SwapKind::ALL
                .iter()
                .map(|kind| (*kind, self.swaps[kind.index()].load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::{InstructionSource, SwapInstruction};

    #[test]
    fn completed_trades_land_in_type_counters() {
        let counters = TradeCounters::new();
        counters.record_completed(TradeType::Random);
        counters.record_completed(TradeType::Clone);
        counters.record_completed(TradeType::Clone);
        counters.record_completed(TradeType::Specific);
        counters.add_dump();

        let snap = counters.snapshot();
        assert_eq!(snap.distributions, 1);
        assert_eq!(snap.clones, 2);
        assert_eq!(snap.trades, 1);
        assert_eq!(snap.dumps, 1);
    }

    #[test]
    fn swap_kinds_are_counted_once_per_set() {
        let counters = TradeCounters::new();
        let mut set = SwapInstructionSet::new();
        set.update(SwapInstruction::bare(SwapKind::OtSwap, InstructionSource::Clone));
        set.update(SwapInstruction::new(SwapKind::BallSwap, InstructionSource::Clone, "Dusk"));
        counters.add_swaps(&set);
        counters.add_swaps(&set);

        let snap = counters.snapshot();
        let ot = snap.swaps.iter().find(|(k, _)| *k == SwapKind::OtSwap).unwrap();
        assert_eq!(ot.1, 2);
        let tera = snap.swaps.iter().find(|(k, _)| *k == SwapKind::TeraSwap).unwrap();
        assert_eq!(tera.1, 0);
    }

    #[test]
    fn genned_set_numbers_start_at_one() {
        let counters = TradeCounters::new();
        assert_eq!(counters.next_genned_set(), 1);
        assert_eq!(counters.next_genned_set(), 2);
    }
}
