//! Common types used across the trade daemon components.

use crate::notify::TradeNotifier;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of trade a requester asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    /// Deliver a specific payload supplied by the requester.
    Specific,
    /// Fulfil whatever the partner asks for from the template table.
    Random,
    /// Hand back a (possibly transformed) copy of what the partner shows.
    Clone,
    /// Record everything the partner shows without trading.
    Dump,
}

impl TradeType {
    /// The routine queue a request of this type is served from.
    pub fn routine(self) -> RoutineKind {
        match self {
            Self::Specific | Self::Random => RoutineKind::LinkTrade,
            Self::Clone => RoutineKind::Clone,
            Self::Dump => RoutineKind::Dump,
        }
    }

    /// Lowercase label used for archive sub-folders and log fields.
    pub fn label(self) -> &'static str {
        match self {
            Self::Specific => "specific",
            Self::Random => "random",
            Self::Clone => "clone",
            Self::Dump => "dump",
        }
    }
}

impl std::fmt::Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which queue a worker is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    /// Worker waits for reassignment.
    #[default]
    Idle,
    /// Specific and random trades.
    LinkTrade,
    /// Clone requests only.
    Clone,
    /// Dump requests only.
    Dump,
    /// Every queue, best tier first.
    FlexTrade,
}

impl RoutineKind {
    /// Whether a worker in this routine processes trades at all.
    pub fn is_trading(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Numeric priority bucket; lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriorityTier(pub u32);

impl PriorityTier {
    pub const FAVORED: Self = Self(1);
    pub const TIER2: Self = Self(2);
    pub const TIER3: Self = Self(3);
    /// Lowest priority, used by idle fallback sources.
    pub const FREE: Self = Self(u32::MAX);
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::FREE {
            f.write_str("free")
        } else {
            write!(f, "tier{}", self.0)
        }
    }
}

/// Who submitted a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerInfo {
    pub name: String,
    pub id: u64,
}

impl TrainerInfo {
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Identity of the trade partner as read from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerInfo {
    /// Online identity of the partner (never zero once connected).
    pub nid: u64,
    pub name: String,
    /// Seven-digit display trainer id.
    pub tid7: u32,
    /// Four-digit display secret id.
    pub sid7: u32,
    /// Origin version of the partner's save.
    pub game: u8,
    pub gender: u8,
    pub language: u8,
}

/// Size of one trainer status block on the device.
pub const STATUS_SIZE: usize = 0x24;

impl PartnerInfo {
    /// Decode a trainer status block.
    ///
    /// Layout: combined id (u32 LE) at 0, game at 4, gender at 5,
    /// language at 7, UTF-16 name at 8.
    pub fn from_status(nid: u64, bytes: &[u8]) -> Self {
        let mut block = [0u8; STATUS_SIZE];
        let len = bytes.len().min(STATUS_SIZE);
        block[..len].copy_from_slice(&bytes[..len]);

        let id32 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        Self {
            nid,
            name: crate::payload::get_name(&block, 8),
            tid7: id32 % 1_000_000,
            sid7: id32 / 1_000_000,
            game: block[4],
            gender: block[5],
            language: block[7],
        }
    }

    /// Encode as a trainer status block.
    pub fn to_status(&self) -> Vec<u8> {
        let mut block = vec![0u8; STATUS_SIZE];
        let id32 = self.sid7.wrapping_mul(1_000_000).wrapping_add(self.tid7);
        block[..4].copy_from_slice(&id32.to_le_bytes());
        block[4] = self.game;
        block[5] = self.gender;
        block[7] = self.language;
        crate::payload::put_name(&mut block, 8, &self.name);
        block
    }

    /// Same trainer as `other`, ignoring the online identity.
    pub fn same_trainer(&self, other: &Self) -> bool {
        self.name == other.name && self.tid7 == other.tid7 && self.sid7 == other.sid7
    }
}

/// Closed set of results a trade session can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Success,
    NoTrainerFound,
    TrainerTooSlow,
    TrainerLeft,
    RecoverStart,
    RecoverOpenBox,
    RoutineCancel,
    SuspiciousActivity,
    IllegalTrade,
    TrainerRequestBad,
    ExceptionConnection,
    ExceptionInternal,
}

impl TradeOutcome {
    /// Outcomes caused by discovery, recovery or infrastructure trouble.
    ///
    /// Partner-caused outcomes (slow, left, bad request, illegal payload,
    /// abuse) are final for the request.
    pub fn should_attempt_retry(self) -> bool {
        matches!(
            self,
            Self::NoTrainerFound
                | Self::RecoverStart
                | Self::RecoverOpenBox
                | Self::RoutineCancel
                | Self::ExceptionConnection
                | Self::ExceptionInternal
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::NoTrainerFound => "no_trainer_found",
            Self::TrainerTooSlow => "trainer_too_slow",
            Self::TrainerLeft => "trainer_left",
            Self::RecoverStart => "recover_start",
            Self::RecoverOpenBox => "recover_open_box",
            Self::RoutineCancel => "routine_cancel",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::IllegalTrade => "illegal_trade",
            Self::TrainerRequestBad => "trainer_request_bad",
            Self::ExceptionConnection => "exception_connection",
            Self::ExceptionInternal => "exception_internal",
        };
        f.write_str(label)
    }
}

/// A queued trade.
///
/// Owned by the dispatcher while queued and moved to exactly one worker
/// when dequeued.
#[derive(Clone)]
pub struct TradeRequest {
    pub id: u64,
    pub trade_type: TradeType,
    /// Payload to deliver; an empty payload (species 0) means "nothing to inject".
    pub payload: Payload,
    pub trainer: TrainerInfo,
    /// Eight-digit link code.
    pub code: u32,
    /// Whether this request wants synchronized starts across workers.
    pub synchronized: bool,
    pub is_retry: bool,
    pub processing: bool,
    /// Human-readable summary of applied clone instructions.
    pub swap_summary: Vec<String>,
    pub notifier: Arc<dyn TradeNotifier>,
}

impl TradeRequest {
    pub fn new(
        id: u64,
        trade_type: TradeType,
        payload: Payload,
        trainer: TrainerInfo,
        code: u32,
        notifier: Arc<dyn TradeNotifier>,
    ) -> Self {
        Self {
            id,
            trade_type,
            payload,
            trainer,
            code,
            synchronized: false,
            is_retry: false,
            processing: false,
            swap_summary: Vec::new(),
            notifier,
        }
    }

    /// Mark this request as wanting synchronized starts.
    pub fn synchronized(mut self, synchronized: bool) -> Self {
        self.synchronized = synchronized;
        self
    }
}

impl std::fmt::Debug for TradeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeRequest")
            .field("id", &self.id)
            .field("trade_type", &self.trade_type)
            .field("species", &self.payload.species)
            .field("trainer", &self.trainer)
            .field("code", &self.code)
            .field("synchronized", &self.synchronized)
            .field("is_retry", &self.is_retry)
            .field("processing", &self.processing)
            .finish()
    }
}
