//! Clone-request sub-protocol.
//!
//! A clone requester can smuggle instructions into the payload they show:
//! the held item selects a trigger, the nickname carries the parameter.
//! [`detect`] turns an offer into a [`SwapInstructionSet`], [`apply`]
//! validates and applies it to produce the payload handed back.

pub mod apply;
pub mod detect;
pub mod ev;
pub mod genned;

pub use apply::{SwapContext, apply_set};
pub use detect::{detect_offer, detect_trash};
pub use ev::decode_ev_spread;
pub use genned::GennedRequest;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Kind of transformation a partner can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    ItemRequest,
    OtSwap,
    NicknameClear,
    DistroRequest,
    GennedRequest,
    BallSwap,
    TeraSwap,
    EvSpread,
}

impl SwapKind {
    pub const ALL: [SwapKind; 8] = [
        SwapKind::ItemRequest,
        SwapKind::OtSwap,
        SwapKind::NicknameClear,
        SwapKind::DistroRequest,
        SwapKind::GennedRequest,
        SwapKind::BallSwap,
        SwapKind::TeraSwap,
        SwapKind::EvSpread,
    ];

    /// Position in [`SwapKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ItemRequest => "Item Request",
            Self::OtSwap => "OT Swap",
            Self::NicknameClear => "Nickname Clear",
            Self::DistroRequest => "Distro Request",
            Self::GennedRequest => "Genned Request",
            Self::BallSwap => "Ball Swap",
            Self::TeraSwap => "Tera Swap",
            Self::EvSpread => "EV Spread",
        }
    }
}

impl fmt::Display for SwapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which shown payload an instruction was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSource {
    /// The payload to clone.
    Clone,
    /// The throw-away payload shown second.
    Trash,
    /// Implied by another instruction.
    Auto,
    /// Assembled from both payloads.
    Combo,
}

impl fmt::Display for InstructionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clone => "clone",
            Self::Trash => "trash",
            Self::Auto => "auto",
            Self::Combo => "combo",
        })
    }
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapInstruction {
    pub kind: SwapKind,
    pub source: InstructionSource,
    /// Raw parameter, e.g. the nickname or the ball name. Empty when unused.
    pub parameter: String,
}

impl SwapInstruction {
    pub fn new(kind: SwapKind, source: InstructionSource, parameter: impl Into<String>) -> Self {
        Self {
            kind,
            source,
            parameter: parameter.into(),
        }
    }

    pub fn bare(kind: SwapKind, source: InstructionSource) -> Self {
        Self::new(kind, source, String::new())
    }
}

impl fmt::Display for SwapInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameter.is_empty() {
            write!(f, "{} ({})", self.kind, self.source)
        } else {
            write!(f, "{}: {} ({})", self.kind, self.parameter, self.source)
        }
    }
}

/// Ordered instruction list with at most one entry per kind.
///
/// Order is detection order. A later detection of a kind already present
/// replaces the earlier entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapInstructionSet {
    list: Vec<SwapInstruction>,
}

impl SwapInstructionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, instruction: SwapInstruction) {
        match self.list.iter_mut().find(|i| i.kind == instruction.kind) {
            Some(existing) => *existing = instruction,
            None => self.list.push(instruction),
        }
    }

    pub fn contains(&self, kind: SwapKind) -> bool {
        self.list.iter().any(|i| i.kind == kind)
    }

    pub fn get(&self, kind: SwapKind) -> Option<&SwapInstruction> {
        self.list.iter().find(|i| i.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwapInstruction> {
        self.list.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = SwapKind> + '_ {
        self.list.iter().map(|i| i.kind)
    }

    /// One human-readable line per instruction.
    pub fn summarize(&self) -> Vec<String> {
        self.list.iter().map(ToString::to_string).collect()
    }
}

/// Why an instruction was refused.
///
/// Every variant surfaces to the requester as the same "request invalid"
/// outcome; the detail is only logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapRejection {
    #[error("{0} cannot be applied to an egg")]
    Egg(SwapKind),

    #[error("payload from version {0} is not supported")]
    UnsupportedVersion(u8),

    #[error("ball {0} cannot be applied")]
    BallNotAllowed(String),

    #[error("unknown {kind} parameter '{value}'")]
    UnknownParameter { kind: SwapKind, value: String },

    #[error("nickname cannot be cleared on this payload")]
    NicknameLocked,

    #[error("EV label '{label}' rejected: {reason}")]
    EvSpread { label: String, reason: String },

    #[error("item {0} cannot be held")]
    ItemNotHoldable(u16),

    #[error("no distribution template matches the offer")]
    NoTemplate,

    #[error("genned request rejected: {0}")]
    Genned(String),

    #[error("result failed legality: {0}")]
    Illegal(String),
}

impl SwapRejection {
    /// Text passed back to the requester along with the rejection.
    pub fn requester_report(&self) -> Option<&str> {
        match self {
            Self::Genned(reason) => Some(reason),
            Self::Illegal(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legality_report_reaches_requester() {
        let illegal = SwapRejection::Illegal("Invalid: ball".to_string());
        assert_eq!(illegal.requester_report(), Some("Invalid: ball"));
        let genned = SwapRejection::Genned("Ralts cannot be built".to_string());
        assert_eq!(genned.requester_report(), Some("Ralts cannot be built"));
        assert_eq!(SwapRejection::NoTemplate.requester_report(), None);
    }

    #[test]
    fn later_detection_replaces_in_place() {
        let mut set = SwapInstructionSet::new();
        set.update(SwapInstruction::new(SwapKind::EvSpread, InstructionSource::Clone, "MMMSSS"));
        set.update(SwapInstruction::bare(SwapKind::NicknameClear, InstructionSource::Auto));
        set.update(SwapInstruction::new(SwapKind::EvSpread, InstructionSource::Trash, "000000"));

        assert_eq!(set.len(), 2);
        let kinds: Vec<_> = set.kinds().collect();
        assert_eq!(kinds, vec![SwapKind::EvSpread, SwapKind::NicknameClear]);
        assert_eq!(set.get(SwapKind::EvSpread).unwrap().parameter, "000000");
    }

    #[test]
    fn summary_lines_name_kind_and_source() {
        let mut set = SwapInstructionSet::new();
        set.update(SwapInstruction::new(SwapKind::BallSwap, InstructionSource::Trash, "Dusk"));
        set.update(SwapInstruction::bare(SwapKind::OtSwap, InstructionSource::Clone));
        assert_eq!(
            set.summarize(),
            vec!["Ball Swap: Dusk (trash)".to_string(), "OT Swap (clone)".to_string()]
        );
    }

    #[test]
    fn kind_index_matches_all_order() {
        for (i, kind) in SwapKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
