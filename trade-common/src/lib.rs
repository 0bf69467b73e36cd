//! Shared types and utilities for the link trade daemon.
//!
//! This crate holds everything the orchestration engine and its
//! collaborators agree on: trade requests and outcomes, the payload
//! record and its slot codec, the device/oracle/catalog contracts,
//! configuration loading and logging setup.

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod device;
pub mod errors;
pub mod logging;
pub mod mock_device;
pub mod notify;
pub mod oracle;
pub mod payload;
pub mod types;

pub use catalog::{Ball, EncounterOrigins, GameCatalog, GenderRatio, TeraType};
pub use config::{ConfigError, TradeConfig};
pub use device::{Button, DeviceFacade, PointerPath};
pub use errors::{DeviceError, OracleError};
pub use logging::{LogConfig, init_logging};
pub use notify::{NullNotifier, TradeNotifier};
pub use oracle::{BuiltPayload, LegalityReport, PayloadOracle};
pub use payload::{Fingerprint, Payload, SLOT_SIZE};
pub use types::{
    PartnerInfo, PriorityTier, RoutineKind, TradeOutcome, TradeRequest, TradeType, TrainerInfo,
};
