//! Remote device transport contract.
//!
//! The daemon never speaks the wire protocol itself. It sees the device as
//! a set of suspending primitives that may fail with a [`DeviceError`].

use crate::errors::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual controller buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    L,
    R,
    Plus,
    Minus,
    Home,
    DUp,
    DDown,
    DLeft,
    DRight,
}

/// Pointer chain: base offset followed by dereference offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointerPath(pub Vec<u64>);

impl PointerPath {
    pub fn new(hops: impl Into<Vec<u64>>) -> Self {
        Self(hops.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PointerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{hop:#x}")?;
        }
        f.write_str("]")
    }
}

/// Asynchronous device primitives.
///
/// Implementations must be safe to share, but the engine never issues two
/// calls concurrently for the same worker.
#[async_trait]
pub trait DeviceFacade: Send + Sync {
    async fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError>;

    async fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<(), DeviceError>;

    async fn resolve_pointer_chain(&self, path: &PointerPath) -> Result<u64, DeviceError>;

    /// Press and release a button, holding it for `hold_ms`.
    async fn press_button(&self, button: Button, hold_ms: u64) -> Result<(), DeviceError>;

    async fn is_process_running(&self, id: u64) -> Result<bool, DeviceError>;

    /// Re-establish the transport after a connectivity failure.
    async fn reset_connection(&self) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_path_display_is_hex() {
        let path = PointerPath::new(vec![0x4617648, 0xD8, 0x30]);
        assert_eq!(path.to_string(), "[0x4617648, 0xd8, 0x30]");
    }

    #[test]
    fn pointer_path_serializes_as_list() {
        let path = PointerPath::new(vec![1, 2, 3]);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "[1,2,3]");
    }
}
