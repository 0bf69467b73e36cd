//! Error types shared by the device transport and the payload oracle.

use thiserror::Error;

/// Failure of the remote device transport.
///
/// Every variant is a connectivity error as far as the trade engine is
/// concerned: it is never swallowed inside a request and always ends the
/// worker's current run so the reconnect ladder can take over.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("device call timed out after {0} ms")]
    Timeout(u64),

    #[error("device protocol error: {0}")]
    Protocol(String),

    #[error("pointer chain {0} could not be resolved")]
    PointerUnresolved(String),
}

impl DeviceError {
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Failure to materialise a payload from a textual specification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("unable to parse specification: {}", .0.join("; "))]
    InvalidLines(Vec<String>),

    #[error("generation timed out")]
    Timeout,

    #[error("oracle version mismatch")]
    VersionMismatch,

    #[error("unable to build {species}: {reason}")]
    Unbuildable { species: String, reason: String },
}

impl OracleError {
    /// Requester-facing explanation, phrased per failure class.
    pub fn user_message(&self, species: &str) -> String {
        match self {
            Self::Timeout => format!("That {species} set took too long to generate."),
            Self::VersionMismatch => "Request refused: oracle version mismatch.".to_string(),
            _ => format!("I wasn't able to create a {species} from that set."),
        }
    }
}
