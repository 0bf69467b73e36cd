//! Payload legality and materialisation contract.

use crate::errors::OracleError;
use crate::payload::Payload;
use crate::types::PartnerInfo;
use async_trait::async_trait;

/// Verdict on one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalityReport {
    pub valid: bool,
    /// Human-readable explanation; surfaced to requesters on rejection.
    pub report: String,
}

impl LegalityReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            report: "Legal!".to_string(),
        }
    }

    pub fn invalid(report: impl Into<String>) -> Self {
        Self {
            valid: false,
            report: report.into(),
        }
    }
}

/// A payload built from a textual specification.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    pub payload: Payload,
    pub diagnostics: Vec<String>,
}

/// External authority on payload validity.
#[async_trait]
pub trait PayloadOracle: Send + Sync {
    /// Check a payload against the legality rule set.
    fn check(&self, payload: &Payload) -> LegalityReport;

    /// Materialise a payload from specification text, owned by `partner`.
    async fn build_from_spec(
        &self,
        text: &str,
        partner: &PartnerInfo,
    ) -> Result<BuiltPayload, OracleError>;
}
