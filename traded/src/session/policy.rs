//! Per-request handling of the partner's offer.

use super::{SessionError, Step, TradeSession};
use crate::swap::SwapInstructionSet;
use crate::title::Title;
use trade_common::{Fingerprint, PartnerInfo, Payload, TradeRequest, TradeType};

/// What gets handed to the partner, and the clone instructions behind it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub payload: Payload,
    pub swaps: Option<SwapInstructionSet>,
}

impl Prepared {
    fn plain(payload: Payload) -> Self {
        Self {
            payload,
            swaps: None,
        }
    }
}

/// Offer handling selected once per request from its trade type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Deliver the queued payload as is.
    Specific,
    /// Answer the offer from the template table.
    Random,
    /// Echo the offer back with requested changes.
    Clone,
    /// Record every offer; nothing is exchanged.
    Dump,
}

impl RequestPolicy {
    pub fn select(trade_type: TradeType) -> Self {
        match trade_type {
            TradeType::Specific => Self::Specific,
            TradeType::Random => Self::Random,
            TradeType::Clone => Self::Clone,
            TradeType::Dump => Self::Dump,
        }
    }

    /// Decide the payload to send for `offered`.
    ///
    /// Writes the result to the first box slot when it differs from what is
    /// already there.
    pub async fn prepare<T: Title>(
        self,
        session: &mut TradeSession<T>,
        request: &mut TradeRequest,
        offered: Payload,
        offered_fingerprint: Fingerprint,
        to_send: Payload,
        partner: &PartnerInfo,
    ) -> Result<Step<Prepared>, SessionError> {
        match self {
            Self::Specific | Self::Dump => Ok(Step::Continue(Prepared::plain(to_send))),
            Self::Random => Ok(match session.handle_random(request, &offered, to_send, partner).await? {
                Step::Continue(payload) => Step::Continue(Prepared::plain(payload)),
                Step::Finish(outcome) => Step::Finish(outcome),
            }),
            Self::Clone => {
                session
                    .handle_clone(request, offered, offered_fingerprint, partner)
                    .await
            }
        }
    }
}
