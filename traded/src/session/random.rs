//! Template answers for distribution trades.

use super::{SessionError, Step, TradeSession};
use crate::library::TemplateLookup;
use crate::title::Title;
use tracing::info;
use trade_common::{PartnerInfo, Payload, TradeOutcome, TradeRequest};

impl<T: Title> TradeSession<T> {
    /// Swap `to_send` for the template matching `offered`, if any.
    pub(super) async fn handle_random(
        &mut self,
        request: &mut TradeRequest,
        offered: &Payload,
        to_send: Payload,
        partner: &PartnerInfo,
    ) -> Result<Step<Payload>, SessionError> {
        match self.services.templates.request(offered, partner.nid) {
            TemplateLookup::Abuse => {
                self.services.reputation.report(
                    &self.worker,
                    partner,
                    "template_abuse",
                    format!("{} has been detected for abusing template trades.", partner.name),
                );
                Ok(Step::Finish(TradeOutcome::SuspiciousActivity))
            }
            TemplateLookup::Matched(response) => {
                info!(
                    worker = %self.worker,
                    request_id = request.id,
                    species = response.species,
                    "Template matched offer"
                );
                request.payload = response.clone();
                request.notifier.message(
                    request.id,
                    &format!("Injecting the requested Pokémon {}.", response.nickname),
                );
                self.title.write_payload(self.offsets.box_start, &response).await?;
                Ok(Step::Continue(response))
            }
            TemplateLookup::NoMatch if self.config().distribution.quit_if_no_match => {
                Ok(Step::Finish(TradeOutcome::TrainerRequestBad))
            }
            TemplateLookup::NoMatch => Ok(Step::Continue(to_send)),
        }
    }
}
