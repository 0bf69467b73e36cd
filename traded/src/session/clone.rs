//! Clone trades.
//!
//! The partner shows the payload they want copied, then swaps it for a
//! throw-away one. Instructions hidden in either payload are collected and
//! applied to the copy before it is written back for the exchange.

use super::{Prepared, SessionError, Step, TradeSession};
use crate::swap::{SwapContext, apply_set, detect_offer, detect_trash};
use crate::title::Title;
use std::time::Duration;
use tracing::{info, warn};
use trade_common::catalog::version;
use trade_common::{Button, Fingerprint, PartnerInfo, Payload, TradeOutcome, TradeRequest, TrainerInfo};

const CHANGE_OFFER_WAIT: Duration = Duration::from_secs(15);
const CHANGE_OFFER_POLL: Duration = Duration::from_millis(200);

impl<T: Title> TradeSession<T> {
    fn species_label(&self, species: u16) -> String {
        self.services
            .catalog
            .species_name(species)
            .unwrap_or_else(|| format!("#{species}"))
    }

    pub(super) async fn handle_clone(
        &mut self,
        request: &mut TradeRequest,
        offered: Payload,
        offered_fingerprint: Fingerprint,
        partner: &PartnerInfo,
    ) -> Result<Step<Prepared>, SessionError> {
        if self.config().trade.return_shown_payload {
            request
                .notifier
                .message_with_payload(request.id, &offered, "Here's what you showed me!");
        }

        request.payload = offered.clone();
        request.trainer = TrainerInfo::new(partner.name.clone(), u64::from(partner.tid7));

        let species = self.species_label(offered.species);
        let verdict = self.services.oracle.check(&offered);
        if !verdict.valid {
            info!(
                worker = %self.worker,
                requester = %request.trainer.name,
                %species,
                "Clone request has an invalid payload"
            );
            self.services.archive.save("hacked", &offered);
            request.notifier.message(
                request.id,
                "This Pokémon is not legal per the legality checks. I am forbidden from cloning this. Exiting trade.",
            );
            request.notifier.message(request.id, &verdict.report);
            return Ok(Step::Finish(TradeOutcome::IllegalTrade));
        }

        let catalog = self.services.catalog.clone();
        let mut swaps = detect_offer(&offered, &self.config().clone, catalog.as_ref());
        let mut clone = offered.clone();
        if swaps.len() > 1 {
            clone.nickname = self.species_label(clone.species);
            clone.is_nicknamed = false;
        }

        request.notifier.message(
            request.id,
            &format!(
                "**Cloned your {species}!**\nNow press B to cancel your offer and trade me a Pokémon you don't want."
            ),
        );
        info!(worker = %self.worker, "Clone request started, waiting for the throw-away offer");

        let offered_at = self.offsets.partner_offered;
        let mut changed = self
            .read_until_changed(offered_at, offered_fingerprint, CHANGE_OFFER_WAIT, CHANGE_OFFER_POLL)
            .await?;
        if !changed {
            request
                .notifier
                .message(request.id, "**HEY CHANGE IT NOW OR I AM LEAVING!!!**");
            changed = self
                .read_until_changed(offered_at, offered_fingerprint, CHANGE_OFFER_WAIT, CHANGE_OFFER_POLL)
                .await?;
        }

        let trash = self
            .read_until_present(offered_at, Duration::from_secs(25), Duration::from_secs(1))
            .await?;
        let trash = match trash {
            Some(trash) if changed && trash.detail_hash() != offered.detail_hash() => trash,
            _ => {
                info!(worker = %self.worker, "Trade partner did not change their offer");
                return Ok(Step::Finish(TradeOutcome::TrainerTooSlow));
            }
        };

        detect_trash(&trash, &self.config().clone, catalog.as_ref(), &mut swaps);
        request.swap_summary = swaps.summarize();
        if swaps.is_empty() {
            info!(worker = %self.worker, "Clone request finalized: regular clone");
        } else {
            info!(
                worker = %self.worker,
                requests = %request.swap_summary.join("; "),
                "Clone request finalized"
            );
        }

        let applied = {
            let services = &self.services;
            let ctx = SwapContext {
                catalog: services.catalog.as_ref(),
                oracle: services.oracle.as_ref(),
                partner,
                host: &self.host,
                templates: &services.templates,
                counters: &services.counters,
                archive: &services.archive,
            };
            apply_set(&swaps, &clone, &ctx).await
        };
        clone = match applied {
            Ok(payload) => payload,
            Err(rejection) => {
                warn!(worker = %self.worker, request_id = request.id, %rejection, "Clone instruction rejected");
                if let Some(report) = rejection.requester_report() {
                    request.notifier.message(request.id, report);
                }
                return Ok(Step::Finish(TradeOutcome::TrainerRequestBad));
            }
        };

        if clone.encryption_constant == 0 {
            self.services.archive.save("hacked", &clone);
            warn!(worker = %self.worker, "Clone result has a zero encryption constant, aborting trade");
            return Ok(Step::Finish(TradeOutcome::IllegalTrade));
        }

        clone.refresh_checksum();
        let verdict = self.services.oracle.check(&clone);
        if !verdict.valid {
            self.services.archive.save("hackedClone", &clone);
            warn!(worker = %self.worker, report = %verdict.report, "Clone result is illegal, aborting trade");
            request.notifier.message(request.id, &verdict.report);
            return Ok(Step::Finish(TradeOutcome::IllegalTrade));
        }

        if self.config().legality.reset_home_tracker
            && version::is_supported(clone.version)
            && !swaps.is_empty()
        {
            clone.tracker = 0;
        }
        clone.refresh_checksum();
        request.payload = clone.clone();

        self.click(Button::A, 800).await?;
        self.title.write_payload(self.offsets.box_start, &clone).await?;
        Ok(Step::Continue(Prepared {
            payload: clone,
            swaps: Some(swaps),
        }))
    }
}
