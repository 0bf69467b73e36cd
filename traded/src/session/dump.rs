//! Dump trades: report on every payload the partner shows, trade nothing.

use super::{SessionError, TradeSession};
use crate::title::Title;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use trade_common::{Button, Payload, TradeOutcome, TradeRequest};

impl<T: Title> TradeSession<T> {
    pub(super) async fn process_dump(
        &mut self,
        request: &mut TradeRequest,
    ) -> Result<TradeOutcome, SessionError> {
        let limit = Duration::from_secs(self.config().trade.max_dump_trade_time_secs);
        let max_dumps = self.config().trade.max_dumps_per_trade;
        let started = Instant::now();

        let mut dumped = 0;
        let mut polls = 0u32;
        let mut previous = Payload::empty().detail_hash();
        while dumped < max_dumps && started.elapsed() < limit {
            if !self.title.is_in_box(&self.offsets).await? {
                break;
            }
            if polls % 3 == 0 {
                self.click(Button::B, 100).await?;
            }
            polls += 1;

            let shown = self
                .read_until_present(
                    self.offsets.partner_offered,
                    Duration::from_secs(3),
                    Duration::from_millis(50),
                )
                .await?;
            let Some(shown) = shown else { continue };
            if shown.species == 0 || shown.detail_hash() == previous {
                continue;
            }
            previous = shown.detail_hash();

            self.services.archive.save(request.trade_type.label(), &shown);
            let verdict = self.services.oracle.check(&shown);
            info!(
                worker = %self.worker,
                species = shown.species,
                valid = verdict.valid,
                "Shown payload checked"
            );

            dumped += 1;
            let mut text = if self.config().trade.dump_trade_legality_check {
                format!("```{}```", verdict.report)
            } else {
                format!("File {dumped}")
            };
            text.push_str(&trainer_block(&shown));
            request.notifier.message_with_payload(request.id, &shown, &text);
        }

        info!(worker = %self.worker, dumped, "Ended dump loop");
        if dumped == 0 {
            return Ok(TradeOutcome::TrainerTooSlow);
        }

        self.services.counters.add_dump();
        request
            .notifier
            .message(request.id, &format!("Dumped {dumped} Pokémon."));
        request.notifier.finished(request.id, &request.payload);
        Ok(TradeOutcome::Success)
    }
}

/// Trainer data and shiny note appended to each dump message.
fn trainer_block(shown: &Payload) -> String {
    let gender = if shown.ot_gender == 0 { "Male" } else { "Female" };
    let mut block = format!(
        "\n**Trainer Data**\n```OT: {}\nOTGender: {gender}\nTID: {:06}\nSID: {:04}```",
        shown.ot_name,
        shown.display_tid(),
        shown.display_sid()
    );
    if shown.is_shiny() {
        let egg = if shown.is_egg { "Egg " } else { "" };
        block.push_str(&format!("\n**This Pokémon {egg}is shiny!**"));
    }
    block
}
