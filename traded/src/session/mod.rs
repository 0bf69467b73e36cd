//! Per-worker trade session state machine.
//!
//! A [`TradeSession`] owns one device session for one worker: the cached
//! offsets, the host trainer, the flags that let it skip redundant UI steps
//! between trades, and the worker's barrier membership. It drives a single
//! request from the portal through partner search, offer exchange and
//! confirmation, and always returns the device to a neutral portal position
//! before handing back an outcome.

mod clone;
mod dump;
mod policy;
mod random;
mod recovery;

pub use policy::{Prepared, RequestPolicy};

use crate::archive::PayloadArchive;
use crate::barrier::{BarrierMember, TradeBarrier};
use crate::counters::TradeCounters;
use crate::events::EventBus;
use crate::library::{LibraryError, TemplateTable};
use crate::reputation::{HistoryKind, ReputationGate};
use crate::title::{SessionOffsets, Title};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trade_common::{
    Button, DeviceError, Fingerprint, GameCatalog, PartnerInfo, Payload, PayloadOracle,
    RoutineKind, TradeConfig, TradeOutcome, TradeRequest, TradeType,
};

/// How long a button is held for a regular click.
const CLICK_HOLD_MS: u64 = 50;

/// Settling time after the exchange animation starts.
const TRADE_ANIMATION: Duration = Duration::from_secs(25);

// ── Shared services ─────────────────────────────────────────────────────

/// Collaborators shared by every worker.
pub struct TradeServices {
    pub config: Arc<TradeConfig>,
    pub catalog: Arc<dyn GameCatalog>,
    pub oracle: Arc<dyn PayloadOracle>,
    pub templates: Arc<TemplateTable>,
    pub counters: Arc<TradeCounters>,
    pub archive: PayloadArchive,
    pub events: EventBus,
    pub reputation: Arc<ReputationGate>,
    pub barrier: Arc<TradeBarrier>,
}

impl TradeServices {
    /// Build the shared services from configuration, loading the template table.
    pub fn from_config(
        config: TradeConfig,
        catalog: Arc<dyn GameCatalog>,
        oracle: Arc<dyn PayloadOracle>,
        events: EventBus,
    ) -> Result<Self, LibraryError> {
        let templates = TemplateTable::load(&config.distribution)?;
        let archive = if config.folder.dump {
            PayloadArchive::new(config.folder.dump_folder.clone())
        } else {
            PayloadArchive::disabled()
        };
        let reputation = ReputationGate::new(&config.abuse, events.clone());
        Ok(Self {
            config: Arc::new(config),
            catalog,
            oracle,
            templates: Arc::new(templates),
            counters: Arc::new(TradeCounters::new()),
            archive,
            events,
            reputation: Arc::new(reputation),
            barrier: Arc::new(TradeBarrier::new()),
        })
    }
}

// ── Session state ───────────────────────────────────────────────────────

/// Failure that escapes a request instead of becoming an outcome.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connectivity failure; ends the worker's run until it reconnects.
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("internal session error: {0}")]
    Internal(String),
}

/// Where the session currently is in the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitAssignment,
    EnsureOnline,
    EnterNegotiation,
    AwaitPartner,
    AwaitOffer,
    ConfirmExchange,
    Complete,
    Recover,
}

/// Flags carried between trades of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSessionState {
    /// Next trade must start from the overworld and reconnect.
    pub start_from_overworld: bool,
    pub last_distribution_fixed: bool,
    pub last_clone_fixed: bool,
    pub last_code_used: Option<u32>,
    /// Fingerprint of the partner offer seen at the end of the last trade.
    pub last_offered: Fingerprint,
}

impl Default for WorkerSessionState {
    fn default() -> Self {
        Self {
            start_from_overworld: true,
            last_distribution_fixed: false,
            last_clone_fixed: false,
            last_code_used: None,
            last_offered: [0; 8],
        }
    }
}

impl WorkerSessionState {
    /// Force the next trade through every step again.
    pub fn reset_flags(&mut self) {
        self.start_from_overworld = true;
        self.last_distribution_fixed = false;
        self.last_clone_fixed = false;
    }
}

/// Result of a step that may end the request early.
pub enum Step<T> {
    Continue(T),
    Finish(TradeOutcome),
}

/// Whether code entry for this request is surfaced to viewers.
///
/// Kept exactly as the long-standing condition: it reads as "anything but
/// a template match, or anything but a clone while idle cloning is on".
pub fn announces_code_entry(trade_type: TradeType, clone_while_idle: bool) -> bool {
    trade_type != TradeType::Random || (trade_type != TradeType::Clone && clone_while_idle)
}

/// Keypad position of a digit: rows of 1-2-3, 4-5-6, 7-8-9 and 0 centred below.
fn keypad_position(digit: u8) -> (u8, u8) {
    match digit {
        0 => (3, 1),
        d => ((d - 1) / 3, (d - 1) % 3),
    }
}

/// Button presses that type `code` as eight digits, starting from the
/// top-left key.
pub fn keypad_presses(code: u32) -> Vec<Button> {
    let digits = format!("{:08}", code % 100_000_000);
    let mut cursor = (0u8, 0u8);
    let mut presses = Vec::new();
    for digit in digits.bytes().map(|b| b - b'0') {
        let (row, col) = keypad_position(digit);
        let vertical = if row > cursor.0 { Button::DDown } else { Button::DUp };
        presses.extend(std::iter::repeat_n(vertical, usize::from(row.abs_diff(cursor.0))));
        let horizontal = if col > cursor.1 {
            Button::DRight
        } else {
            Button::DLeft
        };
        presses.extend(std::iter::repeat_n(horizontal, usize::from(col.abs_diff(cursor.1))));
        presses.push(Button::A);
        cursor = (row, col);
    }
    presses
}

// ── Session ─────────────────────────────────────────────────────────────

pub struct TradeSession<T: Title> {
    worker: String,
    title: T,
    services: Arc<TradeServices>,
    offsets: SessionOffsets,
    host: PartnerInfo,
    state: WorkerSessionState,
    barrier: BarrierMember,
    cancel: CancellationToken,
    initial_routine: RoutineKind,
    phase: Phase,
}

impl<T: Title> TradeSession<T> {
    /// Identify the host trainer and cache the session offsets.
    pub async fn login(
        title: T,
        services: Arc<TradeServices>,
        worker: impl Into<String>,
        initial_routine: RoutineKind,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let worker = worker.into();
        info!(worker = %worker, "Identifying trainer data of the host console");
        let offsets = title.resolve_offsets().await?;
        let host = title.read_host(&offsets).await?;
        if host.name.is_empty() {
            return Err(SessionError::Internal(
                "host trainer data is empty".to_string(),
            ));
        }
        info!(
            worker = %worker,
            trainer = %host.name,
            tid = host.tid7,
            "Identified host trainer"
        );

        let barrier = BarrierMember::new(
            services.barrier.clone(),
            worker.clone(),
            Duration::from_secs(services.config.distribution.synchronize_timeout_secs),
            services.events.clone(),
        );
        Ok(Self {
            worker,
            title,
            services,
            offsets,
            host,
            state: WorkerSessionState::default(),
            barrier,
            cancel,
            initial_routine,
            phase: Phase::AwaitAssignment,
        })
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn title(&self) -> &T {
        &self.title
    }

    pub fn host(&self) -> &PartnerInfo {
        &self.host
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &WorkerSessionState {
        &self.state
    }

    pub fn services(&self) -> &TradeServices {
        &self.services
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(worker = %self.worker, from = ?self.phase, to = ?phase, "Session phase");
            self.phase = phase;
        }
    }

    fn config(&self) -> &TradeConfig {
        &self.services.config
    }

    pub async fn set_current_box(&self, index: u8) -> Result<(), DeviceError> {
        self.title.set_current_box(&self.offsets, index).await
    }

    /// Make the next trade start from the overworld again.
    pub fn reset_flags(&mut self) {
        self.state.reset_flags();
    }

    /// Leave the barrier before the worker stops.
    pub fn hard_stop(&mut self) {
        self.barrier.leave();
        self.set_phase(Phase::AwaitAssignment);
        info!(worker = %self.worker, "Ending trade loop");
    }

    // ── Primitives ──

    async fn click(&self, button: Button, delay_ms: u64) -> Result<(), DeviceError> {
        self.title.device().press_button(button, CLICK_HOLD_MS).await?;
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }

    async fn press_and_hold(&self, button: Button, hold_ms: u64, delay_ms: u64) -> Result<(), DeviceError> {
        self.title.device().press_button(button, hold_ms).await?;
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }

    async fn enter_link_code(&self, code: u32) -> Result<(), DeviceError> {
        let delay = self.config().timings.keypress_time_ms;
        for button in keypad_presses(code) {
            self.click(button, delay).await?;
        }
        Ok(())
    }

    /// Poll the fingerprint at `offset` until it differs from `original`.
    async fn read_until_changed(
        &self,
        offset: u64,
        original: Fingerprint,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.title.read_fingerprint(offset).await? != original {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(interval).await;
        }
    }

    /// Poll the slot at `offset` until it holds a checksum-valid payload.
    async fn read_until_present(
        &self,
        offset: u64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Option<Payload>, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let payload = self.title.read_payload(offset).await?;
            if !payload.is_empty() && payload.checksum_valid() {
                return Ok(Some(payload));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(interval).await;
        }
    }

    // ── Trade flow ──

    /// Run one request to an outcome.
    ///
    /// Connectivity failures escape as [`SessionError::Device`]; every other
    /// path leaves the device in the portal.
    pub async fn perform_link_code_trade(
        &mut self,
        request: &mut TradeRequest,
    ) -> Result<TradeOutcome, SessionError> {
        let result = self.link_code_trade(request).await;
        if let Err(SessionError::Internal(reason)) = &result {
            warn!(worker = %self.worker, request_id = request.id, %reason, "Trade aborted internally");
            self.exit_trade_to_portal(true).await?;
        }
        let outcome = result?;
        self.set_phase(if outcome.is_success() {
            Phase::Complete
        } else {
            Phase::AwaitAssignment
        });
        Ok(outcome)
    }

    async fn link_code_trade(&mut self, request: &mut TradeRequest) -> Result<TradeOutcome, SessionError> {
        let should_sync = request.synchronized && self.config().distribution.synchronize_bots;
        self.barrier.update(should_sync);
        request.notifier.initialized(request.id);

        if let Some(outcome) = self.ensure_portal().await? {
            return Ok(outcome);
        }

        self.set_phase(Phase::EnterNegotiation);
        let mut to_send = request.payload.clone();
        if !to_send.is_empty() {
            self.title.write_payload(self.offsets.box_start, &to_send).await?;
        }

        info!(worker = %self.worker, "Selecting link trade");
        self.click(Button::A, 1_500).await?;
        self.enter_code_if_needed(request).await?;

        let random_code = self.config().distribution.random_code;
        let clone_while_idle = self.config().clone.clone_while_idle;
        if request.trade_type == TradeType::Random {
            self.state.last_distribution_fixed = !random_code;
        }
        if request.trade_type == TradeType::Clone && clone_while_idle {
            self.state.last_clone_fixed = !random_code;
        }

        self.set_phase(Phase::AwaitPartner);
        self.click(Button::A, 1_000).await?;
        self.title.clear_partner_nid(&self.offsets).await?;
        self.barrier.wait_if_applicable(should_sync).await;
        self.click(Button::A, 1_000).await?;
        request.notifier.searching(request.id);

        let found = self.wait_for_partner().await?;
        if self.cancel.is_cancelled() {
            self.state.reset_flags();
            self.exit_trade_to_portal(false).await?;
            return Ok(TradeOutcome::RoutineCancel);
        }
        if !found {
            info!(worker = %self.worker, request_id = request.id, "No trainer found");
            if !self.recover_to_portal().await? {
                warn!(worker = %self.worker, "Failed to recover to portal");
                self.recover_to_overworld().await?;
            }
            return Ok(TradeOutcome::NoTrainerFound);
        }

        if let Some(outcome) = self.wait_for_box().await? {
            return Ok(outcome);
        }

        let partner = self.title.read_partner(&self.offsets, &self.host).await?;
        if partner.nid == 0 {
            return Err(SessionError::Internal(
                "partner identity vanished after connecting".to_string(),
            ));
        }
        info!(
            worker = %self.worker,
            request_id = request.id,
            partner = %partner.name,
            tid = partner.tid7,
            nid = format_args!("{:016X}", partner.nid),
            requester = %request.trainer.name,
            "Found link trade partner"
        );

        let verdict = self.services.reputation.check(&self.worker, request, &partner);
        if !verdict.is_success() {
            self.click(Button::A, 1_000).await?;
            self.exit_trade_to_portal(false).await?;
            return Ok(verdict);
        }

        let history = HistoryKind::for_trade(request.trade_type);
        request.notifier.message(
            request.id,
            &format!(
                "Found Link Trade partner: {}. Waiting for a Pokémon...",
                partner.name
            ),
        );

        let policy = RequestPolicy::select(request.trade_type);
        let per_encounter = self.config().clone.trades_per_encounter;
        let mut exchanges = 0;
        while exchanges < per_encounter {
            if exchanges > 0 {
                self.services
                    .reputation
                    .register(history, &partner, request.trainer.id);
            }

            self.set_phase(Phase::AwaitOffer);
            let offered_at = self.offsets.partner_offered;
            let changed = self
                .read_until_changed(
                    offered_at,
                    self.state.last_offered,
                    Duration::from_secs(10),
                    Duration::from_millis(500),
                )
                .await?;
            if !changed {
                info!(worker = %self.worker, request_id = request.id, "Partner never offered");
                self.exit_trade_to_portal(false).await?;
                return Ok(TradeOutcome::TrainerTooSlow);
            }

            if policy == RequestPolicy::Dump {
                let outcome = self.process_dump(request).await?;
                self.exit_trade_to_portal(false).await?;
                return Ok(outcome);
            }

            let offered = self
                .read_until_present(offered_at, Duration::from_secs(25), Duration::from_secs(1))
                .await?;
            let offered_fingerprint = self.title.read_fingerprint(offered_at).await?;
            let Some(offered) = offered else {
                info!(worker = %self.worker, "Trade ended because a valid payload was not offered");
                self.exit_trade_to_portal(false).await?;
                return Ok(TradeOutcome::TrainerTooSlow);
            };

            let prepared = match policy
                .prepare(self, request, offered, offered_fingerprint, to_send, &partner)
                .await?
            {
                Step::Continue(prepared) => prepared,
                Step::Finish(outcome) => {
                    self.exit_trade_to_portal(false).await?;
                    return Ok(outcome);
                }
            };
            to_send = prepared.payload;

            self.set_phase(Phase::ConfirmExchange);
            info!(worker = %self.worker, request_id = request.id, "Confirming trade");
            let outcome = self.confirm_and_start_trading().await?;
            if !outcome.is_success() {
                self.exit_trade_to_portal(false).await?;
                return Ok(outcome);
            }

            if self.cancel.is_cancelled() {
                self.state.reset_flags();
                self.exit_trade_to_portal(false).await?;
                return Ok(TradeOutcome::RoutineCancel);
            }

            let received = self.title.read_payload(self.offsets.box_start).await?;
            if received.detail_hash() == to_send.detail_hash() && received.checksum == to_send.checksum {
                info!(worker = %self.worker, request_id = request.id, "User did not complete the trade");
                self.exit_trade_to_portal(false).await?;
                return Ok(TradeOutcome::TrainerTooSlow);
            }

            info!(worker = %self.worker, request_id = request.id, species = received.species, "User completed the trade");
            request.notifier.finished(request.id, &received);
            self.update_counts_and_export(request, &received, &to_send, prepared.swaps.as_ref());

            self.state.last_offered = self.title.read_fingerprint(offered_at).await?;

            if request.trade_type == TradeType::Random
                || (request.trade_type == TradeType::Clone
                    && self.initial_routine == RoutineKind::FlexTrade)
            {
                exchanges += 1;
            } else {
                exchanges = per_encounter;
            }
            if exchanges < per_encounter {
                sleep(Duration::from_millis(self.config().timings.extra_time_multi_trade_ms)).await;
            }
        }

        self.services
            .reputation
            .register(history, &partner, request.trainer.id);
        self.exit_trade_to_portal(false).await?;
        Ok(TradeOutcome::Success)
    }

    /// Get online and into the portal. `Some` ends the request.
    async fn ensure_portal(&mut self) -> Result<Option<TradeOutcome>, SessionError> {
        self.set_phase(Phase::EnsureOnline);
        if self.state.start_from_overworld && !self.title.is_on_overworld(&self.offsets).await? {
            self.recover_to_overworld().await?;
        }

        if !self.state.start_from_overworld && !self.title.is_online(&self.offsets).await? {
            self.recover_to_overworld().await?;
            if !self.connect_and_enter_portal().await? {
                self.recover_to_overworld().await?;
                return Ok(Some(TradeOutcome::RecoverStart));
            }
        } else if self.state.start_from_overworld && !self.connect_and_enter_portal().await? {
            self.recover_to_overworld().await?;
            return Ok(Some(TradeOutcome::RecoverStart));
        }
        Ok(None)
    }

    /// Type the request's link code unless the last fixed code still applies.
    async fn enter_code_if_needed(&mut self, request: &TradeRequest) -> Result<(), DeviceError> {
        let fixed = self.state.last_clone_fixed || self.state.last_distribution_fixed;
        let stale_fixed = fixed && self.state.last_code_used != Some(request.code);
        if fixed && !stale_fixed {
            debug!(worker = %self.worker, code = request.code, "Reusing fixed link code");
            return Ok(());
        }

        self.click(Button::X, 1_000).await?;
        self.click(Button::Plus, 1_000).await?;
        if announces_code_entry(request.trade_type, self.config().clone.clone_while_idle) {
            debug!(worker = %self.worker, request_id = request.id, "Announcing code entry");
        }
        sleep(Duration::from_millis(self.config().timings.extra_time_open_code_entry_ms)).await;

        info!(
            worker = %self.worker,
            "Entering link trade code: {:04} {:04}...",
            request.code / 10_000,
            request.code % 10_000
        );
        self.enter_link_code(request.code).await?;
        self.click(Button::Plus, 3_000).await?;
        self.state.start_from_overworld = false;
        self.state.last_code_used = Some(request.code);
        Ok(())
    }

    /// Poll for a non-zero partner identity within the configured wait.
    async fn wait_for_partner(&mut self) -> Result<bool, DeviceError> {
        info!(worker = %self.worker, "Waiting for trainer...");
        let budget = Duration::from_secs(self.config().trade.trade_wait_time_secs);
        let deadline = Instant::now() + budget;
        sleep(Duration::from_secs(2)).await;
        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            sleep(Duration::from_secs(1)).await;
            if self.title.read_partner_nid(&self.offsets).await? != 0 {
                self.offsets.partner_offered = self.title.resolve_partner_offered().await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Wait for the box to open after a partner connected. `Some` ends the request.
    async fn wait_for_box(&mut self) -> Result<Option<TradeOutcome>, SessionError> {
        let mut polls = 0;
        while !self.title.is_in_box(&self.offsets).await? {
            sleep(Duration::from_millis(500)).await;
            polls += 1;
            if polls > 20 {
                self.click(Button::A, 1_000).await?;
                if !self.recover_to_portal().await? {
                    warn!(worker = %self.worker, "Failed to recover to portal");
                    self.recover_to_overworld().await?;
                }
                return Ok(Some(TradeOutcome::RecoverOpenBox));
            }
        }
        sleep(Duration::from_millis(3_000 + self.config().timings.extra_time_open_box_ms)).await;
        Ok(None)
    }

    /// Press through the confirmation and watch the box slot change.
    async fn confirm_and_start_trading(&self) -> Result<TradeOutcome, DeviceError> {
        let original = self.title.read_fingerprint(self.offsets.box_start).await?;
        self.click(Button::A, 3_000).await?;
        for _ in 0..self.config().trade.max_trade_confirm_iterations {
            if !self.title.is_in_box(&self.offsets).await? {
                return Ok(TradeOutcome::TrainerLeft);
            }
            self.click(Button::A, 1_000).await?;
            if self.title.read_fingerprint(self.offsets.box_start).await? != original {
                sleep(TRADE_ANIMATION).await;
                return Ok(TradeOutcome::Success);
            }
        }
        Ok(TradeOutcome::TrainerTooSlow)
    }

    fn update_counts_and_export(
        &self,
        request: &TradeRequest,
        received: &Payload,
        sent: &Payload,
        swaps: Option<&crate::swap::SwapInstructionSet>,
    ) {
        let counters = &self.services.counters;
        counters.record_completed(request.trade_type);
        if let Some(swaps) = swaps {
            counters.add_swaps(swaps);
        }

        let archive = &self.services.archive;
        archive.save(request.trade_type.label(), received);
        if matches!(request.trade_type, TradeType::Specific | TradeType::Clone) {
            archive.save("traded", sent);
        }
    }
}
