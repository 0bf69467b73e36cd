//! Trade worker: one device, one session, one loop.
//!
//! A worker logs into its device, then repeatedly reads its routine and
//! either idles or serves requests from the dispatcher. Connectivity
//! failures interrupt the loop and go through the reconnect ladder; any
//! other failure is turned into an outcome and the loop carries on.

use crate::events::{CLONE_RESULT, TRADE_FINISHED, TRADE_STARTED};
use crate::queue::{Assignment, Dispatcher};
use crate::retry::{ReconnectPolicy, RetryDecision, classify};
use crate::session::{SessionError, TradeServices, TradeSession};
use crate::title::Title;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trade_common::{DeviceError, PriorityTier, RoutineKind, TradeOutcome, TradeRequest, TradeType};

const QUEUE_POLL: Duration = Duration::from_secs(1);

/// Why a worker's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    ReconnectFailed,
    LoginFailed,
}

/// Handle for steering a running worker.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    routine: Arc<watch::Sender<RoutineKind>>,
    cancel: CancellationToken,
}

impl WorkerControl {
    /// Switch routines; the worker picks it up after its current trade.
    pub fn set_routine(&self, routine: RoutineKind) {
        self.routine.send_replace(routine);
    }

    pub fn routine(&self) -> RoutineKind {
        *self.routine.borrow()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct TradeWorker<T: Title> {
    name: String,
    title: T,
    services: Arc<TradeServices>,
    dispatcher: Arc<Dispatcher>,
    routine: watch::Receiver<RoutineKind>,
    initial_routine: RoutineKind,
    cancel: CancellationToken,
}

impl<T: Title> TradeWorker<T> {
    pub fn new(
        name: impl Into<String>,
        title: T,
        services: Arc<TradeServices>,
        dispatcher: Arc<Dispatcher>,
        initial_routine: RoutineKind,
    ) -> (Self, WorkerControl) {
        let (tx, rx) = watch::channel(initial_routine);
        let cancel = CancellationToken::new();
        let control = WorkerControl {
            routine: Arc::new(tx),
            cancel: cancel.clone(),
        };
        let worker = Self {
            name: name.into(),
            title,
            services,
            dispatcher,
            routine: rx,
            initial_routine,
            cancel,
        };
        (worker, control)
    }

    /// Run until cancelled or the device is lost for good.
    pub async fn run(self) -> WorkerExit {
        let Self {
            name,
            title,
            services,
            dispatcher,
            routine,
            initial_routine,
            cancel,
        } = self;

        let session = TradeSession::login(
            title,
            services.clone(),
            name.clone(),
            initial_routine,
            cancel.clone(),
        )
        .await;
        let mut session = match session {
            Ok(session) => session,
            Err(e) => {
                warn!(worker = %name, error = %e, "Login failed");
                return WorkerExit::LoginFailed;
            }
        };

        let runner = Runner {
            name,
            services,
            dispatcher,
            routine,
            initial_routine,
            cancel,
        };
        info!(worker = %runner.name, "Starting main trade loop");
        let exit = runner.inner_loop(&mut session).await;
        session.hard_stop();
        exit
    }
}

/// Everything the loop needs once the session owns the title.
struct Runner {
    name: String,
    services: Arc<TradeServices>,
    dispatcher: Arc<Dispatcher>,
    routine: watch::Receiver<RoutineKind>,
    initial_routine: RoutineKind,
    cancel: CancellationToken,
}

impl Runner {
    fn current_routine(&self) -> RoutineKind {
        *self.routine.borrow()
    }

    async fn inner_loop<T: Title>(&self, session: &mut TradeSession<T>) -> WorkerExit {
        let reconnect = ReconnectPolicy::from_config(&self.services.config.timings);
        while !self.cancel.is_cancelled() {
            let routine = self.current_routine();
            let result = if routine.is_trading() {
                self.do_trades(session, routine).await
            } else {
                self.do_nothing().await;
                Ok(())
            };

            if let Err(e) = result {
                warn!(worker = %self.name, error = %e, "Lost connection to device");
                let device = session.title().device();
                if !reconnect
                    .reconnect(device, &self.name, &self.services.events, &self.cancel)
                    .await
                {
                    return if self.cancel.is_cancelled() {
                        WorkerExit::Cancelled
                    } else {
                        WorkerExit::ReconnectFailed
                    };
                }
                session.reset_flags();
            }
        }
        WorkerExit::Cancelled
    }

    async fn do_nothing(&self) {
        info!(worker = %self.name, "No task assigned, waiting for new task assignment");
        while !self.cancel.is_cancelled() && !self.current_routine().is_trading() {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(QUEUE_POLL) => {}
            }
        }
    }

    async fn do_trades<T: Title>(
        &self,
        session: &mut TradeSession<T>,
        routine: RoutineKind,
    ) -> Result<(), DeviceError> {
        session.set_current_box(0).await?;
        let mut waited = 0u32;
        while !self.cancel.is_cancelled() && self.current_routine() == routine {
            let Some(Assignment { mut request, tier }) = self.dispatcher.try_dequeue(routine) else {
                if waited == 0 {
                    info!(worker = %self.name, "Nothing to check, waiting for new users...");
                }
                waited += 1;
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(QUEUE_POLL) => {}
                }
                continue;
            };
            waited = 0;

            request.processing = true;
            info!(
                worker = %self.name,
                request_id = request.id,
                trade_type = %request.trade_type,
                %tier,
                "Starting next {routine:?} trade, getting data"
            );
            self.services.events.emit(
                TRADE_STARTED,
                &json!({
                    "worker": self.name,
                    "request_id": request.id,
                    "trade_type": request.trade_type,
                    "tier": tier.to_string(),
                    "trainer": request.trainer.name,
                }),
            );

            self.perform_trade(session, request, tier).await?;
        }
        Ok(())
    }

    async fn perform_trade<T: Title>(
        &self,
        session: &mut TradeSession<T>,
        mut request: TradeRequest,
        tier: PriorityTier,
    ) -> Result<(), DeviceError> {
        let outcome = match session.perform_link_code_trade(&mut request).await {
            Ok(TradeOutcome::Success) => {
                if request.trade_type == TradeType::Clone {
                    self.echo_clone_result(&request, TradeOutcome::Success);
                }
                self.emit_finished(&request, TradeOutcome::Success);
                return Ok(());
            }
            Ok(outcome) => outcome,
            Err(SessionError::Device(e)) => {
                warn!(worker = %self.name, request_id = request.id, error = %e, "Trade interrupted by device failure");
                self.handle_aborted(request, tier, TradeOutcome::ExceptionConnection);
                return Err(e);
            }
            Err(SessionError::Internal(reason)) => {
                warn!(worker = %self.name, request_id = request.id, %reason, "Trade failed internally");
                TradeOutcome::ExceptionInternal
            }
        };
        self.handle_aborted(request, tier, outcome);
        Ok(())
    }

    fn handle_aborted(&self, mut request: TradeRequest, tier: PriorityTier, outcome: TradeOutcome) {
        request.processing = false;
        if request.trade_type == TradeType::Clone {
            self.echo_clone_result(&request, outcome);
        }
        self.emit_finished(&request, outcome);

        let decision = classify(
            &request,
            outcome,
            tier,
            self.initial_routine,
            self.services.config.clone.clone_while_idle,
        );
        match decision {
            RetryDecision::Requeue(retry_tier) => {
                info!(worker = %self.name, request_id = request.id, %outcome, tier = %retry_tier, "Requeueing trade");
                request.notifier.message(
                    request.id,
                    "Oops! Something happened. I'll requeue you for another attempt.",
                );
                self.dispatcher.requeue_retry(request, retry_tier);
            }
            RetryDecision::Cancel => {
                info!(worker = %self.name, request_id = request.id, %outcome, "Canceling trade");
                request.notifier.message(
                    request.id,
                    &format!("Oops! Something happened. Canceling the trade: {outcome}."),
                );
                request.notifier.canceled(request.id, outcome);
            }
        }
    }

    fn emit_finished(&self, request: &TradeRequest, outcome: TradeOutcome) {
        self.services.events.emit(
            TRADE_FINISHED,
            &json!({
                "worker": self.name,
                "request_id": request.id,
                "trade_type": request.trade_type,
                "outcome": outcome.to_string(),
                "success": outcome.is_success(),
            }),
        );
    }

    fn echo_clone_result(&self, request: &TradeRequest, outcome: TradeOutcome) {
        let requests = if request.swap_summary.is_empty() {
            vec!["Regular clone requested.".to_string()]
        } else {
            request.swap_summary.clone()
        };
        let requested = self
            .services
            .catalog
            .species_name(request.payload.species)
            .unwrap_or_default();
        self.services.events.emit(
            CLONE_RESULT,
            &json!({
                "worker": self.name,
                "title": if outcome.is_success() { "Trade Completed" } else { "Trade Failed" },
                "trainer": format!("{}-{}", request.trainer.name, request.trainer.id),
                "requests": requests,
                "requested": requested,
            }),
        );
    }
}
