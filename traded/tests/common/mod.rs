#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use trade_common::config::TitleSection;
use trade_common::mock_device::{MockConsole, StaticCatalog, StubOracle};
use trade_common::{PartnerInfo, Payload, TradeConfig, TradeNotifier, TradeOutcome};
use traded::events::{EventBus, TRADE_FINISHED};
use traded::queue::Dispatcher;
use traded::session::TradeServices;
use traded::title::LayoutTitle;
use traded::worker::{TradeWorker, WorkerControl};

pub use trade_common::logging::init_test_logging;

#[ctor::ctor]
fn setup() {
    init_test_logging();
}

// ── Fixtures ────────────────────────────────────────────────────────────

pub fn host(index: u32) -> PartnerInfo {
    PartnerInfo {
        nid: 0,
        name: format!("Host{index}"),
        tid7: 100_000 + index,
        sid7: 1_000 + index,
        game: 50,
        gender: 0,
        language: 2,
    }
}

pub fn guest(nid: u64) -> PartnerInfo {
    PartnerInfo {
        nid,
        name: format!("Guest{nid}"),
        tid7: 654_321,
        sid7: 12,
        game: 50,
        gender: 1,
        language: 2,
    }
}

pub fn payload(species: u16, ec: u32) -> Payload {
    let mut p = Payload {
        species,
        encryption_constant: ec,
        version: 50,
        tid16: 100,
        sid16: 200,
        pid: 0x0001_0002,
        level: 20,
        ot_name: "Owner".to_string(),
        ..Payload::default()
    };
    p.refresh_checksum();
    p
}

pub fn services(config: TradeConfig, events: &EventBus) -> Arc<TradeServices> {
    services_with_oracle(config, events, Arc::new(StubOracle::new()))
}

pub fn services_with_oracle(
    config: TradeConfig,
    events: &EventBus,
    oracle: Arc<StubOracle>,
) -> Arc<TradeServices> {
    Arc::new(
        TradeServices::from_config(config, Arc::new(StaticCatalog::default()), oracle, events.clone())
            .expect("services"),
    )
}

/// One worker on its own mock console.
pub fn spawn_worker(
    name: &str,
    console: &Arc<MockConsole>,
    services: &Arc<TradeServices>,
    dispatcher: &Arc<Dispatcher>,
    routine: trade_common::RoutineKind,
) -> (tokio::task::JoinHandle<traded::worker::WorkerExit>, WorkerControl) {
    let title = LayoutTitle::new(console.clone(), TitleSection::default());
    let (worker, control) = TradeWorker::new(name, title, services.clone(), dispatcher.clone(), routine);
    (tokio::spawn(worker.run()), control)
}

/// Wait for `count` finished trades and return their outcomes in order.
pub async fn finished_outcomes(rx: &mut broadcast::Receiver<String>, count: usize) -> Vec<String> {
    let mut outcomes = Vec::new();
    while outcomes.len() < count {
        let msg: serde_json::Value =
            serde_json::from_str(&rx.recv().await.expect("event bus open")).expect("event json");
        if msg["event"] == TRADE_FINISHED {
            outcomes.push(msg["data"]["outcome"].as_str().unwrap_or_default().to_string());
        }
    }
    outcomes
}

// ── Notifier ────────────────────────────────────────────────────────────

/// Everything a request told its requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Initialized,
    Searching,
    Message(String),
    MessageWithPayload(u16, String),
    Finished(Payload),
    Canceled(TradeOutcome),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Message(text) | Notice::MessageWithPayload(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn received(&self) -> Vec<Payload> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Finished(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn cancellations(&self) -> Vec<TradeOutcome> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Canceled(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).push(notice);
    }
}

impl TradeNotifier for RecordingNotifier {
    fn initialized(&self, _request_id: u64) {
        self.push(Notice::Initialized);
    }

    fn searching(&self, _request_id: u64) {
        self.push(Notice::Searching);
    }

    fn message(&self, _request_id: u64, text: &str) {
        self.push(Notice::Message(text.to_string()));
    }

    fn message_with_payload(&self, _request_id: u64, payload: &Payload, text: &str) {
        self.push(Notice::MessageWithPayload(payload.species, text.to_string()));
    }

    fn finished(&self, _request_id: u64, received: &Payload) {
        self.push(Notice::Finished(received.clone()));
    }

    fn canceled(&self, _request_id: u64, outcome: TradeOutcome) {
        self.push(Notice::Canceled(outcome));
    }
}
