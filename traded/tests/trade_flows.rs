//! End-to-end trade flows: workers, dispatcher and sessions against scripted
//! consoles, on a paused clock.

mod common;

use common::{
    RecordingNotifier, finished_outcomes, guest, host, payload, services, services_with_oracle, spawn_worker,
};
use std::sync::Arc;
use std::time::Duration;
use trade_common::config::TemplateRule;
use trade_common::mock_device::{MockConsole, PartnerScript, StubOracle};
use trade_common::{PriorityTier, RoutineKind, TradeConfig, TradeOutcome, TradeRequest, TradeType, TrainerInfo};
use traded::events::{BARRIER_TIMEOUT, CLONE_RESULT, EventBus, WORKER_RECONNECT};
use traded::queue::{DistributionPool, Dispatcher, LinkCodePolicy};
use traded::swap::SwapKind;
use traded::worker::WorkerExit;

fn request(
    dispatcher: &Dispatcher,
    trade_type: TradeType,
    send: trade_common::Payload,
    notifier: &Arc<RecordingNotifier>,
) -> TradeRequest {
    TradeRequest::new(
        dispatcher.next_id(),
        trade_type,
        send,
        TrainerInfo::new("Req", 42),
        2468_1357,
        notifier.clone(),
    )
}

fn pool_dispatcher(config: &TradeConfig) -> Arc<Dispatcher> {
    let pool = DistributionPool::new(
        vec![payload(25, 0xAAAA), payload(133, 0xBBBB)],
        LinkCodePolicy::from_config(&config.distribution),
    );
    Arc::new(Dispatcher::new().with_fallback(pool))
}

#[tokio::test(start_paused = true)]
async fn empty_queue_falls_back_to_distribution() {
    let config = TradeConfig::default();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config.clone(), &events);
    let dispatcher = pool_dispatcher(&config);
    let console = Arc::new(MockConsole::new(&host(1)));
    console.push_partner(
        PartnerScript::new(guest(0x51))
            .arrive_after(Duration::from_secs(4))
            .offer(Duration::from_secs(2), payload(280, 0x1234)),
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::LinkTrade);
    let outcomes = finished_outcomes(&mut rx, 1).await;
    control.stop();
    assert_eq!(handle.await.unwrap(), WorkerExit::Cancelled);

    assert_eq!(outcomes, vec!["success"]);
    assert_eq!(console.trades_completed(), 1);
    assert_eq!(console.entered_codes(), vec!["71960000".to_string()]);
    let counters = services.counters.snapshot();
    assert_eq!(counters.distributions, 1);
    assert_eq!(counters.trades, 0);
}

#[tokio::test(start_paused = true)]
async fn partner_without_offer_is_cancelled_not_retried() {
    let config = TradeConfig::default();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));
    console.push_partner(PartnerScript::new(guest(0x52)).arrive_after(Duration::from_secs(2)));

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Specific, payload(25, 0x2222), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::LinkTrade);
    let outcomes = finished_outcomes(&mut rx, 1).await;
    control.stop();
    handle.await.unwrap();

    assert_eq!(outcomes, vec!["trainer_too_slow"]);
    assert_eq!(notifier.cancellations(), vec![TradeOutcome::TrainerTooSlow]);
    assert!(notifier.received().is_empty());
    assert_eq!(dispatcher.pending(RoutineKind::LinkTrade), 0);
    assert_eq!(console.trades_completed(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_search_is_retried_and_then_succeeds() {
    let config = TradeConfig::default();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Specific, payload(25, 0x2222), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::LinkTrade);
    assert_eq!(finished_outcomes(&mut rx, 1).await, vec!["no_trainer_found"]);

    let offer = payload(133, 0x3333);
    console.push_partner(
        PartnerScript::new(guest(0x53))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), offer.clone()),
    );
    assert_eq!(finished_outcomes(&mut rx, 1).await, vec!["success"]);
    control.stop();
    handle.await.unwrap();

    assert!(
        notifier
            .messages()
            .contains(&"Oops! Something happened. I'll requeue you for another attempt.".to_string())
    );
    assert!(notifier.cancellations().is_empty());
    assert_eq!(notifier.received(), vec![offer]);
    assert_eq!(services.counters.snapshot().trades, 1);
}

#[tokio::test(start_paused = true)]
async fn synchronized_workers_start_together() {
    let mut config = TradeConfig::default();
    config.distribution.synchronize_bots = true;
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config.clone(), &events);
    let dispatcher = pool_dispatcher(&config);

    let mut consoles = Vec::new();
    let mut running = Vec::new();
    for index in 0..2u32 {
        let console = Arc::new(MockConsole::new(&host(index)));
        console.push_partner(
            PartnerScript::new(guest(0x60 + u64::from(index)))
                .arrive_after(Duration::from_secs(3))
                .offer(Duration::from_secs(2), payload(280, 0x4000 + index)),
        );
        running.push(spawn_worker(
            &format!("w{index}"),
            &console,
            &services,
            &dispatcher,
            RoutineKind::LinkTrade,
        ));
        consoles.push(console);
    }

    let mut outcomes = Vec::new();
    let mut timeouts = 0;
    while outcomes.len() < 2 {
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match msg["event"].as_str() {
            Some(BARRIER_TIMEOUT) => timeouts += 1,
            Some("trade_finished") => outcomes.push(msg["data"]["outcome"].as_str().unwrap().to_string()),
            _ => {}
        }
    }
    for (handle, control) in running {
        control.stop();
        handle.await.unwrap();
    }

    assert_eq!(outcomes, vec!["success", "success"]);
    assert_eq!(timeouts, 0);
    assert!(consoles.iter().all(|c| c.trades_completed() == 1));
    assert_eq!(services.counters.snapshot().distributions, 2);
}

#[tokio::test(start_paused = true)]
async fn clone_with_ot_trigger_takes_partner_identity() {
    let mut config = TradeConfig::default();
    config.clone.ot_swap_item = 50;
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));

    let mut shown = payload(280, 0x5555);
    shown.held_item = 50;
    shown.nickname = "Ralts".to_string();
    shown.refresh_checksum();
    let trash = payload(133, 0x6666);
    console.push_partner(
        PartnerScript::new(guest(0x70))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), shown)
            .offer(Duration::from_secs(4), trash.clone()),
    );

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Clone, trade_common::Payload::empty(), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::Clone);
    let mut clone_result = None;
    let mut outcomes = Vec::new();
    while outcomes.is_empty() {
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match msg["event"].as_str() {
            Some(CLONE_RESULT) => clone_result = Some(msg["data"].clone()),
            Some("trade_finished") => outcomes.push(msg["data"]["outcome"].as_str().unwrap().to_string()),
            _ => {}
        }
    }
    control.stop();
    handle.await.unwrap();

    assert_eq!(outcomes, vec!["success"]);
    assert_eq!(console.trades_completed(), 1);
    assert_eq!(console.box_slot(0), trash);
    assert!(notifier.messages().iter().any(|m| m.starts_with("**Cloned your Ralts!**")));

    let clone_result = clone_result.expect("clone result echoed");
    assert_eq!(clone_result["title"], "Trade Completed");
    assert_eq!(clone_result["trainer"], "Guest112-654321");
    assert_eq!(clone_result["requested"], "Ralts");

    let counters = services.counters.snapshot();
    assert_eq!(counters.clones, 1);
    let ot_swaps = counters
        .swaps
        .iter()
        .find(|(kind, _)| *kind == SwapKind::OtSwap)
        .map(|(_, n)| *n);
    assert_eq!(ot_swaps, Some(1));
}

#[tokio::test(start_paused = true)]
async fn illegal_clone_result_reports_legality_to_requester() {
    let dir = tempfile::tempdir().unwrap();
    let gift_path = dir.path().join("gift.bin");
    std::fs::write(&gift_path, payload(133, 0x4444).encode()).unwrap();

    let mut config = TradeConfig::default();
    config.clone.distro_swap_item = 234;
    config.distribution.templates = vec![TemplateRule {
        nickname: None,
        species: Some(280),
        send: gift_path,
    }];
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let oracle = Arc::new(StubOracle::new());
    oracle.deny_species(133);
    let services = services_with_oracle(config, &events, oracle);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));

    let mut shown = payload(280, 0x5555);
    shown.held_item = 234;
    shown.refresh_checksum();
    console.push_partner(
        PartnerScript::new(guest(0x72))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), shown)
            .offer(Duration::from_secs(4), payload(25, 0x6666)),
    );

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Clone, trade_common::Payload::empty(), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::Clone);
    let outcomes = finished_outcomes(&mut rx, 1).await;
    control.stop();
    handle.await.unwrap();

    assert_eq!(outcomes, vec!["illegal_trade"]);
    assert_eq!(console.trades_completed(), 0);
    assert!(
        notifier
            .messages()
            .iter()
            .any(|m| m == "Species 133 is not obtainable.")
    );
}

#[tokio::test(start_paused = true)]
async fn frozen_console_is_restarted_before_trading() {
    let config = TradeConfig::default();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));
    console.freeze();
    console.push_partner(
        PartnerScript::new(guest(0x80))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), payload(133, 0x7777)),
    );

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Specific, payload(25, 0x2222), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::LinkTrade);
    let outcomes = finished_outcomes(&mut rx, 1).await;
    control.stop();
    handle.await.unwrap();

    assert_eq!(outcomes, vec!["success"]);
    assert_eq!(console.restarts(), 1);
    assert_eq!(console.trades_completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_link_reconnects_and_retries_request() {
    let config = TradeConfig::default();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));
    let offer = payload(133, 0x8888);
    console.push_partner(
        PartnerScript::new(guest(0x90))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), offer.clone()),
    );

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Specific, payload(25, 0x2222), &notifier),
        PriorityTier::TIER3,
    );

    // Enough calls to log in and start navigating, not enough to reach the search.
    console.disconnect_after(20);
    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::LinkTrade);

    let mut outcomes = Vec::new();
    let mut reconnected = false;
    while outcomes.len() < 2 {
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match msg["event"].as_str() {
            Some(WORKER_RECONNECT) => reconnected = msg["data"]["success"] == true,
            Some("trade_finished") => outcomes.push(msg["data"]["outcome"].as_str().unwrap().to_string()),
            _ => {}
        }
    }
    control.stop();
    assert_eq!(handle.await.unwrap(), WorkerExit::Cancelled);

    assert_eq!(outcomes, vec!["exception_connection", "success"]);
    assert!(reconnected);
    assert_eq!(console.reconnects(), 1);
    assert_eq!(notifier.received(), vec![offer]);
}

#[tokio::test(start_paused = true)]
async fn dump_reports_every_shown_payload() {
    let mut config = TradeConfig::default();
    config.trade.max_dump_trade_time_secs = 20;
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let services = services(config, &events);
    let dispatcher = Arc::new(Dispatcher::new());
    let console = Arc::new(MockConsole::new(&host(1)));
    console.push_partner(
        PartnerScript::new(guest(0xA0))
            .arrive_after(Duration::from_secs(3))
            .offer(Duration::from_secs(2), payload(280, 0x1001))
            .offer(Duration::from_secs(3), payload(133, 0x1002)),
    );

    let notifier = RecordingNotifier::new();
    dispatcher.enqueue(
        request(&dispatcher, TradeType::Dump, trade_common::Payload::empty(), &notifier),
        PriorityTier::TIER3,
    );

    let (handle, control) = spawn_worker("w1", &console, &services, &dispatcher, RoutineKind::Dump);
    let outcomes = finished_outcomes(&mut rx, 1).await;
    control.stop();
    handle.await.unwrap();

    assert_eq!(outcomes, vec!["success"]);
    assert_eq!(console.trades_completed(), 0);
    let files: Vec<_> = notifier
        .messages()
        .into_iter()
        .filter(|m| m.starts_with("File "))
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files[0].contains("OT: Owner"));
    assert!(notifier.messages().contains(&"Dumped 2 Pokémon.".to_string()));
    assert_eq!(services.counters.snapshot().dumps, 1);
}
