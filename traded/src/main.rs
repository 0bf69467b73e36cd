//! Link trade daemon.
//!
//! Only the simulated transport ships with this binary; real consoles are
//! attached by embedding the library with a [`trade_common::DeviceFacade`]
//! implementation.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trade_common::config::Severity;
use trade_common::mock_device::{MockConsole, PartnerScript, StaticCatalog, StubOracle};
use trade_common::{PartnerInfo, Payload, RoutineKind, TradeConfig, init_logging};

use traded::events::EventBus;
use traded::library::load_folder;
use traded::queue::{DistributionPool, Dispatcher, IdleCloneSource, LinkCodePolicy};
use traded::session::TradeServices;
use traded::swap::ev::{decode_ev_spread, is_designator_label, is_hex_label, RESET_LABEL};
use traded::swap::genned::GennedRequest;
use traded::title::LayoutTitle;
use traded::worker::TradeWorker;

#[derive(Parser)]
#[command(name = "traded")]
#[command(author, version, about = "Link trade daemon - remote trade worker orchestration")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "TRADE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trade workers
    Run {
        /// Drive simulated consoles instead of real devices
        #[arg(long)]
        simulate: bool,

        /// Number of workers to start
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Stop after this many seconds (simulation only)
        #[arg(long, default_value = "120")]
        duration_secs: u64,

        /// Routine every worker starts with
        #[arg(long, default_value = "link-trade")]
        routine: RoutineArg,

        /// Scripted partners queued on each simulated console
        #[arg(long, default_value = "3")]
        partners: usize,
    },

    /// Validate the configuration and print every finding
    CheckConfig,

    /// Decode an EV spread or packed genned request label
    DecodeLabel {
        /// Nickname or label text to decode
        label: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum RoutineArg {
    Idle,
    LinkTrade,
    Clone,
    Dump,
    FlexTrade,
}

impl From<RoutineArg> for RoutineKind {
    fn from(arg: RoutineArg) -> Self {
        match arg {
            RoutineArg::Idle => RoutineKind::Idle,
            RoutineArg::LinkTrade => RoutineKind::LinkTrade,
            RoutineArg::Clone => RoutineKind::Clone,
            RoutineArg::Dump => RoutineKind::Dump,
            RoutineArg::FlexTrade => RoutineKind::FlexTrade,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TradeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            simulate,
            workers,
            duration_secs,
            routine,
            partners,
        } => {
            let _guards = init_logging(&config.log);
            config.ensure_valid()?;
            if !simulate {
                bail!("no device transport is built into this binary; pass --simulate");
            }
            simulate_workers(
                config,
                workers.max(1),
                Duration::from_secs(duration_secs),
                routine.into(),
                partners,
            )
            .await
        }
        Commands::CheckConfig => check_config(&config),
        Commands::DecodeLabel { label } => decode_label(&label),
    }
}

fn check_config(config: &TradeConfig) -> Result<()> {
    let issues = config.validate();
    let mut errors = 0;
    for issue in &issues {
        match issue.severity {
            Severity::Error => {
                errors += 1;
                println!("error: {issue}");
            }
            Severity::Warning => println!("warning: {issue}"),
        }
    }
    if errors > 0 {
        bail!("{errors} configuration error(s)");
    }
    println!("Configuration OK ({} warning(s))", issues.len());
    Ok(())
}

fn decode_label(label: &str) -> Result<()> {
    let mut out = serde_json::Map::new();

    if label == RESET_LABEL || is_designator_label(label) || is_hex_label(label) {
        match decode_ev_spread(label, [0; 6]) {
            Ok(evs) => out.insert("ev_spread".to_string(), json!(evs)),
            Err(e) => out.insert("ev_error".to_string(), json!(e)),
        };
    }
    if let Some(request) = GennedRequest::from_label(label) {
        out.insert("genned".to_string(), serde_json::to_value(request)?);
    }

    if out.is_empty() {
        bail!("{label:?} is neither an EV spread nor a genned request");
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

// ── Simulation ──────────────────────────────────────────────────────────

fn host(index: usize) -> PartnerInfo {
    PartnerInfo {
        nid: 0,
        name: format!("Host{index}"),
        tid7: 100_000 + index as u32,
        sid7: 1_000 + index as u32,
        game: 50,
        gender: 0,
        language: 2,
    }
}

fn sample_payload(species: u16) -> Payload {
    let mut payload = Payload {
        encryption_constant: fastrand::u32(1..),
        species,
        pid: fastrand::u32(..),
        level: 50,
        met_level: 50,
        version: 50,
        language: 2,
        nickname: format!("Mon{species}"),
        ot_name: "Sim".to_string(),
        tid16: fastrand::u16(..),
        sid16: fastrand::u16(..),
        ..Payload::default()
    };
    payload.refresh_checksum();
    payload
}

fn partner_script(worker: usize, index: usize) -> PartnerScript {
    let info = PartnerInfo {
        nid: 0x1000 + (worker * 100 + index) as u64,
        name: format!("Trainer{worker}-{index}"),
        tid7: fastrand::u32(1..1_000_000),
        sid7: fastrand::u32(..10_000),
        game: 50,
        gender: fastrand::u8(..2),
        language: 2,
    };
    PartnerScript::new(info)
        .arrive_after(Duration::from_secs(fastrand::u64(3..15)))
        .offer(Duration::from_secs(2), sample_payload(fastrand::u16(1..1000)))
}

async fn simulate_workers(
    config: TradeConfig,
    workers: usize,
    duration: Duration,
    routine: RoutineKind,
    partners: usize,
) -> Result<()> {
    let pool_payloads = match &config.distribution.pool_folder {
        Some(dir) => load_folder(dir)?,
        None => (1..=5).map(|i| sample_payload(i * 25)).collect(),
    };
    info!(payloads = pool_payloads.len(), "Loaded distribution pool");

    let codes = LinkCodePolicy::from_config(&config.distribution);
    let mut dispatcher = Dispatcher::new().with_fallback(DistributionPool::new(pool_payloads, codes));
    if config.clone.clone_while_idle {
        dispatcher = dispatcher.with_fallback(IdleCloneSource::new(codes));
    }
    let dispatcher = Arc::new(dispatcher);

    let title_profile = config.title.clone();
    let services = Arc::new(TradeServices::from_config(
        config,
        Arc::new(StaticCatalog::default()),
        Arc::new(StubOracle::new()),
        EventBus::default(),
    )?);

    let mut handles = Vec::with_capacity(workers);
    let mut controls = Vec::with_capacity(workers);
    let mut consoles = Vec::with_capacity(workers);
    for index in 0..workers {
        let console = Arc::new(MockConsole::with_title(&host(index), title_profile.clone()));
        for p in 0..partners {
            console.push_partner(partner_script(index, p));
        }
        let title = LayoutTitle::new(console.clone(), title_profile.clone());
        let (worker, control) = TradeWorker::new(
            format!("sim-{index}"),
            title,
            services.clone(),
            dispatcher.clone(),
            routine,
        );
        handles.push(tokio::spawn(worker.run()));
        controls.push(control);
        consoles.push(console);
    }
    info!(workers, seconds = duration.as_secs(), "Simulation started");

    tokio::select! {
        _ = tokio::time::sleep(duration) => info!("Simulation time elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    for control in &controls {
        control.stop();
    }
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(exit) => info!(worker = index, ?exit, "Worker stopped"),
            Err(e) => warn!(worker = index, error = %e, "Worker task failed"),
        }
    }

    let consoles: Vec<_> = consoles
        .iter()
        .enumerate()
        .map(|(index, console)| {
            json!({
                "worker": format!("sim-{index}"),
                "trades": console.trades_completed(),
                "restarts": console.restarts(),
                "reconnects": console.reconnects(),
                "partners_left": console.partners_remaining(),
            })
        })
        .collect();
    let report = json!({
        "counters": services.counters.snapshot(),
        "consoles": consoles,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
