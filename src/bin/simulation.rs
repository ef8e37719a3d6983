//! Power Group Simulation
//!
//! Runs a reconciliation engine against simulated actuators so the
//! distribution policies and drift correction can be watched live.
//! Members are flipped by hand every `--drift-every` seconds to emulate
//! someone toggling a relay behind the group's back.
//!
//! # Usage
//! ```bash
//! ./power-group-sim --members 4 --power 30 --policy sequential_fill --auto-correct
//! RUST_LOG=debug ./power-group-sim --config group_config.toml --duration 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use power_group::config::defaults::MAX_MEMBERS;
use power_group::config::MemberEntry;
use power_group::normalize::is_on;
use power_group::registry::{InMemoryRegistry, RecordingReporter, SimulatedActuator};
use power_group::{
    DistributionPolicy, GroupSpec, Member, MemberState, PowerActuator, ReconciliationEngine,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "power-group-sim")]
#[command(about = "Simulated power group with drift reconciliation")]
#[command(version)]
struct Args {
    /// Group config TOML file (defaults to the standard search order)
    #[arg(short, long, env = "POWER_GROUP_CONFIG")]
    config: Option<PathBuf>,

    /// Number of simulated members when the config defines none
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=8))]
    members: u8,

    /// Initial group power (clamped to 0-100)
    #[arg(short, long, default_value = "50", allow_negative_numbers = true)]
    power: i64,

    /// Distribution policy override (uniform or sequential_fill)
    #[arg(long)]
    policy: Option<DistributionPolicy>,

    /// Enable auto-correct regardless of the config
    #[arg(long)]
    auto_correct: bool,

    /// Poll interval override in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Flip one member's state every N seconds (0 = never)
    #[arg(long, default_value = "12")]
    drift_every: u64,

    /// Stop after N seconds (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn build_spec(args: &Args) -> Result<GroupSpec> {
    let mut spec = match &args.config {
        Some(path) => GroupSpec::load_from_file(path)
            .with_context(|| format!("Failed to load group config {}", path.display()))?,
        None => GroupSpec::load(),
    };

    if spec.members().is_empty() {
        spec.group.members = (1..=usize::from(args.members).min(MAX_MEMBERS))
            .map(|i| Member::new(format!("heater-{i}")).with_name(format!("Heater {i}")))
            .map(MemberEntry::Detailed)
            .collect();
    }
    if let Some(policy) = args.policy {
        spec = spec.with_policy(policy);
    }
    if args.auto_correct {
        spec = spec.with_auto_correct(true);
    }
    if let Some(secs) = args.interval {
        spec = spec.with_interval_secs(secs);
    }
    Ok(spec)
}

/// Flip members round-robin until cancelled.
async fn run_drift(registry: Arc<InMemoryRegistry>, members: Vec<Member>, every: Duration, cancel: CancellationToken) {
    let mut next = 0usize;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(every) => {}
        }
        let Some(member) = members.get(next % members.len().max(1)) else {
            return;
        };
        next += 1;
        if let Some(actuator) = registry.get(&member.id) {
            let flipped = if is_on(&actuator.state()) {
                MemberState::Power(0.0)
            } else {
                MemberState::Power(100.0)
            };
            info!(member = %member.id, state = ?flipped, "Drift injected");
            actuator.force_state(flipped);
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let spec = build_spec(&args)?;
    let registry = Arc::new(InMemoryRegistry::new());
    for member in spec.members() {
        let actuator = match &member.name {
            Some(name) => SimulatedActuator::named(name.clone()),
            None => SimulatedActuator::new(),
        };
        registry.insert(member.id.clone(), actuator);
    }
    let reporter = Arc::new(RecordingReporter::new());

    let engine = ReconciliationEngine::new(spec, registry.clone(), reporter.clone());
    let members = engine.members().to_vec();
    let status = engine.status_handle();
    let actuator: &dyn PowerActuator = &engine;

    let report = actuator.set_power(args.power).await;
    info!(power = report.power, sent = report.sent(), failed = report.failed(), "Initial power applied");
    actuator.start().await?;

    // Graceful shutdown via Ctrl+C or --duration
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    let duration = args.duration;
    tokio::spawn(async move {
        if duration == 0 {
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 Received Ctrl+C, initiating shutdown...");
        } else {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("🛑 Received Ctrl+C, initiating shutdown..."),
                () = tokio::time::sleep(Duration::from_secs(duration)) => info!("Duration elapsed, shutting down"),
            }
        }
        shutdown_token.cancel();
    });

    let drift = (args.drift_every > 0 && !members.is_empty()).then(|| {
        tokio::spawn(run_drift(
            registry.clone(),
            members.clone(),
            Duration::from_secs(args.drift_every),
            cancel_token.clone(),
        ))
    });

    cancel_token.cancelled().await;
    if let Some(drift) = drift {
        drift.await.ok();
    }
    actuator.stop().await;
    actuator.off().await;

    let status = status.read().await;
    info!(
        cycles = status.cycles_completed,
        structural_failures = status.structural_failures,
        group_reports = reporter.reports().len(),
        "✓ Simulation complete"
    );
    if let Some(report) = &status.last_report {
        for check in &report.checks {
            info!(member = %check.member, outcome = ?check.outcome, "Last cycle");
        }
    }
    Ok(())
}
