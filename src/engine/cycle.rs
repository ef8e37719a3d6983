//! Reconciliation cycle: desired vs actual member state, with optional correction.
//!
//! One cycle walks the configured members in order:
//! - resolve the member through the registry (missing ⇒ skipped)
//! - read and normalise its state (read failure ⇒ assumed OFF)
//! - compare against `desired_on` and, on mismatch, correct it when
//!   auto-correct is enabled
//!
//! Every member gets its own outcome; nothing a single member does can abort
//! the cycle. Member reads and commands run behind their own timeout and
//! panic boundary, so a faulting driver only costs that member's check. A
//! panic anywhere else in the cycle is a structural failure: it is caught by
//! the loop, logged, and the loop carries on at the next interval.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Shared;
use crate::normalize;
use crate::registry::resolve;
use crate::types::{desired_on, Member, MemberCommand, MemberId};

// ============================================================================
// Outcomes
// ============================================================================

/// What happened to a mismatched member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    /// Auto-correct is off; the mismatch was only reported.
    Disabled,
    /// The corrective command was accepted.
    Applied(MemberCommand),
    /// The corrective command failed.
    Failed { command: MemberCommand, error: String },
    /// Shutdown was requested before the command could be issued.
    Skipped,
}

/// Result of checking one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Actual state matches the desired state.
    InSync { actual_on: bool },
    /// Actual state differs from the desired state.
    Mismatch { actual_on: bool, correction: Correction },
    /// The member could not be resolved in the registry.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberCheck {
    pub member: MemberId,
    pub outcome: CheckOutcome,
    /// Set when the state read failed and the member was assumed OFF.
    pub read_error: Option<String>,
}

/// Aggregated outcome of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub desired_power: u8,
    pub desired_on: bool,
    pub checks: Vec<MemberCheck>,
    /// True when cancellation cut the cycle short.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn mismatches(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Mismatch { .. }))
            .count()
    }

    pub fn corrections_applied(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| {
                matches!(
                    c.outcome,
                    CheckOutcome::Mismatch { correction: Correction::Applied(_), .. }
                )
            })
            .count()
    }

    pub fn missing(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.outcome == CheckOutcome::Missing)
            .count()
    }

    pub fn read_failures(&self) -> usize {
        self.checks.iter().filter(|c| c.read_error.is_some()).count()
    }

    pub fn check(&self, member: &MemberId) -> Option<&MemberCheck> {
        self.checks.iter().find(|c| &c.member == member)
    }

    /// Every resolved member matched the desired state.
    pub fn converged(&self) -> bool {
        !self.interrupted
            && self
                .checks
                .iter()
                .all(|c| matches!(c.outcome, CheckOutcome::InSync { .. }))
    }
}

/// Structural failure of a whole cycle.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    #[error("Reconciliation cycle panicked: {0}")]
    Panicked(String),
}

/// Running totals of the reconciliation loop, shared for status queries.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStatus {
    /// Number of cycles that ran to completion (or were cut short by stop)
    pub cycles_completed: u64,
    /// Number of cycles aborted by a structural failure
    pub structural_failures: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

// ============================================================================
// Cycle
// ============================================================================

const fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Run one cycle over every configured member.
pub(crate) async fn run_cycle(shared: &Shared, cancel: &CancellationToken) -> CycleReport {
    let desired_power = shared.desired_power().await;
    let target = desired_on(desired_power);
    let mut report = CycleReport {
        started_at: Utc::now(),
        desired_power,
        desired_on: target,
        checks: Vec::with_capacity(shared.members.len()),
        interrupted: false,
    };

    for member in &shared.members {
        if cancel.is_cancelled() {
            debug!(group = %shared.group_id(), "Cycle interrupted by shutdown");
            report.interrupted = true;
            break;
        }
        report.checks.push(check_member(shared, member, target, cancel).await);
    }

    report
}

async fn check_member(
    shared: &Shared,
    member: &Member,
    target: bool,
    cancel: &CancellationToken,
) -> MemberCheck {
    let Some(handle) = resolve(shared.registry.as_ref(), member) else {
        return MemberCheck {
            member: member.id.clone(),
            outcome: CheckOutcome::Missing,
            read_error: None,
        };
    };

    let read = shared.bounded(handle.read_state()).await;
    let read_error = read.as_ref().err().map(|e| {
        warn!(member = %member.id, error = %e, "Member state read failed, assuming OFF");
        e.to_string()
    });
    let actual_on = normalize::is_on_or_off(&read);

    if actual_on == target {
        debug!(member = %member.id, state = on_off(actual_on), "Member in sync");
        return MemberCheck {
            member: member.id.clone(),
            outcome: CheckOutcome::InSync { actual_on },
            read_error,
        };
    }

    warn!(
        member = %member.id,
        actual = on_off(actual_on),
        desired = on_off(target),
        "MISMATCH: member is {} but should be {}",
        on_off(actual_on),
        on_off(target)
    );

    let correction = if !shared.spec.reconcile.auto_correct {
        Correction::Disabled
    } else if cancel.is_cancelled() {
        Correction::Skipped
    } else {
        let command = MemberCommand::for_target(target);
        info!(member = %member.id, command = %command, "Auto-correcting member");
        match shared.send(handle.as_ref(), command).await {
            Ok(()) => Correction::Applied(command),
            Err(e) => {
                warn!(member = %member.id, command = %command, error = %e, "Corrective command failed");
                Correction::Failed {
                    command,
                    error: e.to_string(),
                }
            }
        }
    };

    MemberCheck {
        member: member.id.clone(),
        outcome: CheckOutcome::Mismatch {
            actual_on,
            correction,
        },
        read_error,
    }
}

/// Run one cycle, turning a panic anywhere inside it into a `CycleError`.
pub(crate) async fn run_guarded_cycle(
    shared: &Shared,
    cancel: &CancellationToken,
) -> Result<CycleReport, CycleError> {
    AssertUnwindSafe(run_cycle(shared, cancel))
        .catch_unwind()
        .await
        .map_err(|payload| CycleError::Panicked(panic_message(payload.as_ref())))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Record a cycle outcome in the shared status.
pub(crate) async fn record(shared: &Shared, outcome: &Result<CycleReport, CycleError>) {
    let mut status = shared.status.write().await;
    match outcome {
        Ok(report) => {
            status.cycles_completed += 1;
            status.last_report = Some(report.clone());
        }
        Err(e) => {
            status.structural_failures += 1;
            status.last_error = Some(e.to_string());
        }
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Background reconciliation loop (spawned by `ReconciliationEngine::start`).
///
/// Returns only once `cancel` fires. Cancellation interrupts the initial
/// delay and the inter-cycle sleep immediately; a member operation already
/// in flight is allowed to finish.
pub(crate) async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let reconcile = &shared.spec.reconcile;

    tokio::select! {
        () = cancel.cancelled() => {
            debug!(group = %shared.group_id(), "Stopped during initial delay");
            return;
        }
        () = tokio::time::sleep(reconcile.initial_delay()) => {}
    }

    info!(
        group = %shared.group_id(),
        members = shared.members.len(),
        interval_secs = reconcile.interval_secs,
        auto_correct = reconcile.auto_correct,
        "Reconciliation loop started"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let outcome = run_guarded_cycle(&shared, &cancel).await;
        match &outcome {
            Ok(report) => debug!(
                group = %shared.group_id(),
                desired = on_off(report.desired_on),
                checked = report.checks.len(),
                mismatches = report.mismatches(),
                corrected = report.corrections_applied(),
                missing = report.missing(),
                "Reconciliation cycle complete"
            ),
            Err(e) => error!(
                group = %shared.group_id(),
                error = %e,
                "Reconciliation cycle failed, retrying next interval"
            ),
        }
        record(&shared, &outcome).await;

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconcile.interval()) => {}
        }
    }

    info!(group = %shared.group_id(), "Reconciliation loop stopped");
}
