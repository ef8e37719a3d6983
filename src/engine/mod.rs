//! Reconciliation engine for a group of power actuators.
//!
//! The engine owns the group's desired power and exposes two paths that share
//! one desired-state derivation (`power > 0`):
//!
//! - **Explicit commands** (`set_power`, `on`, `off`): store the new desired
//!   power, distribute it over the members and report the group state.
//! - **Reconciliation loop** (`start` / `stop`): a background task that
//!   periodically compares every member's actual state with the desired one
//!   and corrects drift when auto-correct is enabled.

pub mod cycle;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GroupSpec;
use crate::distribution::distribute;
use crate::registry::{resolve, ActuatorError, ActuatorRegistry, MemberHandle, StateReporter};
use crate::types::{
    clamp_power, desired_on, DistributionPolicy, LifecycleState, Member, MemberCommand, MemberId,
    FULL_POWER,
};

pub use cycle::{CheckOutcome, Correction, CycleError, CycleReport, MemberCheck, ReconcileStatus};

// ============================================================================
// Errors & Reports
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Reconciliation loop already running for group '{0}'")]
    AlreadyRunning(String),
}

/// Delivery result of one explicit member command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
    /// Member could not be resolved; nothing was sent.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub member: MemberId,
    pub command: MemberCommand,
    pub delivery: Delivery,
}

/// Outcome of an explicit group command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    /// Desired group power after the command
    pub power: u8,
    pub outcomes: Vec<CommandOutcome>,
    /// Whether the host accepted the group's own state report
    pub state_reported: bool,
}

impl CommandReport {
    pub fn sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.delivery == Delivery::Sent)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.delivery, Delivery::Failed(_)))
            .count()
    }
}

/// Snapshot of the group as the host UI sees it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GroupStatus {
    pub group_id: String,
    pub power: u8,
    pub on: bool,
    pub lifecycle: LifecycleState,
}

// ============================================================================
// Shared State
// ============================================================================

/// Mutable group state. Power and lifecycle sit behind one lock so readers
/// never observe a torn pair.
#[derive(Debug, Default)]
struct GroupState {
    desired_power: u8,
    lifecycle: LifecycleState,
}

/// Everything the background loop and the command path share.
pub(crate) struct Shared {
    spec: GroupSpec,
    members: Vec<Member>,
    registry: Arc<dyn ActuatorRegistry>,
    reporter: Arc<dyn StateReporter>,
    state: RwLock<GroupState>,
    status: Arc<RwLock<ReconcileStatus>>,
}

impl Shared {
    fn group_id(&self) -> &str {
        &self.spec.group.id
    }

    async fn desired_power(&self) -> u8 {
        self.state.read().await.desired_power
    }

    /// Run a member operation under the configured timeout; a driver panic
    /// becomes `ActuatorError::Fault`.
    async fn bounded<T, F>(&self, op: F) -> Result<T, ActuatorError>
    where
        F: Future<Output = Result<T, ActuatorError>>,
    {
        let limit = self.spec.reconcile.member_timeout();
        match tokio::time::timeout(limit, AssertUnwindSafe(op).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(ActuatorError::Fault(cycle::panic_message(payload.as_ref()))),
            Err(_) => Err(ActuatorError::Timeout(millis(limit))),
        }
    }

    async fn send(&self, handle: &dyn MemberHandle, command: MemberCommand) -> Result<(), ActuatorError> {
        match command {
            MemberCommand::On { power } => self.bounded(handle.command_on(power)).await,
            MemberCommand::Off => self.bounded(handle.command_off()).await,
        }
    }

    /// Send one command per member (index-aligned) and report the group state.
    async fn dispatch(&self, power: u8, commands: Vec<MemberCommand>) -> CommandReport {
        let mut outcomes = Vec::with_capacity(commands.len());

        for (member, command) in self.members.iter().zip(commands) {
            let delivery = match resolve(self.registry.as_ref(), member) {
                None => Delivery::Missing,
                Some(handle) => match self.send(handle.as_ref(), command).await {
                    Ok(()) => {
                        debug!(member = %member.id, command = %command, "Member commanded");
                        Delivery::Sent
                    }
                    Err(e) => {
                        warn!(member = %member.id, command = %command, error = %e, "Member command failed");
                        Delivery::Failed(e.to_string())
                    }
                },
            };
            outcomes.push(CommandOutcome {
                member: member.id.clone(),
                command,
                delivery,
            });
        }

        let state_reported = match self.reporter.report_group_state(self.group_id(), power).await {
            Ok(()) => true,
            Err(e) => {
                debug!(group = %self.group_id(), error = %e, "Group state report failed (non-critical)");
                false
            }
        };

        CommandReport {
            power,
            outcomes,
            state_reported,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Engine
// ============================================================================

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One logical actuator over a group of member actuators.
pub struct ReconciliationEngine {
    shared: Arc<Shared>,
    task: Mutex<Option<PollTask>>,
}

impl ReconciliationEngine {
    /// Create an engine over `spec`'s members, resolved through `registry`.
    pub fn new(
        spec: GroupSpec,
        registry: Arc<dyn ActuatorRegistry>,
        reporter: Arc<dyn StateReporter>,
    ) -> Self {
        let members = spec.members();
        info!(
            group = %spec.group.id,
            members = ?members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            interval_secs = spec.reconcile.interval_secs,
            auto_correct = spec.reconcile.auto_correct,
            policy = %spec.group.distribution,
            "Power group initialized"
        );

        Self {
            shared: Arc::new(Shared {
                spec,
                members,
                registry,
                reporter,
                state: RwLock::new(GroupState::default()),
                status: Arc::new(RwLock::new(ReconcileStatus::default())),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &GroupSpec {
        &self.shared.spec
    }

    pub fn members(&self) -> &[Member] {
        &self.shared.members
    }

    /// Shared reconciliation status (for host status endpoints).
    pub fn status_handle(&self) -> Arc<RwLock<ReconcileStatus>> {
        self.shared.status.clone()
    }

    pub async fn lifecycle(&self) -> LifecycleState {
        self.shared.state.read().await.lifecycle
    }

    async fn set_lifecycle(&self, lifecycle: LifecycleState) {
        self.shared.state.write().await.lifecycle = lifecycle;
        debug!(group = %self.shared.group_id(), lifecycle = %lifecycle, "Lifecycle transition");
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn the reconciliation loop.
    ///
    /// At most one loop runs per engine; a second call while it runs returns
    /// `EngineError::AlreadyRunning` and spawns nothing.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!(group = %self.shared.group_id(), "start() called while already running, ignoring");
            return Err(EngineError::AlreadyRunning(self.shared.group_id().to_string()));
        }

        self.set_lifecycle(LifecycleState::Starting).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(cycle::run_loop(self.shared.clone(), cancel.clone()));
        *task = Some(PollTask { cancel, handle });
        self.set_lifecycle(LifecycleState::Running).await;

        info!(group = %self.shared.group_id(), "State monitor launched");
        Ok(())
    }

    /// Cancel the reconciliation loop and wait for it to exit.
    ///
    /// No-op when the loop is not running.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(PollTask { cancel, handle }) = task.take() else {
            debug!(group = %self.shared.group_id(), "stop() called while stopped");
            return;
        };

        self.set_lifecycle(LifecycleState::Stopping).await;
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(group = %self.shared.group_id(), error = %e, "Reconciliation loop ended abnormally");
        }
        self.set_lifecycle(LifecycleState::Stopped).await;

        info!(group = %self.shared.group_id(), "State monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Run one reconciliation cycle right now, outside the loop's cadence.
    pub async fn reconcile_now(&self) -> Result<CycleReport, CycleError> {
        let outcome = cycle::run_guarded_cycle(&self.shared, &CancellationToken::new()).await;
        cycle::record(&self.shared, &outcome).await;
        outcome
    }

    // ------------------------------------------------------------------------
    // Explicit Commands
    // ------------------------------------------------------------------------

    async fn command_group(&self, power: u8, policy: DistributionPolicy) -> CommandReport {
        self.shared.state.write().await.desired_power = power;
        let commands = distribute(policy, power, self.shared.members.len());
        self.shared.dispatch(power, commands).await
    }

    /// Set the group power (clamped to 0-100) and distribute it over the
    /// members with the configured policy.
    pub async fn set_power(&self, value: i64) -> CommandReport {
        let power = clamp_power(value);
        if i64::from(power) != value {
            debug!(requested = value, clamped = power, "Group power clamped");
        }
        info!(group = %self.shared.group_id(), power, policy = %self.shared.spec.group.distribution, "set_power → {}%", power);
        self.command_group(power, self.shared.spec.group.distribution).await
    }

    /// Every member fully on.
    pub async fn on(&self) -> CommandReport {
        info!(group = %self.shared.group_id(), "ON → all members ON");
        self.command_group(FULL_POWER, DistributionPolicy::Uniform).await
    }

    /// Every member off, whatever the distribution policy.
    pub async fn off(&self) -> CommandReport {
        info!(group = %self.shared.group_id(), "OFF → all members OFF");
        self.command_group(0, DistributionPolicy::Uniform).await
    }

    /// Current desired group power.
    pub async fn get_state(&self) -> u8 {
        self.shared.desired_power().await
    }

    pub async fn get_status(&self) -> GroupStatus {
        let state = self.shared.state.read().await;
        GroupStatus {
            group_id: self.shared.group_id().to_string(),
            power: state.desired_power,
            on: desired_on(state.desired_power),
            lifecycle: state.lifecycle,
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

// ============================================================================
// Host Lifecycle Interface
// ============================================================================

/// Lifecycle and command surface a host shell adapts to its own hook names.
#[async_trait]
pub trait PowerActuator: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;
    async fn stop(&self);
    async fn set_power(&self, value: i64) -> CommandReport;
    async fn on(&self) -> CommandReport;
    async fn off(&self) -> CommandReport;
    async fn get_state(&self) -> u8;
}

#[async_trait]
impl PowerActuator for ReconciliationEngine {
    async fn start(&self) -> Result<(), EngineError> {
        Self::start(self).await
    }

    async fn stop(&self) {
        Self::stop(self).await;
    }

    async fn set_power(&self, value: i64) -> CommandReport {
        Self::set_power(self, value).await
    }

    async fn on(&self) -> CommandReport {
        Self::on(self).await
    }

    async fn off(&self) -> CommandReport {
        Self::off(self).await
    }

    async fn get_state(&self) -> u8 {
        Self::get_state(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, NoopReporter, SimulatedActuator};
    use crate::types::MemberState;

    fn engine_with(ids: &[&str], spec: impl FnOnce(GroupSpec) -> GroupSpec) -> (ReconciliationEngine, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new());
        for id in ids {
            registry.insert(*id, SimulatedActuator::new());
        }
        let spec = spec(GroupSpec::new("kettle", ids.iter().map(|id| Member::new(*id))));
        let engine = ReconciliationEngine::new(spec, registry.clone(), Arc::new(NoopReporter));
        (engine, registry)
    }

    #[tokio::test]
    async fn test_initial_state_is_off_and_stopped() {
        let (engine, _) = engine_with(&["a"], |s| s);
        assert_eq!(engine.get_state().await, 0);
        let status = engine.get_status().await;
        assert!(!status.on);
        assert_eq!(status.lifecycle, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_set_power_clamps() {
        let (engine, _) = engine_with(&["a"], |s| s);
        assert_eq!(engine.set_power(150).await.power, 100);
        assert_eq!(engine.get_state().await, 100);
        assert_eq!(engine.set_power(-20).await.power, 0);
        assert_eq!(engine.get_state().await, 0);
    }

    #[tokio::test]
    async fn test_reconcile_now_reports_mismatch_without_correction() {
        let (engine, registry) = engine_with(&["a", "b"], |s| s);
        let a = registry.get(&MemberId::from("a")).unwrap();
        a.force_state(MemberState::Power(100.0));

        let report = engine.reconcile_now().await.unwrap();
        assert!(!report.desired_on);
        assert_eq!(report.mismatches(), 1);
        assert_eq!(
            report.check(&MemberId::from("a")).unwrap().outcome,
            CheckOutcome::Mismatch {
                actual_on: true,
                correction: Correction::Disabled
            }
        );
        assert!(a.commands().is_empty());
    }

    #[tokio::test]
    async fn test_member_timeout_counts_as_read_failure() {
        struct Hung;

        #[async_trait]
        impl MemberHandle for Hung {
            async fn read_state(&self) -> Result<MemberState, ActuatorError> {
                std::future::pending().await
            }
            async fn command_on(&self, _power: u8) -> Result<(), ActuatorError> {
                Ok(())
            }
            async fn command_off(&self) -> Result<(), ActuatorError> {
                Ok(())
            }
        }

        struct HungRegistry;

        impl ActuatorRegistry for HungRegistry {
            fn lookup(&self, _id: &MemberId) -> Option<Arc<dyn MemberHandle>> {
                Some(Arc::new(Hung))
            }
            fn iterate(&self) -> Vec<(MemberId, Arc<dyn MemberHandle>)> {
                Vec::new()
            }
        }

        let spec = GroupSpec::new("g", [Member::new("stuck")]).with_member_timeout_ms(50);
        let engine = ReconciliationEngine::new(spec, Arc::new(HungRegistry), Arc::new(NoopReporter));
        engine.set_power(100).await;

        let report = engine.reconcile_now().await.unwrap();
        let check = report.check(&MemberId::from("stuck")).unwrap();
        assert!(check.read_error.as_deref().unwrap().contains("Timed out"));
        assert!(matches!(check.outcome, CheckOutcome::Mismatch { actual_on: false, .. }));
    }
}
