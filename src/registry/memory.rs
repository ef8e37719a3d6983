//! In-memory actuator registry with simulated members.
//!
//! Backs the simulation binary and the test suite. Every simulated actuator
//! records the commands it receives and can be told to drift, ignore
//! commands, or fail reads and commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;

use super::{ActuatorError, ActuatorRegistry, MemberHandle, StateReporter};
use crate::types::{MemberCommand, MemberId, MemberState};

// ============================================================================
// Simulated Actuator
// ============================================================================

#[derive(Debug)]
struct SimState {
    state: MemberState,
    commands: Vec<MemberCommand>,
    reads: usize,
    fail_reads: bool,
    fail_commands: bool,
    stuck: bool,
    panic_on_read: bool,
}

/// A fake percentage-power actuator.
#[derive(Debug)]
pub struct SimulatedActuator {
    name: Option<String>,
    inner: Mutex<SimState>,
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedActuator {
    /// A healthy actuator that starts switched off.
    pub fn new() -> Self {
        Self {
            name: None,
            inner: Mutex::new(SimState {
                state: MemberState::Power(0.0),
                commands: Vec::new(),
                reads: 0,
                fail_reads: false,
                fail_commands: false,
                stuck: false,
                panic_on_read: false,
            }),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the reported state, as if someone flipped the relay by hand.
    pub fn force_state(&self, state: MemberState) {
        self.lock().state = state;
    }

    /// Ignore every command; the reported state never changes.
    pub fn set_stuck(&self, stuck: bool) {
        self.lock().stuck = stuck;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    /// Panic inside `read_state`, simulating a defect in a host driver.
    pub fn set_panic_on_read(&self, panic: bool) {
        self.lock().panic_on_read = panic;
    }

    pub fn state(&self) -> MemberState {
        self.lock().state.clone()
    }

    /// Every command received so far, including failed ones.
    pub fn commands(&self) -> Vec<MemberCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    fn apply(&self, command: MemberCommand) -> Result<(), ActuatorError> {
        let mut sim = self.lock();
        sim.commands.push(command);
        if sim.fail_commands {
            return Err(ActuatorError::Rejected(format!("simulated failure on {command}")));
        }
        if !sim.stuck {
            sim.state = match command {
                MemberCommand::On { power } => MemberState::Power(f64::from(power)),
                MemberCommand::Off => MemberState::Power(0.0),
            };
        }
        Ok(())
    }
}

#[async_trait]
impl MemberHandle for SimulatedActuator {
    fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[allow(clippy::panic)]
    async fn read_state(&self) -> Result<MemberState, ActuatorError> {
        let mut sim = self.lock();
        sim.reads += 1;
        if sim.panic_on_read {
            drop(sim);
            panic!("simulated actuator driver fault");
        }
        if sim.fail_reads {
            return Err(ActuatorError::Unavailable("simulated read failure".to_string()));
        }
        Ok(sim.state.clone())
    }

    async fn command_on(&self, power: u8) -> Result<(), ActuatorError> {
        self.apply(MemberCommand::On { power })
    }

    async fn command_off(&self) -> Result<(), ActuatorError> {
        self.apply(MemberCommand::Off)
    }
}

// ============================================================================
// In-Memory Registry
// ============================================================================

/// Registry of simulated actuators, in insertion order.
pub struct InMemoryRegistry {
    entries: RwLock<Vec<(MemberId, Arc<SimulatedActuator>)>>,
    direct_lookup: bool,
    panic_on_lookup: AtomicBool,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            direct_lookup: true,
            panic_on_lookup: AtomicBool::new(false),
        }
    }

    /// A registry whose direct lookup always misses, forcing the fallback scan.
    pub fn without_direct_lookup() -> Self {
        Self {
            direct_lookup: false,
            ..Self::new()
        }
    }

    /// Register an actuator and return a handle for inspection.
    pub fn insert(&self, id: impl Into<MemberId>, actuator: SimulatedActuator) -> Arc<SimulatedActuator> {
        let actuator = Arc::new(actuator);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.into(), actuator.clone()));
        actuator
    }

    pub fn get(&self, id: &MemberId) -> Option<Arc<SimulatedActuator>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(entry, _)| entry == id)
            .map(|(_, actuator)| actuator.clone())
    }

    /// Panic inside `lookup`, simulating a defect in the host registry itself.
    pub fn set_panic_on_lookup(&self, panic: bool) {
        self.panic_on_lookup.store(panic, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActuatorRegistry for InMemoryRegistry {
    #[allow(clippy::panic)]
    fn lookup(&self, id: &MemberId) -> Option<Arc<dyn MemberHandle>> {
        if self.panic_on_lookup.load(Ordering::SeqCst) {
            panic!("simulated registry fault");
        }
        if !self.direct_lookup {
            return None;
        }
        self.get(id).map(|actuator| actuator as Arc<dyn MemberHandle>)
    }

    fn iterate(&self) -> Vec<(MemberId, Arc<dyn MemberHandle>)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, actuator)| (id.clone(), actuator.clone() as Arc<dyn MemberHandle>))
            .collect()
    }
}

// ============================================================================
// Recording Reporter
// ============================================================================

/// State reporter that remembers every report it receives.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, u8)>>,
    fail: Mutex<bool>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn reports(&self) -> Vec<(String, u8)> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_power(&self) -> Option<u8> {
        self.reports().last().map(|(_, power)| *power)
    }
}

#[async_trait]
impl StateReporter for RecordingReporter {
    async fn report_group_state(&self, group_id: &str, power: u8) -> Result<(), ActuatorError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((group_id.to_string(), power));
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(ActuatorError::Report("simulated UI failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_update_state() {
        let actuator = SimulatedActuator::new();
        actuator.command_on(60).await.unwrap();
        assert_eq!(actuator.read_state().await.unwrap(), MemberState::Power(60.0));
        actuator.command_off().await.unwrap();
        assert_eq!(actuator.state(), MemberState::Power(0.0));
        assert_eq!(
            actuator.commands(),
            vec![MemberCommand::On { power: 60 }, MemberCommand::Off]
        );
    }

    #[tokio::test]
    async fn test_stuck_actuator_ignores_commands() {
        let actuator = SimulatedActuator::new();
        actuator.set_stuck(true);
        actuator.command_on(100).await.unwrap();
        assert_eq!(actuator.state(), MemberState::Power(0.0));
        assert_eq!(actuator.commands().len(), 1);
    }

    #[test]
    fn test_failures_are_reported() {
        let actuator = SimulatedActuator::new();
        actuator.set_fail_reads(true);
        actuator.set_fail_commands(true);
        tokio_test::assert_err!(tokio_test::block_on(actuator.read_state()));
        tokio_test::assert_err!(tokio_test::block_on(actuator.command_off()));
        assert_eq!(actuator.read_count(), 1);
        assert_eq!(actuator.commands(), vec![MemberCommand::Off]);
    }

    #[test]
    fn test_registry_preserves_insertion_order() {
        let registry = InMemoryRegistry::new();
        registry.insert("b", SimulatedActuator::new());
        registry.insert("a", SimulatedActuator::new());
        let ids: Vec<String> = registry
            .iterate()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.len(), 2);
    }
}
