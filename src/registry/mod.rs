//! Actuator registry collaborator interfaces.
//!
//! The host platform owns every physical actuator. The engine only sees three
//! narrow traits: a registry to resolve member ids, a handle to read and
//! command one member, and a reporter for the group's own power level.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Member, MemberId, MemberState};

pub use memory::{InMemoryRegistry, RecordingReporter, SimulatedActuator};

/// Failures raised by an external actuator or the host's state layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("Actuator unavailable: {0}")]
    Unavailable(String),

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Actuator driver panicked: {0}")]
    Fault(String),

    #[error("State report failed: {0}")]
    Report(String),
}

/// A live handle to one host actuator.
#[async_trait]
pub trait MemberHandle: Send + Sync {
    /// Host display name, used by the fallback scan.
    fn display_name(&self) -> Option<&str> {
        None
    }

    /// Read the actuator's current raw state.
    async fn read_state(&self) -> Result<MemberState, ActuatorError>;

    /// Switch the actuator on at `power` percent.
    async fn command_on(&self, power: u8) -> Result<(), ActuatorError>;

    /// Switch the actuator off.
    async fn command_off(&self) -> Result<(), ActuatorError>;
}

/// Host registry of actuators, shared read-only between any number of groups.
pub trait ActuatorRegistry: Send + Sync {
    /// Direct lookup by identifier.
    fn lookup(&self, id: &MemberId) -> Option<Arc<dyn MemberHandle>>;

    /// Every registered actuator. Only used when direct lookup misses.
    fn iterate(&self) -> Vec<(MemberId, Arc<dyn MemberHandle>)>;
}

/// Notifies the host UI/state layer of the group's reported power.
#[async_trait]
pub trait StateReporter: Send + Sync {
    async fn report_group_state(&self, group_id: &str, power: u8) -> Result<(), ActuatorError>;
}

/// Reporter for hosts without a state layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl StateReporter for NoopReporter {
    async fn report_group_state(&self, _group_id: &str, _power: u8) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Resolve a configured member to a live handle.
///
/// Tries direct lookup first, then scans the registry for an entry whose id
/// or display name matches the member's id or configured display name.
/// Returns `None` (after logging) when nothing matches.
pub fn resolve(registry: &dyn ActuatorRegistry, member: &Member) -> Option<Arc<dyn MemberHandle>> {
    if let Some(handle) = registry.lookup(&member.id) {
        return Some(handle);
    }

    let wanted_id = member.id.as_str();
    let wanted_name = member.name.as_deref();
    let found = registry.iterate().into_iter().find_map(|(id, handle)| {
        let name = handle.display_name();
        let matches = id.as_str() == wanted_id
            || name == Some(wanted_id)
            || wanted_name.is_some_and(|n| name == Some(n) || id.as_str() == n);
        matches.then_some(handle)
    });

    match found {
        Some(handle) => {
            debug!(member = %member, "Member resolved by registry scan");
            Some(handle)
        }
        None => {
            warn!(member = %member, "Member not found in actuator registry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_lookup() {
        let registry = InMemoryRegistry::new();
        registry.insert("heater-1", SimulatedActuator::new());
        assert!(resolve(&registry, &Member::new("heater-1")).is_some());
    }

    #[test]
    fn test_fallback_by_display_name() {
        let registry = InMemoryRegistry::new();
        registry.insert("a1b2", SimulatedActuator::named("Boil Heater"));
        let by_id_as_name = Member::new("Boil Heater");
        assert!(resolve(&registry, &by_id_as_name).is_some());

        let by_configured_name = Member::new("stale-id").with_name("Boil Heater");
        assert!(resolve(&registry, &by_configured_name).is_some());
    }

    #[test]
    fn test_fallback_by_id_string_form() {
        // Direct lookup always misses here, so only the scan can resolve it
        let registry = InMemoryRegistry::without_direct_lookup();
        registry.insert("7", SimulatedActuator::new());
        assert!(resolve(&registry, &Member::new(7_u64)).is_some());
    }

    #[test]
    fn test_missing_member() {
        let registry = InMemoryRegistry::new();
        registry.insert("heater-1", SimulatedActuator::new());
        assert!(resolve(&registry, &Member::new("pump")).is_none());
    }
}
