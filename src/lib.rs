//! Power Group: one logical actuator over up to eight member actuators
//!
//! ## Architecture
//!
//! - **Config**: static group description (members, interval, auto-correct, policy)
//! - **Distribution**: maps a 0-100 group power onto per-member commands
//! - **Normalize**: reduces any reported member state to on/off
//! - **Registry**: collaborator traits for the host's actuators, with lookup fallback
//! - **Engine**: explicit commands plus the background reconciliation loop

pub mod config;
pub mod types;
pub mod distribution;
pub mod normalize;
pub mod registry;
pub mod engine;

// Re-export configuration
pub use config::{ConfigError, GroupSpec};

// Re-export commonly used types
pub use types::{
    clamp_power, desired_on, DistributionPolicy, LifecycleState, Member, MemberCommand, MemberId,
    MemberState,
};

// Re-export collaborator interfaces
pub use registry::{ActuatorError, ActuatorRegistry, MemberHandle, NoopReporter, StateReporter};

// Re-export engine
pub use engine::{
    CheckOutcome, CommandReport, Correction, CycleReport, Delivery, EngineError, GroupStatus,
    PowerActuator, ReconcileStatus, ReconciliationEngine,
};
