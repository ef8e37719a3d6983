//! Group Configuration Module
//!
//! Provides the static configuration of one power group, loaded from TOML
//! files or from a host property map.
//!
//! ## Loading Order
//!
//! 1. `POWER_GROUP_CONFIG` environment variable (path to TOML file)
//! 2. `group_config.toml` in the current working directory
//! 3. Built-in defaults (no members, 5 s interval, monitoring only)
//!
//! There is no global config: the loaded [`GroupSpec`] is handed to the
//! engine at construction.
//!
//! ```ignore
//! let spec = GroupSpec::load();
//! let engine = ReconciliationEngine::new(spec, registry, reporter);
//! ```

mod group_config;
pub mod defaults;
pub mod validation;

pub use group_config::*;
