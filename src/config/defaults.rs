//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Group
// ============================================================================

/// Maximum number of member slots a group exposes.
pub const MAX_MEMBERS: usize = 8;

/// Group identifier used when the configuration does not name one.
pub const DEFAULT_GROUP_ID: &str = "power_group";

// ============================================================================
// Reconciliation Loop
// ============================================================================

/// Seconds between reconciliation cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Delay before the first cycle (ms), so the host can finish booting its
/// own actuators before they are compared.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 2_000;

/// Upper bound on any single member read or command (ms).
pub const DEFAULT_MEMBER_TIMEOUT_MS: u64 = 3_000;

// ============================================================================
// Config Loading
// ============================================================================

/// Environment variable pointing at a group config TOML file.
pub const CONFIG_ENV_VAR: &str = "POWER_GROUP_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "group_config.toml";

// ============================================================================
// Host Property Labels
// ============================================================================

/// Label of the n-th member slot (1-based) in host property maps.
pub fn member_slot_label(slot: usize) -> String {
    format!("Actor {slot}")
}

/// Poll interval property label.
pub const PROP_CHECK_INTERVAL: &str = "Check interval (s)";

/// Auto-correct property label; values are `"Yes"` / `"No"`.
pub const PROP_AUTO_CORRECT: &str = "Auto-correct mismatch";

/// Distribution policy property label.
pub const PROP_DISTRIBUTION: &str = "Distribution";
