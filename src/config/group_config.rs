//! Group Configuration - member slots and reconciliation tuning as TOML values
//!
//! Invalid individual values (a non-numeric interval, an unknown auto-correct
//! option) fail closed to their defaults with a warning instead of rejecting
//! the whole file. Structural problems (too many members, empty group id) are
//! validation errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults::{
    member_slot_label, CONFIG_ENV_VAR, DEFAULT_GROUP_ID, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MEMBER_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_SECS, LOCAL_CONFIG_FILE, MAX_MEMBERS,
    PROP_AUTO_CORRECT, PROP_CHECK_INTERVAL, PROP_DISTRIBUTION,
};
use crate::types::{DistributionPolicy, Member, MemberId};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Static configuration of one power group.
///
/// Load with `GroupSpec::load()` which searches:
/// 1. `$POWER_GROUP_CONFIG` env var
/// 2. `./group_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Group identity, members and distribution policy
    #[serde(default)]
    pub group: GroupInfo,

    /// Reconciliation loop tuning
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Group identity and membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Identifier the group reports its own state under
    #[serde(default = "default_group_id")]
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Ordered member slots; empty identifiers are skipped
    #[serde(default)]
    pub members: Vec<MemberEntry>,

    /// How a group power value is spread over the members
    #[serde(default)]
    pub distribution: DistributionPolicy,
}

impl Default for GroupInfo {
    fn default() -> Self {
        Self {
            id: default_group_id(),
            name: String::new(),
            members: Vec::new(),
            distribution: DistributionPolicy::default(),
        }
    }
}

/// One member slot: a bare identifier or a table with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberEntry {
    Id(MemberId),
    Detailed(Member),
}

impl MemberEntry {
    fn into_member(self) -> Member {
        match self {
            Self::Id(id) => Member::new(id),
            Self::Detailed(member) => member,
        }
    }
}

/// Reconciliation loop parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between cycles (positive; invalid values fall back to 5)
    #[serde(default = "default_interval", deserialize_with = "lenient_interval")]
    pub interval_secs: u64,

    /// Issue corrective commands on mismatch (off = monitoring only)
    #[serde(default, deserialize_with = "lenient_flag")]
    pub auto_correct: bool,

    /// Delay before the first cycle (ms)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on each member read or command (ms)
    #[serde(default = "default_member_timeout")]
    pub member_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            auto_correct: false,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            member_timeout_ms: DEFAULT_MEMBER_TIMEOUT_MS,
        }
    }
}

impl ReconcileConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub const fn member_timeout(&self) -> Duration {
        Duration::from_millis(self.member_timeout_ms)
    }
}

fn default_group_id() -> String {
    DEFAULT_GROUP_ID.to_string()
}

const fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

const fn default_member_timeout() -> u64 {
    DEFAULT_MEMBER_TIMEOUT_MS
}

// ============================================================================
// Lenient Value Parsing
// ============================================================================

/// Parse a poll interval from an integer, float or numeric string.
///
/// Returns `None` for anything that does not round to a positive number of
/// seconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_interval(value: &Value) -> Option<u64> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !secs.is_finite() {
        return None;
    }
    let secs = secs.round();
    (secs >= 1.0 && secs <= u64::MAX as f64).then_some(secs as u64)
}

/// Parse an on/off option from a boolean or a `Yes`/`No` style string.
pub fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Some(true),
            "no" | "false" | "off" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn lenient_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(parse_interval(&raw).unwrap_or_else(|| {
        warn!(value = %raw, default = DEFAULT_POLL_INTERVAL_SECS, "Invalid poll interval, using default");
        DEFAULT_POLL_INTERVAL_SECS
    }))
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(parse_flag(&raw).unwrap_or_else(|| {
        warn!(value = %raw, "Invalid auto-correct option, monitoring only");
        false
    }))
}

// ============================================================================
// Loading
// ============================================================================

impl GroupSpec {
    /// Build a spec in code.
    pub fn new(id: impl Into<String>, members: impl IntoIterator<Item = Member>) -> Self {
        Self {
            group: GroupInfo {
                id: id.into(),
                members: members.into_iter().map(MemberEntry::Detailed).collect(),
                ..GroupInfo::default()
            },
            reconcile: ReconcileConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: DistributionPolicy) -> Self {
        self.group.distribution = policy;
        self
    }

    pub fn with_auto_correct(mut self, auto_correct: bool) -> Self {
        self.reconcile.auto_correct = auto_correct;
        self
    }

    /// Set the poll interval; zero falls back to the default.
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.reconcile.interval_secs = if secs == 0 {
            DEFAULT_POLL_INTERVAL_SECS
        } else {
            secs
        };
        self
    }

    pub fn with_initial_delay_ms(mut self, millis: u64) -> Self {
        self.reconcile.initial_delay_ms = millis;
        self
    }

    pub fn with_member_timeout_ms(mut self, millis: u64) -> Self {
        self.reconcile.member_timeout_ms = millis;
        self
    }

    /// Configured members in slot order, with empty slots skipped.
    pub fn members(&self) -> Vec<Member> {
        self.group
            .members
            .iter()
            .cloned()
            .map(MemberEntry::into_member)
            .filter(|m| !m.id.is_empty())
            .collect()
    }

    /// Build a spec from a host property map.
    ///
    /// Reads `"Actor 1"` .. `"Actor 8"`, `"Check interval (s)"`,
    /// `"Auto-correct mismatch"` (`"Yes"`/`"No"`) and `"Distribution"`.
    /// Missing or invalid values fall back to defaults.
    pub fn from_properties(id: impl Into<String>, props: &HashMap<String, Value>) -> Self {
        let members = (1..=MAX_MEMBERS)
            .filter_map(|slot| props.get(&member_slot_label(slot)))
            .filter_map(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(MemberId::from(s.trim())),
                Value::Number(n) => Some(MemberId::from(n.to_string())),
                _ => None,
            })
            .map(MemberEntry::Id)
            .collect();

        let interval_secs = match props.get(PROP_CHECK_INTERVAL) {
            None | Some(Value::Null) => DEFAULT_POLL_INTERVAL_SECS,
            Some(raw) => parse_interval(raw).unwrap_or_else(|| {
                warn!(value = %raw, "Invalid check interval property, using default");
                DEFAULT_POLL_INTERVAL_SECS
            }),
        };

        let auto_correct = props
            .get(PROP_AUTO_CORRECT)
            .and_then(parse_flag)
            .unwrap_or(false);

        let distribution = props
            .get(PROP_DISTRIBUTION)
            .and_then(Value::as_str)
            .map(|s| {
                s.parse().unwrap_or_else(|e: String| {
                    warn!(error = %e, "Invalid distribution property, using uniform");
                    DistributionPolicy::Uniform
                })
            })
            .unwrap_or_default();

        let spec = Self {
            group: GroupInfo {
                id: id.into(),
                name: String::new(),
                members,
                distribution,
            },
            reconcile: ReconcileConfig {
                interval_secs,
                auto_correct,
                ..ReconcileConfig::default()
            },
        };

        info!(
            group = %spec.group.id,
            members = spec.group.members.len(),
            interval_secs = spec.reconcile.interval_secs,
            auto_correct = spec.reconcile.auto_correct,
            "Group configured from host properties"
        );
        spec
    }

    /// Load configuration using the standard search order:
    /// 1. `$POWER_GROUP_CONFIG` environment variable
    /// 2. `./group_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), group = %config.group.id, "Loaded group config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./group_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(group = %config.group.id, "Loaded group config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Group config saved");
        Ok(())
    }

    /// Validate structural constraints.
    ///
    /// Rules:
    /// - group id must not be empty
    /// - at most eight non-empty member slots
    /// - member timeout must be positive
    ///
    /// Duplicate members are allowed (they receive every command twice) but
    /// logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.group.id.trim().is_empty() {
            errors.push("group.id must not be empty".to_string());
        }

        let members = self.members();
        if members.len() > MAX_MEMBERS {
            errors.push(format!(
                "group.members has {} entries (maximum {})",
                members.len(),
                MAX_MEMBERS
            ));
        }

        if self.reconcile.member_timeout_ms == 0 {
            errors.push("reconcile.member_timeout_ms must be greater than 0".to_string());
        }

        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.id == member.id) {
                warn!(member = %member.id, "Duplicate group member, it will receive every command twice");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let spec = GroupSpec::default();
        assert_eq!(spec.group.id, DEFAULT_GROUP_ID);
        assert!(spec.members().is_empty());
        assert_eq!(spec.reconcile.interval_secs, 5);
        assert!(!spec.reconcile.auto_correct);
        assert_eq!(spec.group.distribution, DistributionPolicy::Uniform);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval(&json!(10)), Some(10));
        assert_eq!(parse_interval(&json!(7.6)), Some(8));
        assert_eq!(parse_interval(&json!(" 12 ")), Some(12));
        assert_eq!(parse_interval(&json!("fast")), None);
        assert_eq!(parse_interval(&json!(0)), None);
        assert_eq!(parse_interval(&json!(-3)), None);
        assert_eq!(parse_interval(&json!(true)), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(&json!("Yes")), Some(true));
        assert_eq!(parse_flag(&json!("No")), Some(false));
        assert_eq!(parse_flag(&json!(true)), Some(true));
        assert_eq!(parse_flag(&json!("maybe")), None);
    }

    #[test]
    fn test_with_interval_zero_falls_back() {
        let spec = GroupSpec::default().with_interval_secs(0);
        assert_eq!(spec.reconcile.interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_members_skip_empty_slots() {
        let spec = GroupSpec::from_toml_str(
            r#"
[group]
members = ["heater-1", "", { id = "heater-2", name = "Boil 2" }, 4]
"#,
        )
        .unwrap();
        let members = spec.members();
        assert_eq!(members.len(), 3);
        assert_eq!(members[1].name.as_deref(), Some("Boil 2"));
        assert_eq!(members[2].id.as_str(), "4");
    }
}
