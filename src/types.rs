//! Core domain types shared by the distribution, normalization and engine modules.

use serde::{Deserialize, Serialize};

/// Full power, in percent.
pub const FULL_POWER: u8 = 100;

// ============================================================================
// Member Identity
// ============================================================================

/// Opaque identifier of an externally owned actuator.
///
/// Hosts identify actuators by string or by integer; both are normalised to
/// their string form so lookups and fallback scans compare one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawMemberId", into = "String")]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty identifier marks an unused configuration slot.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<MemberId> for String {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

/// Wire form of a member id: either a TOML/JSON integer or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMemberId {
    Int(i64),
    Str(String),
}

impl From<RawMemberId> for MemberId {
    fn from(raw: RawMemberId) -> Self {
        match raw {
            RawMemberId::Int(n) => Self(n.to_string()),
            RawMemberId::Str(s) => Self(s.trim().to_string()),
        }
    }
}

/// A configured group member: identifier plus optional display name.
///
/// The engine never owns the actuator behind a member; it only holds the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Member {
    pub fn new(id: impl Into<MemberId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.id, name),
            None => write!(f, "{}", self.id),
        }
    }
}

// ============================================================================
// Member State & Commands
// ============================================================================

/// Raw state reported by a member actuator, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MemberState {
    /// Numeric power attribute (0-100, possibly fractional).
    Power(f64),
    /// Plain on/off switch.
    Switch(bool),
    /// Structured state object as the host reports it.
    Structured(serde_json::Value),
    /// Nothing readable was exposed.
    Unknown,
}

/// A single command addressed to one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MemberCommand {
    On { power: u8 },
    Off,
}

impl MemberCommand {
    /// Corrective command that drives a member to the boolean target.
    pub const fn for_target(on: bool) -> Self {
        if on {
            Self::On { power: FULL_POWER }
        } else {
            Self::Off
        }
    }

    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On { .. })
    }
}

impl std::fmt::Display for MemberCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On { power } => write!(f, "ON@{power}%"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

// ============================================================================
// Policy & Lifecycle
// ============================================================================

/// Algorithm mapping one group power value onto per-member commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// Every member receives the group power.
    #[default]
    Uniform,
    /// Members are filled in order, one share of 100/N at a time.
    #[serde(alias = "sequential-fill", alias = "sequentialFill")]
    SequentialFill,
}

impl std::fmt::Display for DistributionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::SequentialFill => write!(f, "sequential_fill"),
        }
    }
}

impl std::str::FromStr for DistributionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "uniform" => Ok(Self::Uniform),
            "sequential_fill" | "sequentialfill" | "sequential" => Ok(Self::SequentialFill),
            other => Err(format!("unknown distribution policy '{other}'")),
        }
    }
}

/// Lifecycle of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// Clamp any requested power into [0, 100].
pub fn clamp_power(value: i64) -> u8 {
    // Lossless: the clamped value always fits in u8.
    u8::try_from(value.clamp(0, i64::from(FULL_POWER))).unwrap_or(FULL_POWER)
}

/// Boolean reconciliation target derived from a group power.
pub const fn desired_on(power: u8) -> bool {
    power > 0
}
