//! Member state normalization.
//!
//! Reduces whatever a member reports to one boolean: is it drawing power.
//! Anything unreadable normalises to OFF so a fault is never masked behind an
//! assumed-correct state.

use serde_json::Value;

use crate::types::MemberState;

/// Field carrying the power level inside a structured state.
const POWER_FIELD: &str = "power";

/// Normalise a raw member state to "is this member on".
pub fn is_on(state: &MemberState) -> bool {
    match state {
        MemberState::Power(power) => power_is_on(*power),
        MemberState::Switch(on) => *on,
        MemberState::Structured(value) => structured_is_on(value),
        MemberState::Unknown => false,
    }
}

/// Normalise the outcome of a state read; read failures count as OFF.
pub fn is_on_or_off<E>(read: &Result<MemberState, E>) -> bool {
    read.as_ref().map_or(false, is_on)
}

/// `round(power) != 0` with ties to even, so exactly 0.5 reads as OFF.
fn power_is_on(power: f64) -> bool {
    power.is_finite() && power.abs() > 0.5
}

fn structured_is_on(value: &Value) -> bool {
    match value {
        Value::Object(map) => match map.get(POWER_FIELD) {
            Some(power) => power_value_is_on(power),
            None => !map.is_empty(),
        },
        other => truthy(other),
    }
}

/// Apply the numeric power rule to a JSON `power` field.
fn power_value_is_on(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(power_is_on),
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().parse::<f64>().is_ok_and(power_is_on),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(power_is_on),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_power_rounds() {
        assert!(is_on(&MemberState::Power(100.0)));
        assert!(is_on(&MemberState::Power(0.51)));
        assert!(!is_on(&MemberState::Power(0.4)));
        assert!(!is_on(&MemberState::Power(f64::INFINITY)));
        assert!(!is_on(&MemberState::Power(0.0)));
        assert!(!is_on(&MemberState::Power(f64::NAN)));
    }

    #[test]
    fn test_half_percent_rounds_to_even() {
        // round-half-to-even: 0.5 -> 0 is OFF, 1.5 -> 2 and -0.5 -> 0
        assert!(!is_on(&MemberState::Power(0.5)));
        assert!(!is_on(&MemberState::Power(-0.5)));
        assert!(is_on(&MemberState::Power(1.5)));
        assert!(!is_on(&MemberState::Structured(json!({ "power": "0.5" }))));
    }

    #[test]
    fn test_switch_state() {
        assert!(is_on(&MemberState::Switch(true)));
        assert!(!is_on(&MemberState::Switch(false)));
    }

    #[test]
    fn test_structured_with_power_field() {
        assert!(is_on(&MemberState::Structured(json!({"power": 40}))));
        assert!(!is_on(&MemberState::Structured(json!({"power": 0, "state": true}))));
        assert!(is_on(&MemberState::Structured(json!({"power": "75"}))));
        assert!(!is_on(&MemberState::Structured(json!({"power": null}))));
    }

    #[test]
    fn test_structured_without_power_field() {
        assert!(is_on(&MemberState::Structured(json!({"state": "on"}))));
        assert!(!is_on(&MemberState::Structured(json!({}))));
        assert!(!is_on(&MemberState::Structured(Value::Null)));
    }

    #[test]
    fn test_unknown_and_failed_reads_are_off() {
        assert!(!is_on(&MemberState::Unknown));
        let failed: Result<MemberState, String> = Err("timeout".to_string());
        assert!(!is_on_or_off(&failed));
        let ok: Result<MemberState, String> = Ok(MemberState::Power(20.0));
        assert!(is_on_or_off(&ok));
    }
}
