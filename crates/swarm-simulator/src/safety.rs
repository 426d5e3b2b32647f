//! Safety events recorded against a run.

use serde::Serialize;
use swarm_domain::{Vec3, VehicleId};

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SafetyEventKind {
    /// Battery reached the low threshold; the vehicle was sent to land
    BatteryLow { battery: f64 },
    BatteryCritical { battery: f64 },
    OutOfBounds { position: Vec3 },
    NonFiniteState,
    SeparationViolation { distance: f64 },
    EmergencyStop,
}

impl SafetyEventKind {
    /// Whether the affected vehicles always end up in `error`. Separation
    /// violations do so only under the escalate policy.
    #[must_use]
    pub const fn forces_error(&self) -> bool {
        !matches!(
            self,
            Self::BatteryLow { .. } | Self::SeparationViolation { .. }
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BatteryLow { .. } => "batteryLow",
            Self::BatteryCritical { .. } => "batteryCritical",
            Self::OutOfBounds { .. } => "outOfBounds",
            Self::NonFiniteState => "nonFiniteState",
            Self::SeparationViolation { .. } => "separationViolation",
            Self::EmergencyStop => "emergencyStop",
        }
    }
}

/// A safety event at a simulation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyEvent {
    /// Run-relative simulation time
    pub t: f64,
    pub vehicles: Vec<VehicleId>,
    #[serde(flatten)]
    pub kind: SafetyEventKind,
}

impl SafetyEvent {
    #[must_use]
    pub const fn new(t: f64, vehicles: Vec<VehicleId>, kind: SafetyEventKind) -> Self {
        Self { t, vehicles, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = SafetyEvent::new(
            1.5,
            vec![VehicleId::from("d1"), VehicleId::from("d2")],
            SafetyEventKind::SeparationViolation { distance: 0.1 },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "separationViolation");
        assert_eq!(json["vehicles"][1], "d2");
        assert!((json["distance"].as_f64().unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_forces_error() {
        assert!(SafetyEventKind::EmergencyStop.forces_error());
        assert!(SafetyEventKind::BatteryCritical { battery: 4.0 }.forces_error());
        assert!(!SafetyEventKind::BatteryLow { battery: 19.0 }.forces_error());
        assert!(!SafetyEventKind::SeparationViolation { distance: 0.2 }.forces_error());
    }
}
