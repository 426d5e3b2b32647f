//! # Simulator Error Types
//!
//! Command validation, configuration and engine errors.

use swarm_domain::{DomainError, RunId, Vec3, VehicleId, VehicleStatus};
use thiserror::Error;

/// Errors returned for a rejected command.
///
/// Static argument checks fail when the command is issued; state-dependent
/// checks fail when the command is dequeued and surface on its ticket.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(VehicleId),

    #[error("Vehicle {id} cannot {command} while {status}")]
    InvalidState {
        id: VehicleId,
        status: VehicleStatus,
        command: &'static str,
    },

    #[error("Target {target} is outside the workspace")]
    OutOfBounds { target: Vec3 },

    #[error("Speed {speed} m/s outside (0, {max}]")]
    SpeedOutOfRange { speed: f64, max: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown formation: {0}")]
    UnknownFormation(String),

    #[error("No flying vehicles to arrange")]
    InsufficientVehicles,

    #[error("Requested {requested} vehicles, allowed 1..={max}")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("Swarm already created for run {0}")]
    AlreadyInitialized(RunId),

    #[error("No collision-free path from {start} to {goal}")]
    NoPathFound { start: Vec3, goal: Vec3 },

    #[error("Command cancelled before it was applied")]
    Cancelled,
}

impl CommandError {
    /// Stable machine-readable code for the transport layer
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownVehicle(_) => "UNKNOWN_VEHICLE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::OutOfBounds { .. } => "OUT_OF_BOUNDS",
            Self::SpeedOutOfRange { .. } => "SPEED_OUT_OF_RANGE",
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::UnknownFormation(_) => "UNKNOWN_FORMATION",
            Self::InsufficientVehicles => "INSUFFICIENT_VEHICLES",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::AlreadyInitialized(_) => "ALREADY_INITIALIZED",
            Self::NoPathFound { .. } => "NO_PATH_FOUND",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Planning failures, as opposed to argument or state validation.
    #[must_use]
    pub const fn is_planning_failure(&self) -> bool {
        matches!(self, Self::NoPathFound { .. })
    }
}

impl From<DomainError> for CommandError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnknownFormation(tag) => Self::UnknownFormation(tag),
            other => Self::InvalidParameter(other.to_string()),
        }
    }
}

/// Bad configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Engine-level failures. Per-vehicle faults are not errors; they are
/// reported as safety events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Invalid timestep: {0}")]
    InvalidTimestep(f64),

    #[error("Invalid noise model: {0}")]
    NoiseModel(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures while running a scripted experiment.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Command rejected: {0}")]
    Command(#[from] CommandError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}

/// Result type alias for command operations
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CommandError::UnknownVehicle(VehicleId::from("d9")).error_code(),
            "UNKNOWN_VEHICLE"
        );
        assert_eq!(CommandError::Cancelled.error_code(), "CANCELLED");
        assert!(
            CommandError::NoPathFound {
                start: Vec3::ZERO,
                goal: Vec3::UNIT_X
            }
            .is_planning_failure()
        );
        assert!(!CommandError::InsufficientVehicles.is_planning_failure());
    }

    #[test]
    fn test_domain_error_mapping() {
        let err: CommandError = DomainError::UnknownFormation("hexagon".into()).into();
        assert_eq!(err, CommandError::UnknownFormation("hexagon".into()));

        let err: CommandError = DomainError::InvalidVehicleId(" ".into()).into();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_messages() {
        let err = CommandError::InvalidState {
            id: VehicleId::from("d1"),
            status: VehicleStatus::Landing,
            command: "land",
        };
        assert_eq!(err.to_string(), "Vehicle d1 cannot land while landing");

        let err = CommandError::OutOfBounds {
            target: Vec3::new(5.0, 5.0, 0.6),
        };
        assert_eq!(
            err.to_string(),
            "Target (5.000, 5.000, 0.600) is outside the workspace"
        );
    }
}
