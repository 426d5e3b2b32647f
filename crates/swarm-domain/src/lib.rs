//! # Swarm Simulator - Domain Model
//!
//! Value objects, enums and entity snapshots shared by the simulator and
//! the trajectory log. These types are the single source of truth for
//! every layer that talks about vehicles, runs and samples.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod geometry;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use geometry::{Vec3, Workspace};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable vehicle identifier, unique within a run (`d1`, `d2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Identifier for the vehicle created at zero-based position `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(format!("d{}", index + 1))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VehicleId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidVehicleId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Simulation session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// `run_<YYYYmmdd_HHMMSS>_<8 hex>`; the suffix keeps runs started within
    /// the same second apart.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("run_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Vehicle lifecycle status.
///
/// `GoingTo` is the sub-state of `Flying` used while a planned path is being
/// followed; a `Flying` vehicle without a path is hovering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleStatus {
    Idle,
    TakingOff,
    Flying,
    GoingTo,
    Landing,
    Landed,
    Error,
}

impl VehicleStatus {
    pub const ALL: [Self; 7] = [
        Self::Idle,
        Self::TakingOff,
        Self::Flying,
        Self::GoingTo,
        Self::Landing,
        Self::Landed,
        Self::Error,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TakingOff => "takingOff",
            Self::Flying => "flying",
            Self::GoingTo => "goingTo",
            Self::Landing => "landing",
            Self::Landed => "landed",
            Self::Error => "error",
        }
    }

    /// Physics is integrated only in these states.
    #[must_use]
    pub const fn is_airborne(&self) -> bool {
        matches!(
            self,
            Self::TakingOff | Self::Flying | Self::GoingTo | Self::Landing
        )
    }

    /// `Flying` including its `GoingTo` sub-state.
    #[must_use]
    pub const fn is_flying(&self) -> bool {
        matches!(self, Self::Flying | Self::GoingTo)
    }

    /// Participates in separation checks.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Landed | Self::Error)
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Formation shapes understood by the formation solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormationShape {
    Line,
    Circle,
    Grid,
    VShape,
}

impl FormationShape {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Circle => "circle",
            Self::Grid => "grid",
            Self::VShape => "v-shape",
        }
    }
}

impl fmt::Display for FormationShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormationShape {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "circle" => Ok(Self::Circle),
            "grid" => Ok(Self::Grid),
            "v-shape" | "vshape" | "v_shape" => Ok(Self::VShape),
            _ => Err(DomainError::UnknownFormation(s.to_string())),
        }
    }
}

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Formation parameters. Keys not used by a shape are ignored by it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormationParams {
    /// Circle radius in meters
    pub radius: f64,
    /// Distance between neighbours for line, grid and v-shape
    pub spacing: f64,
    /// Formation altitude
    pub height: f64,
    /// Cruise speed used for the resulting gotos
    pub speed: f64,
}

impl Default for FormationParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            spacing: 0.5,
            height: 0.6,
            speed: 0.5,
        }
    }
}

/// A shape together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormationSpec {
    pub shape: FormationShape,
    #[serde(default)]
    pub params: FormationParams,
}

impl FormationSpec {
    #[must_use]
    pub const fn new(shape: FormationShape, params: FormationParams) -> Self {
        Self { shape, params }
    }
}

/// Static obstacle: a point with a clearance radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub center: Vec3,
    #[serde(default)]
    pub radius: f64,
}

impl Obstacle {
    #[must_use]
    pub const fn new(center: Vec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Obstacle without an extent of its own.
    #[must_use]
    pub const fn point(center: Vec3) -> Self {
        Self::new(center, 0.0)
    }
}

// =============================================================================
// ENTITY SNAPSHOTS
// =============================================================================

/// One recorded vehicle state at one simulation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySample {
    /// Simulation time in seconds since the run started
    pub t: f64,
    pub vehicle_id: VehicleId,
    /// Reported (sensor) position
    pub position: Vec3,
    pub velocity: Vec3,
    pub battery: f64,
    pub status: VehicleStatus,
}

/// Read-side view of a single vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub id: VehicleId,
    /// Authoritative, noise-free position
    pub position: Vec3,
    /// Position as a sensor would report it
    pub reported_position: Vec3,
    pub velocity: Vec3,
    pub target: Option<Vec3>,
    pub battery: f64,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
    pub created_at_sim: f64,
}

// =============================================================================
// TRAIL BUFFER
// =============================================================================

/// Fixed-capacity ring buffer of recent positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailBuffer {
    points: VecDeque<Vec3>,
    capacity: usize,
}

impl TrailBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest one when full.
    pub fn push(&mut self, point: Vec3) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Vec3> {
        self.points.iter().copied().collect()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Unknown formation: {0}")]
    UnknownFormation(String),

    #[error("Unknown vehicle status: {0}")]
    UnknownStatus(String),

    #[error("Invalid vehicle id: '{0}'")]
    InvalidVehicleId(String),
}
