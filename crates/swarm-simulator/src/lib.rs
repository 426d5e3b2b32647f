//! # Swarm Simulator
//!
//! Fixed-tick simulation of a swarm of small aerial vehicles: point-mass
//! physics with speed and acceleration limits, an obstacle-aware trajectory
//! planner, formation targets and pairwise separation monitoring.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │             SwarmBackend (async trait, swarm-sim)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        SimulationRunner (tokio interval, RwLock<Engine>)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ issue (&self)        tick (&mut self)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │  command queue ─▶ apply ─▶ vehicle step ─▶ collision check  │
//! └─────────────────────────────────────────────────────────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//! ┌──────────────┐  ┌────────────────┐  ┌────────────────────────┐
//! │   Planner    │  │   Formation    │  │  Run + TrajectorySink  │
//! │  (detours)   │  │    solver      │  │  (samples, events)     │
//! └──────────────┘  └────────────────┘  └────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use swarm_simulator::{Engine, SimConfig};
//!
//! let mut engine = Engine::in_memory(SimConfig::default())?;
//! let swarm = engine.create_swarm(4)?;
//! engine.tick(0.05)?;
//! for id in &swarm.vehicle_ids {
//!     engine.takeoff(id, 0.6, 2.0)?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod collision;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod formation;
pub mod planner;
pub mod run;
pub mod runner;
pub mod safety;
pub mod vehicle;

// Re-export commonly used types
pub use backend::{SharedBackend, SimulatedBackend, SwarmBackend, build_backend};
pub use collision::{CollisionMonitor, SeparationReport, SeparationViolation};
pub use command::{Command, CommandOutcome, CommandReply, CommandTicket};
pub use config::{BackendKind, CollisionPolicy, SimConfig};
pub use engine::{Engine, SwarmAllocation, SwarmSnapshot, TickReport};
pub use error::{CommandError, ConfigError, EngineError, ExperimentError};
pub use experiment::{ExperimentPlan, ExperimentReport, Scenario, run_experiment};
pub use formation::FormationSlot;
pub use planner::{PathMetrics, PlannedPath, TrajectoryPlanner, ValidationCase, ValidationReport};
pub use run::{RunStats, RunSummary};
pub use runner::SimulationRunner;
pub use safety::{SafetyEvent, SafetyEventKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
