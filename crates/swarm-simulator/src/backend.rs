//! # Swarm Backends
//!
//! Abstract command/query interface over a swarm. The transport layer only
//! talks to this trait, so the simulated swarm can be swapped for a hardware
//! backend. A backend is chosen once at startup from [`BackendKind`].

use std::sync::Arc;

use async_trait::async_trait;
use swarm_domain::{FormationParams, RunId, TrajectorySample, Vec3, VehicleId, VehicleState};
use swarm_persistence::{PersistenceError, SharedSink};
use tokio::task::JoinHandle;

use crate::command::CommandOutcome;
use crate::config::{BackendKind, SimConfig};
use crate::engine::Engine;
use crate::error::{CommandError, CommandResult, EngineError};
use crate::runner::SimulationRunner;

/// Shared backend handle
pub type SharedBackend = Arc<dyn SwarmBackend>;

/// Swarm command and query operations
#[async_trait]
pub trait SwarmBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create `count` vehicles; resolves once they exist.
    async fn create_swarm(&self, count: usize) -> CommandResult<(RunId, Vec<VehicleId>)>;

    async fn takeoff(&self, id: &VehicleId, height: f64, duration: f64)
    -> CommandResult<CommandOutcome>;

    async fn goto(&self, id: &VehicleId, target: Vec3, speed: f64) -> CommandResult<CommandOutcome>;

    async fn land(&self, id: &VehicleId) -> CommandResult<CommandOutcome>;

    /// Arrange all flying vehicles; `shape` is a formation tag.
    async fn set_formation(&self, shape: &str, params: FormationParams)
    -> CommandResult<CommandOutcome>;

    /// Stop every vehicle immediately. Returns the vehicles that changed.
    async fn emergency_stop(&self) -> Vec<VehicleId>;

    async fn reset(&self);

    async fn states(&self) -> Vec<VehicleState>;

    async fn vehicle_state(&self, id: &VehicleId) -> CommandResult<VehicleState>;

    /// Trajectory samples of a run, ordered by time then vehicle.
    async fn logs(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>, PersistenceError>;

    /// Stop background work.
    async fn shutdown(&self);
}

// =============================================================================
// SIMULATED BACKEND
// =============================================================================

/// Backend over the in-process simulation loop.
#[derive(Clone)]
pub struct SimulatedBackend {
    runner: SimulationRunner,
}

impl SimulatedBackend {
    #[must_use]
    pub const fn new(runner: SimulationRunner) -> Self {
        Self { runner }
    }

    #[must_use]
    pub const fn runner(&self) -> &SimulationRunner {
        &self.runner
    }
}

#[async_trait]
impl SwarmBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn create_swarm(&self, count: usize) -> CommandResult<(RunId, Vec<VehicleId>)> {
        self.runner.create_swarm(count).await
    }

    async fn takeoff(
        &self,
        id: &VehicleId,
        height: f64,
        duration: f64,
    ) -> CommandResult<CommandOutcome> {
        self.runner.takeoff(id, height, duration).await
    }

    async fn goto(&self, id: &VehicleId, target: Vec3, speed: f64) -> CommandResult<CommandOutcome> {
        self.runner.goto(id, target, speed).await
    }

    async fn land(&self, id: &VehicleId) -> CommandResult<CommandOutcome> {
        self.runner.land(id).await
    }

    async fn set_formation(
        &self,
        shape: &str,
        params: FormationParams,
    ) -> CommandResult<CommandOutcome> {
        self.runner.set_formation_tagged(shape, params).await
    }

    async fn emergency_stop(&self) -> Vec<VehicleId> {
        self.runner.emergency_stop()
    }

    async fn reset(&self) {
        self.runner.reset();
    }

    async fn states(&self) -> Vec<VehicleState> {
        self.runner.snapshot().vehicles
    }

    async fn vehicle_state(&self, id: &VehicleId) -> CommandResult<VehicleState> {
        self.runner
            .vehicle(id)
            .ok_or_else(|| CommandError::UnknownVehicle(id.clone()))
    }

    async fn logs(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>, PersistenceError> {
        self.runner.query(run_id)
    }

    async fn shutdown(&self) {
        self.runner.shutdown();
    }
}

/// Build the configured backend and start its background loop.
pub fn build_backend(
    config: SimConfig,
    sink: SharedSink,
) -> Result<(SharedBackend, JoinHandle<()>), EngineError> {
    match config.backend {
        BackendKind::Mock => {
            let engine = Engine::new(config, sink)?;
            let (runner, handle) = SimulationRunner::spawn(engine)?;
            tracing::info!(backend = %BackendKind::Mock, "Backend ready");
            Ok((Arc::new(SimulatedBackend::new(runner)), handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swarm_domain::VehicleStatus;
    use swarm_persistence::InMemorySink;

    use super::*;

    fn backend() -> (SharedBackend, JoinHandle<()>) {
        build_backend(
            SimConfig {
                position_noise_std: 0.0,
                speed_multiplier: 10.0,
                ..SimConfig::default()
            },
            Arc::new(InMemorySink::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_backend_roundtrip() {
        let (backend, handle) = backend();
        assert_eq!(backend.kind(), BackendKind::Mock);

        let (run_id, ids) = backend.create_swarm(2).await.unwrap();
        assert_eq!(backend.states().await.len(), 2);
        let state = backend.vehicle_state(&ids[0]).await.unwrap();
        assert_eq!(state.status, VehicleStatus::Idle);

        assert!(matches!(
            backend.vehicle_state(&VehicleId::from("d7")).await,
            Err(CommandError::UnknownVehicle(_))
        ));
        assert!(matches!(
            backend.set_formation("hexagon", FormationParams::default()).await,
            Err(CommandError::UnknownFormation(_))
        ));

        backend.takeoff(&ids[0], 0.5, 2.0).await.unwrap();
        assert_eq!(backend.emergency_stop().await.len(), 2);
        assert!(!backend.logs(&run_id).await.unwrap().is_empty());

        backend.shutdown().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_through_backend() {
        let (backend, _handle) = backend();
        backend.create_swarm(3).await.unwrap();
        backend.reset().await;
        assert!(backend.states().await.is_empty());
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_unusable_tick_period_starts_nothing() {
        let result = build_backend(
            SimConfig {
                speed_multiplier: 1e12,
                ..SimConfig::default()
            },
            Arc::new(InMemorySink::new()),
        );
        assert!(matches!(
            result,
            Err(EngineError::Config(crate::error::ConfigError::InvalidValue {
                key: "SIMULATION_SPEED",
                ..
            }))
        ));
    }
}
