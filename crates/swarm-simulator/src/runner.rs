//! # Simulation Runner
//!
//! Drives an [`Engine`] from a tokio interval at `tick_rate_hz ×
//! speed_multiplier` wall rate. Each wall tick advances `1 / tick_rate_hz`
//! simulated seconds.
//!
//! Commands are issued under the read lock and awaited outside of it; the
//! loop takes the write lock for the duration of one tick only, so a
//! snapshot always sees the world entirely before or after a tick.

use std::sync::Arc;

use parking_lot::RwLock;
use swarm_domain::{
    FormationParams, FormationSpec, RunId, TrajectorySample, Vec3, VehicleId, VehicleState,
};
use swarm_persistence::PersistenceError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::command::CommandReply;
use crate::engine::{Engine, SwarmAllocation, SwarmSnapshot};
use crate::error::{CommandResult, EngineError};
use crate::run::RunSummary;

/// Cloneable handle on a running simulation loop.
#[derive(Clone)]
pub struct SimulationRunner {
    engine: Arc<RwLock<Engine>>,
    shutdown: Arc<watch::Sender<bool>>,
    /// Ticks completed by the loop since spawn, unaffected by resets
    ticks: watch::Receiver<u64>,
}

impl SimulationRunner {
    /// Start the tick loop. Must be called from within a tokio runtime.
    ///
    /// The loop stops on [`shutdown`](Self::shutdown), once every handle has
    /// been dropped, or if the engine rejects its timestep. Fails without
    /// spawning when the configured wall period is unusable.
    pub fn spawn(engine: Engine) -> Result<(Self, JoinHandle<()>), EngineError> {
        let period = engine.config().wall_tick_interval()?;
        let dt = engine.config().tick_dt();
        let engine = Arc::new(RwLock::new(engine));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (tick_tx, tick_rx) = watch::channel(0u64);
        let loop_engine = Arc::clone(&engine);

        info!(period_ms = period.as_secs_f64() * 1000.0, dt, "Simulation loop starting");

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut completed = 0u64;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let result = loop_engine.write().tick(dt);
                        if let Err(err) = result {
                            error!(error = %err, "Tick failed, stopping loop");
                            break;
                        }
                        completed += 1;
                        tick_tx.send_replace(completed);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(ticks = completed, "Simulation loop stopped");
        });

        Ok((
            Self {
                engine,
                shutdown: Arc::new(shutdown_tx),
                ticks: tick_rx,
            },
            handle,
        ))
    }

    /// Run `f` against the engine under the read lock.
    pub fn with_engine<R>(&self, f: impl FnOnce(&Engine) -> R) -> R {
        f(&self.engine.read())
    }

    /// Ticks completed since the loop started.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        *self.ticks.borrow()
    }

    /// Wait until the loop has completed `count` more ticks. Returns `false`
    /// if the loop stopped first.
    pub async fn wait_ticks(&self, count: u64) -> bool {
        let mut rx = self.ticks.clone();
        let target = *rx.borrow_and_update() + count;
        rx.wait_for(|done| *done >= target).await.is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Allocate and materialize a swarm; resolves once the vehicles exist.
    pub async fn create_swarm(&self, count: usize) -> CommandResult<(RunId, Vec<VehicleId>)> {
        let SwarmAllocation {
            run_id,
            vehicle_ids,
            ticket,
        } = self.engine.read().create_swarm(count)?;
        ticket.outcome().await?;
        Ok((run_id, vehicle_ids))
    }

    pub async fn takeoff(&self, id: &VehicleId, height: f64, duration: f64) -> CommandReply {
        let ticket = self.engine.read().takeoff(id, height, duration)?;
        ticket.outcome().await
    }

    pub async fn goto(&self, id: &VehicleId, target: Vec3, speed: f64) -> CommandReply {
        let ticket = self.engine.read().goto(id, target, speed)?;
        ticket.outcome().await
    }

    pub async fn land(&self, id: &VehicleId) -> CommandReply {
        let ticket = self.engine.read().land(id)?;
        ticket.outcome().await
    }

    pub async fn set_formation(&self, spec: FormationSpec) -> CommandReply {
        let ticket = self.engine.read().set_formation(spec)?;
        ticket.outcome().await
    }

    pub async fn set_formation_tagged(&self, shape: &str, params: FormationParams) -> CommandReply {
        let ticket = self.engine.read().set_formation_tagged(shape, params)?;
        ticket.outcome().await
    }

    /// Stop every vehicle without waiting for the queue.
    pub fn emergency_stop(&self) -> Vec<VehicleId> {
        self.engine.write().emergency_stop()
    }

    pub fn reset(&self) {
        self.engine.write().reset();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> SwarmSnapshot {
        self.engine.read().snapshot()
    }

    #[must_use]
    pub fn vehicle(&self, id: &VehicleId) -> Option<VehicleState> {
        self.engine.read().vehicle(id)
    }

    #[must_use]
    pub fn run_summary(&self) -> Option<RunSummary> {
        self.engine.read().run_summary()
    }

    pub fn query(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>, PersistenceError> {
        self.engine.read().query(run_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swarm_domain::{FormationShape, VehicleStatus};

    use super::*;
    use crate::command::CommandOutcome;
    use crate::config::SimConfig;
    use crate::error::CommandError;

    fn fast_engine() -> Engine {
        Engine::in_memory(SimConfig {
            position_noise_std: 0.0,
            speed_multiplier: 10.0,
            ..SimConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_takeoff_and_hover() {
        let (runner, handle) = SimulationRunner::spawn(fast_engine()).unwrap();

        let (run_id, ids) = runner.create_swarm(2).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(runner.snapshot().vehicles.len(), 2);

        for id in &ids {
            let outcome = runner.takeoff(id, 0.6, 2.0).await.unwrap();
            assert!(matches!(outcome, CommandOutcome::TakeoffStarted { .. }));
        }
        assert!(runner.wait_ticks(50).await);

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.count_with_status(VehicleStatus::Flying), 2);
        assert!(!runner.query(&run_id).unwrap().is_empty());

        runner.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_issue_errors_are_immediate() {
        let (runner, _handle) = SimulationRunner::spawn(fast_engine()).unwrap();
        runner.create_swarm(1).await.unwrap();

        let err = runner
            .goto(&VehicleId::from("d1"), Vec3::new(5.0, 5.0, 0.6), 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::OutOfBounds { .. }));

        let err = runner
            .set_formation(FormationSpec::new(
                FormationShape::Circle,
                FormationParams::default(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::InsufficientVehicles);
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_emergency_stop_bypasses_queue() {
        let (runner, _handle) = SimulationRunner::spawn(fast_engine()).unwrap();
        let (_, ids) = runner.create_swarm(3).await.unwrap();
        runner.takeoff(&ids[0], 0.5, 2.0).await.unwrap();

        let stopped = runner.emergency_stop();
        assert_eq!(stopped.len(), 3);
        assert_eq!(runner.snapshot().count_with_status(VehicleStatus::Error), 3);
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_reset_clears_and_keeps_ticking() {
        let (runner, _handle) = SimulationRunner::spawn(fast_engine()).unwrap();
        runner.create_swarm(2).await.unwrap();
        runner.reset();

        assert!(runner.snapshot().vehicles.is_empty());
        assert!(runner.run_summary().is_none());
        assert!(runner.wait_ticks(2).await);
        assert!(runner.create_swarm(2).await.is_ok());
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_loop_stops_when_handles_drop() {
        let (runner, handle) = SimulationRunner::spawn(fast_engine()).unwrap();
        assert!(runner.wait_ticks(1).await);
        drop(runner);
        let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;
        tokio_test::assert_ok!(tokio_test::assert_ok!(joined));
    }
}
