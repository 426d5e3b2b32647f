//! # Simulation Engine
//!
//! Owns the vehicles and the current run, serializes every mutation and
//! advances the world one fixed tick at a time.
//!
//! Commands are validated in two stages. Argument checks that need no
//! vehicle state run when the command is issued (`&self`), so a bad
//! request fails synchronously and never reaches the queue. Everything else
//! runs when the command is dequeued at the start of the next tick; the
//! returned [`CommandTicket`] resolves with that outcome.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use swarm_domain::{
    FormationParams, FormationShape, FormationSpec, RunId, TrajectorySample, Vec3, VehicleId,
    VehicleState, VehicleStatus,
};
use swarm_persistence::{InMemorySink, PersistenceError, SharedSink};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::collision::{CollisionMonitor, SeparationReport, SeparationViolation};
use crate::command::{
    Command, CommandOutcome, CommandRecord, CommandReply, CommandTicket, QueuedCommand,
};
use crate::config::{CollisionPolicy, SimConfig};
use crate::error::{CommandError, EngineError};
use crate::formation;
use crate::planner::TrajectoryPlanner;
use crate::run::{Run, RunSummary};
use crate::safety::{SafetyEvent, SafetyEventKind};
use crate::vehicle::{SensorNoise, Vehicle};

/// Ids handed out at issue time, before the vehicles exist.
#[derive(Debug, Default)]
struct Roster {
    run_id: Option<RunId>,
    ids: Vec<VehicleId>,
    /// Emergency stop arrived before the vehicles were materialized
    stopped: bool,
}

/// Result of `create_swarm`: ids are usable immediately, the vehicles
/// appear at the next tick.
#[derive(Debug)]
pub struct SwarmAllocation {
    pub run_id: RunId,
    pub vehicle_ids: Vec<VehicleId>,
    pub ticket: CommandTicket,
}

/// Consistent view of every vehicle between two ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSnapshot {
    pub run_id: Option<RunId>,
    pub tick: u64,
    pub sim_time: f64,
    pub vehicles: Vec<VehicleState>,
}

impl SwarmSnapshot {
    #[must_use]
    pub fn vehicle(&self, id: &VehicleId) -> Option<&VehicleState> {
        self.vehicles.iter().find(|v| &v.id == id)
    }

    #[must_use]
    pub fn count_with_status(&self, status: VehicleStatus) -> usize {
        self.vehicles.iter().filter(|v| v.status == status).count()
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: u64,
    pub sim_time: f64,
    pub commands: Vec<CommandRecord>,
    pub events: Vec<SafetyEvent>,
    pub violations: Vec<SeparationViolation>,
    pub min_separation: Option<f64>,
    pub samples: usize,
}

/// Single-writer simulation core.
pub struct Engine {
    config: SimConfig,
    planner: TrajectoryPlanner,
    monitor: CollisionMonitor,
    vehicles: Vec<Vehicle>,
    roster: Mutex<Roster>,
    queue_tx: mpsc::UnboundedSender<QueuedCommand>,
    queue_rx: mpsc::UnboundedReceiver<QueuedCommand>,
    run: Option<Run>,
    sim_time: f64,
    tick: u64,
    noise: SensorNoise,
    sink: SharedSink,
}

impl Engine {
    /// Build an engine writing samples to `sink`.
    pub fn new(config: SimConfig, sink: SharedSink) -> Result<Self, EngineError> {
        config.validate()?;
        let noise = SensorNoise::new(config.position_noise_std, config.rng_seed)?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Ok(Self {
            planner: TrajectoryPlanner::new(config.planner_safety_radius)
                .with_bounds(config.workspace),
            monitor: CollisionMonitor::new(config.min_separation),
            vehicles: Vec::new(),
            roster: Mutex::new(Roster::default()),
            queue_tx,
            queue_rx,
            run: None,
            sim_time: 0.0,
            tick: 0,
            noise,
            sink,
            config,
        })
    }

    /// Engine with a process-lifetime in-memory log.
    pub fn in_memory(config: SimConfig) -> Result<Self, EngineError> {
        Self::new(config, Arc::new(InMemorySink::new()))
    }

    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub const fn sim_time(&self) -> f64 {
        self.sim_time
    }

    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick
    }

    // =========================================================================
    // Issue side
    // =========================================================================

    fn enqueue(&self, command: Command) -> CommandTicket {
        let (reply, ticket) = CommandTicket::channel(command.name());
        debug!(command = command.name(), "Command queued");
        // The engine holds the receiver, so the channel cannot be closed here
        let _ = self.queue_tx.send(QueuedCommand { command, reply });
        ticket
    }

    fn ensure_known(&self, id: &VehicleId) -> Result<(), CommandError> {
        if self.roster.lock().ids.contains(id) {
            Ok(())
        } else {
            Err(CommandError::UnknownVehicle(id.clone()))
        }
    }

    fn ensure_speed(&self, speed: f64) -> Result<(), CommandError> {
        let max = self.config.max_speed;
        if speed.is_finite() && speed > 0.0 && speed <= max {
            Ok(())
        } else {
            Err(CommandError::SpeedOutOfRange { speed, max })
        }
    }

    /// Allocate `count` vehicle ids and a run; vehicles appear on a ground
    /// grid at the next tick.
    pub fn create_swarm(&self, count: usize) -> Result<SwarmAllocation, CommandError> {
        let max = self.config.max_vehicles;
        if count == 0 || count > max {
            return Err(CommandError::CapacityExceeded {
                requested: count,
                max,
            });
        }

        let spawn = spawn_points(count, self.config.spawn_spacing);
        if let Some(outside) = spawn.iter().find(|p| !self.config.workspace.contains(**p)) {
            return Err(CommandError::InvalidParameter(format!(
                "spawn grid for {count} vehicles leaves the workspace at {outside}"
            )));
        }

        let mut roster = self.roster.lock();
        if let Some(run_id) = &roster.run_id {
            return Err(CommandError::AlreadyInitialized(run_id.clone()));
        }
        let run_id = RunId::generate(Utc::now());
        let vehicle_ids: Vec<VehicleId> = (0..count).map(VehicleId::from_index).collect();
        roster.run_id = Some(run_id.clone());
        roster.ids.clone_from(&vehicle_ids);
        drop(roster);

        info!(run_id = %run_id, count, "Swarm allocated");
        let ticket = self.enqueue(Command::CreateSwarm {
            run_id: run_id.clone(),
            vehicles: vehicle_ids.iter().cloned().zip(spawn).collect(),
        });

        Ok(SwarmAllocation {
            run_id,
            vehicle_ids,
            ticket,
        })
    }

    pub fn takeoff(
        &self,
        id: &VehicleId,
        height: f64,
        duration: f64,
    ) -> Result<CommandTicket, CommandError> {
        self.ensure_known(id)?;
        let workspace = self.config.workspace;
        if !(height.is_finite() && height > 0.0 && height <= workspace.max.z) {
            return Err(CommandError::OutOfBounds {
                target: Vec3::new(0.0, 0.0, height),
            });
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(CommandError::InvalidParameter(format!(
                "takeoff duration must be positive, got {duration}"
            )));
        }
        Ok(self.enqueue(Command::Takeoff {
            id: id.clone(),
            height,
            duration,
        }))
    }

    pub fn goto(
        &self,
        id: &VehicleId,
        target: Vec3,
        speed: f64,
    ) -> Result<CommandTicket, CommandError> {
        self.ensure_known(id)?;
        if !self.config.workspace.contains(target) {
            return Err(CommandError::OutOfBounds { target });
        }
        self.ensure_speed(speed)?;
        Ok(self.enqueue(Command::Goto {
            id: id.clone(),
            target,
            speed,
        }))
    }

    pub fn land(&self, id: &VehicleId) -> Result<CommandTicket, CommandError> {
        self.ensure_known(id)?;
        Ok(self.enqueue(Command::Land { id: id.clone() }))
    }

    pub fn set_formation(&self, spec: FormationSpec) -> Result<CommandTicket, CommandError> {
        formation::validate_params(spec.shape, &spec.params)?;
        self.ensure_speed(spec.params.speed)?;
        Ok(self.enqueue(Command::SetFormation(spec)))
    }

    /// `set_formation` from a shape tag such as `"circle"` or `"vshape"`.
    pub fn set_formation_tagged(
        &self,
        shape: &str,
        params: FormationParams,
    ) -> Result<CommandTicket, CommandError> {
        let shape: FormationShape = shape.parse()?;
        self.set_formation(FormationSpec::new(shape, params))
    }

    // =========================================================================
    // Immediate operations
    // =========================================================================

    /// Stop every vehicle in place and mark all non-landed ones as `error`.
    /// Bypasses the queue. A swarm that is allocated but not yet
    /// materialized comes up already in `error`.
    pub fn emergency_stop(&mut self) -> Vec<VehicleId> {
        let mut stopped: Vec<VehicleId> = self
            .vehicles
            .iter_mut()
            .filter_map(|v| v.emergency_stop().then(|| v.id().clone()))
            .collect();

        let roster = self.roster.get_mut();
        if self.run.is_none() && roster.run_id.is_some() {
            roster.stopped = true;
            stopped.extend(roster.ids.iter().cloned());
        }

        let t = self.run_time();
        if let Some(run) = self.run.as_mut() {
            run.push_event(SafetyEvent::new(
                t,
                stopped.clone(),
                SafetyEventKind::EmergencyStop,
            ));
        }
        warn!(stopped = stopped.len(), "Emergency stop");
        stopped
    }

    /// Drop vehicles, run and queued commands; the clock restarts at zero.
    pub fn reset(&mut self) {
        let mut cancelled = 0usize;
        while let Ok(queued) = self.queue_rx.try_recv() {
            let _ = queued.reply.send(Err(CommandError::Cancelled));
            cancelled += 1;
        }
        if let Some(run) = self.run.take() {
            info!(run_id = %run.id(), samples = run.stats().samples, "Run closed by reset");
        }
        self.vehicles.clear();
        *self.roster.get_mut() = Roster::default();
        self.sim_time = 0.0;
        self.tick = 0;
        info!(cancelled, "Simulation reset");
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance the simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f64) -> Result<TickReport, EngineError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(EngineError::InvalidTimestep(dt));
        }

        let commands = self.drain_commands();
        self.sim_time += dt;
        self.tick += 1;
        let t = self.run_time();

        let mut events = Vec::new();
        for vehicle in &mut self.vehicles {
            let outcome = vehicle.step(dt, &self.config, &mut self.noise);
            if let Some((from, to)) = outcome.transition {
                debug!(vehicle_id = %vehicle.id(), %from, %to, "Status changed");
            }
            for fault in outcome.faults {
                warn!(vehicle_id = %vehicle.id(), fault = fault.as_str(), "Safety fault");
                events.push(SafetyEvent::new(t, vec![vehicle.id().clone()], fault));
            }
        }

        let separation = self.monitor_separation(t, &mut events);
        let samples: Vec<TrajectorySample> = self.vehicles.iter().map(|v| v.sample(t)).collect();
        let sample_count = samples.len();

        if let Some(run) = self.run.as_mut() {
            run.record_tick(&samples, &events, &separation);
            self.sink.append_batch(run.id(), samples);
        }

        Ok(TickReport {
            tick: self.tick,
            sim_time: self.sim_time,
            commands,
            events,
            violations: separation.violations,
            min_separation: separation.min_distance,
            samples: sample_count,
        })
    }

    fn run_time(&self) -> f64 {
        self.run
            .as_ref()
            .map_or(self.sim_time, |run| run.relative_time(self.sim_time))
    }

    fn drain_commands(&mut self) -> Vec<CommandRecord> {
        let mut records = Vec::new();
        while let Ok(QueuedCommand { command, reply }) = self.queue_rx.try_recv() {
            let name = command.name();
            let vehicle_id = command.vehicle_id().cloned();
            let result = self.apply(command);
            match &result {
                Ok(_) => debug!(command = name, "Command applied"),
                Err(err) => info!(command = name, code = err.error_code(), error = %err, "Command rejected"),
            }
            records.push(CommandRecord {
                command: name,
                vehicle_id,
                error: result.as_ref().err().map(ToString::to_string),
            });
            // The issuer may have dropped its ticket
            let _ = reply.send(result);
        }
        records
    }

    fn vehicle_mut(&mut self, id: &VehicleId) -> Result<&mut Vehicle, CommandError> {
        self.vehicles
            .iter_mut()
            .find(|v| v.id() == id)
            .ok_or_else(|| CommandError::UnknownVehicle(id.clone()))
    }

    fn apply(&mut self, command: Command) -> CommandReply {
        match command {
            Command::CreateSwarm { run_id, vehicles } => self.materialize(run_id, vehicles),
            Command::Takeoff {
                id,
                height,
                duration,
            } => {
                let workspace = self.config.workspace;
                let vehicle = self.vehicle_mut(&id)?;
                let position = vehicle.position();
                let target = Vec3::new(position.x, position.y, height);
                if !workspace.contains(target) {
                    return Err(CommandError::OutOfBounds { target });
                }
                vehicle.begin_takeoff(height, duration)?;
                info!(vehicle_id = %id, height, duration, "Takeoff");
                Ok(CommandOutcome::TakeoffStarted { id })
            }
            Command::Goto { id, target, speed } => {
                let start = {
                    let vehicle = self.vehicle_mut(&id)?;
                    vehicle.ensure_flying("goto")?;
                    vehicle.position()
                };
                let path = self.planner.plan(start, target, &self.config.obstacles)?;
                self.vehicle_mut(&id)?.begin_goto(path.remaining(), speed)?;
                info!(
                    vehicle_id = %id,
                    waypoints = path.waypoints.len(),
                    length = path.metrics.total_length,
                    "Goto"
                );
                Ok(CommandOutcome::PathAssigned {
                    id,
                    waypoints: path.waypoints,
                    metrics: path.metrics,
                })
            }
            Command::Land { id } => {
                self.vehicle_mut(&id)?.begin_landing()?;
                info!(vehicle_id = %id, "Landing");
                Ok(CommandOutcome::LandingStarted { id })
            }
            Command::SetFormation(spec) => self.apply_formation(&spec),
        }
    }

    fn materialize(&mut self, run_id: RunId, vehicles: Vec<(VehicleId, Vec3)>) -> CommandReply {
        if let Some(run) = &self.run {
            return Err(CommandError::AlreadyInitialized(run.id().clone()));
        }
        let now = Utc::now();
        let ids: Vec<VehicleId> = vehicles.iter().map(|(id, _)| id.clone()).collect();
        self.vehicles = vehicles
            .into_iter()
            .map(|(id, position)| {
                Vehicle::new(id, position, now, self.sim_time, self.config.trail_capacity)
            })
            .collect();
        self.run = Some(Run::new(run_id.clone(), now, self.sim_time, ids.clone()));
        info!(run_id = %run_id, vehicles = ids.len(), "Swarm created");

        if std::mem::take(&mut self.roster.get_mut().stopped) {
            for vehicle in &mut self.vehicles {
                vehicle.emergency_stop();
            }
            let t = self.run_time();
            if let Some(run) = self.run.as_mut() {
                run.push_event(SafetyEvent::new(
                    t,
                    ids.clone(),
                    SafetyEventKind::EmergencyStop,
                ));
            }
            warn!(run_id = %run_id, "Swarm created under emergency stop");
        }
        Ok(CommandOutcome::SwarmCreated {
            run_id,
            vehicles: ids,
        })
    }

    /// Solve, check and plan every slot before retargeting anyone.
    fn apply_formation(&mut self, spec: &FormationSpec) -> CommandReply {
        let flying: Vec<(VehicleId, Vec3)> = self
            .vehicles
            .iter()
            .filter(|v| v.status().is_flying())
            .map(|v| (v.id().clone(), v.position()))
            .collect();
        let ids: Vec<VehicleId> = flying.iter().map(|(id, _)| id.clone()).collect();
        let slots = formation::solve(spec, &ids)?;

        if let Some(slot) = slots
            .iter()
            .find(|s| !self.config.workspace.contains(s.target))
        {
            return Err(CommandError::OutOfBounds {
                target: slot.target,
            });
        }

        let paths = flying
            .iter()
            .zip(&slots)
            .map(|((_, start), slot)| {
                self.planner
                    .plan(*start, slot.target, &self.config.obstacles)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (slot, path) in slots.iter().zip(paths) {
            self.vehicle_mut(&slot.vehicle_id)?
                .begin_goto(path.remaining(), spec.params.speed)?;
        }
        info!(shape = %spec.shape, vehicles = slots.len(), "Formation assigned");
        Ok(CommandOutcome::FormationAssigned { slots })
    }

    fn monitor_separation(&mut self, t: f64, events: &mut Vec<SafetyEvent>) -> SeparationReport {
        let active: Vec<(&VehicleId, Vec3)> = self
            .vehicles
            .iter()
            .filter(|v| v.status().is_active())
            .map(|v| (v.id(), v.position()))
            .collect();
        let report = self.monitor.check(&active);

        for violation in &report.violations {
            warn!(
                a = %violation.a,
                b = %violation.b,
                distance = violation.distance,
                "Separation violation"
            );
            events.push(SafetyEvent::new(
                t,
                vec![violation.a.clone(), violation.b.clone()],
                SafetyEventKind::SeparationViolation {
                    distance: violation.distance,
                },
            ));
            if self.config.collision_policy == CollisionPolicy::Escalate {
                for vehicle in self
                    .vehicles
                    .iter_mut()
                    .filter(|v| v.id() == &violation.a || v.id() == &violation.b)
                {
                    vehicle.fail();
                }
            }
        }
        report
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot {
            run_id: self.run.as_ref().map(|r| r.id().clone()),
            tick: self.tick,
            sim_time: self.sim_time,
            vehicles: self.vehicles.iter().map(Vehicle::state).collect(),
        }
    }

    #[must_use]
    pub fn vehicle(&self, id: &VehicleId) -> Option<VehicleState> {
        self.vehicles.iter().find(|v| v.id() == id).map(Vehicle::state)
    }

    /// Every allocated id, including vehicles not yet materialized.
    #[must_use]
    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.roster.lock().ids.clone()
    }

    #[must_use]
    pub fn run_id(&self) -> Option<RunId> {
        self.roster.lock().run_id.clone()
    }

    #[must_use]
    pub fn run_summary(&self) -> Option<RunSummary> {
        self.run.as_ref().map(|run| run.summary(self.sim_time))
    }

    #[must_use]
    pub fn events(&self) -> &[SafetyEvent] {
        self.run.as_ref().map(Run::events).unwrap_or_default()
    }

    /// Recent reported positions of one vehicle, oldest first.
    #[must_use]
    pub fn trail(&self, id: &VehicleId) -> Option<Vec<Vec3>> {
        self.vehicles
            .iter()
            .find(|v| v.id() == id)
            .map(|v| v.trail().to_vec())
    }

    /// Samples of `run_id`, from memory for the current run, otherwise from
    /// the sink.
    pub fn query(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>, PersistenceError> {
        match &self.run {
            Some(run) if run.id() == run_id => Ok(run.samples().to_vec()),
            _ => self.sink.query(run_id),
        }
    }
}

/// Centered ground grid, one point per vehicle.
fn spawn_points(count: usize, spacing: f64) -> Vec<Vec3> {
    let params = FormationParams {
        spacing,
        height: 0.0,
        ..FormationParams::default()
    };
    formation::layout(FormationShape::Grid, &params, count)
}
