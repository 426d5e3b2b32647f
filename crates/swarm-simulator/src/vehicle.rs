//! Vehicle state machine and per-tick physics.
//!
//! ```text
//! idle ──▶ takingOff ──▶ flying ◀──▶ goingTo
//!   ▲          │            │           │
//!   │          └────────────┴─────┬─────┘
//! landed ◀──────── landing ◀──────┘
//!
//! any state except landed ──▶ error (terminal until reset)
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use swarm_domain::{TrailBuffer, TrajectorySample, Vec3, VehicleId, VehicleState, VehicleStatus};

use crate::config::SimConfig;
use crate::error::{CommandError, EngineError};
use crate::safety::SafetyEventKind;

/// Takeoff is complete within this distance of the commanded height.
pub const ALTITUDE_TOLERANCE: f64 = 0.05;

/// Intermediate waypoints count as passed within this distance.
pub const WAYPOINT_TOLERANCE: f64 = 0.05;

/// The final waypoint counts as reached within this distance.
pub const ARRIVAL_TOLERANCE: f64 = 0.01;

/// Landing ends below this height.
pub const TOUCHDOWN_HEIGHT: f64 = 0.01;

/// Share of the acceleration limit the braking profile plans with.
const BRAKING_FRACTION: f64 = 0.8;

/// Highest speed at which a vehicle `distance` away can still stop on the
/// target, decelerating by `decel · dt` per tick.
///
/// Solves `decel · dt² · u(u+1)/2 = distance` for the tick count `u`.
#[must_use]
pub fn braking_speed(distance: f64, decel: f64, dt: f64) -> f64 {
    if distance <= 0.0 {
        return 0.0;
    }
    let step = decel * dt * dt;
    let ticks = (-1.0 + 8.0f64.mul_add(distance / step, 1.0).sqrt()) / 2.0;
    decel * dt * ticks
}

// =============================================================================
// SENSOR NOISE
// =============================================================================

/// Zero-mean Gaussian noise on reported positions.
#[derive(Debug, Clone)]
pub struct SensorNoise {
    rng: StdRng,
    normal: Option<Normal<f64>>,
}

impl SensorNoise {
    /// `std_dev == 0` disables noise. A seed makes the sequence repeatable.
    pub fn new(std_dev: f64, seed: Option<u64>) -> Result<Self, EngineError> {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let normal = if std_dev > 0.0 {
            Some(Normal::new(0.0, std_dev).map_err(|e| EngineError::NoiseModel(e.to_string()))?)
        } else {
            None
        };
        Ok(Self { rng, normal })
    }

    /// Noise-free model.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            rng: StdRng::seed_from_u64(0),
            normal: None,
        }
    }

    pub fn perturb(&mut self, p: Vec3) -> Vec3 {
        match self.normal {
            Some(normal) => Vec3::new(
                p.x + normal.sample(&mut self.rng),
                p.y + normal.sample(&mut self.rng),
                p.z + normal.sample(&mut self.rng),
            ),
            None => p,
        }
    }
}

// =============================================================================
// VEHICLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct TakeoffProgress {
    height: f64,
    duration: f64,
    elapsed: f64,
}

/// What happened to a vehicle during one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub faults: Vec<SafetyEventKind>,
    pub transition: Option<(VehicleStatus, VehicleStatus)>,
}

/// Simulated vehicle owned by the engine.
#[derive(Debug, Clone)]
pub struct Vehicle {
    id: VehicleId,
    status: VehicleStatus,
    position: Vec3,
    reported_position: Vec3,
    velocity: Vec3,
    battery: f64,
    /// Hover point, takeoff point, landing point or final goal
    target: Option<Vec3>,
    /// Remaining waypoints while `goingTo`
    path: VecDeque<Vec3>,
    cruise_speed: f64,
    takeoff: Option<TakeoffProgress>,
    created_at: DateTime<Utc>,
    created_at_sim: f64,
    trail: TrailBuffer,
}

impl Vehicle {
    #[must_use]
    pub fn new(
        id: VehicleId,
        position: Vec3,
        created_at: DateTime<Utc>,
        created_at_sim: f64,
        trail_capacity: usize,
    ) -> Self {
        Self {
            id,
            status: VehicleStatus::Idle,
            position,
            reported_position: position,
            velocity: Vec3::ZERO,
            battery: 100.0,
            target: None,
            path: VecDeque::new(),
            cruise_speed: 0.0,
            takeoff: None,
            created_at,
            created_at_sim,
            trail: TrailBuffer::new(trail_capacity),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &VehicleId {
        &self.id
    }

    #[must_use]
    pub const fn status(&self) -> VehicleStatus {
        self.status
    }

    /// Authoritative position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.velocity
    }

    #[must_use]
    pub const fn battery(&self) -> f64 {
        self.battery
    }

    #[must_use]
    pub const fn target(&self) -> Option<Vec3> {
        self.target
    }

    /// Remaining waypoints of the active path.
    #[must_use]
    pub fn remaining_path(&self) -> Vec<Vec3> {
        self.path.iter().copied().collect()
    }

    #[must_use]
    pub const fn trail(&self) -> &TrailBuffer {
        &self.trail
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn ensure(&self, command: &'static str, allowed: bool) -> Result<(), CommandError> {
        if allowed {
            Ok(())
        } else {
            Err(CommandError::InvalidState {
                id: self.id.clone(),
                status: self.status,
                command,
            })
        }
    }

    /// `flying` or `goingTo`, the states a goto is accepted in.
    pub fn ensure_flying(&self, command: &'static str) -> Result<(), CommandError> {
        self.ensure(command, self.status.is_flying())
    }

    pub fn begin_takeoff(&mut self, height: f64, duration: f64) -> Result<(), CommandError> {
        self.ensure(
            "takeoff",
            matches!(self.status, VehicleStatus::Idle | VehicleStatus::Landed),
        )?;
        self.target = Some(Vec3::new(self.position.x, self.position.y, height));
        self.takeoff = Some(TakeoffProgress {
            height,
            duration,
            elapsed: 0.0,
        });
        self.path.clear();
        self.status = VehicleStatus::TakingOff;
        Ok(())
    }

    /// Follow `waypoints` (excluding the current position) at `speed`.
    pub fn begin_goto(&mut self, waypoints: Vec<Vec3>, speed: f64) -> Result<(), CommandError> {
        self.ensure_flying("goto")?;
        let Some(&goal) = waypoints.last() else {
            return Err(CommandError::InvalidParameter(
                "goto needs at least one waypoint".to_string(),
            ));
        };
        self.path = waypoints.into();
        self.target = Some(goal);
        self.cruise_speed = speed;
        self.status = VehicleStatus::GoingTo;
        Ok(())
    }

    pub fn begin_landing(&mut self) -> Result<(), CommandError> {
        self.ensure(
            "land",
            matches!(
                self.status,
                VehicleStatus::TakingOff | VehicleStatus::Flying | VehicleStatus::GoingTo
            ),
        )?;
        self.start_descent();
        Ok(())
    }

    fn start_descent(&mut self) {
        self.target = Some(Vec3::new(self.position.x, self.position.y, 0.0));
        self.path.clear();
        self.takeoff = None;
        self.status = VehicleStatus::Landing;
    }

    /// Force `error` and stop in place. Landed vehicles are left alone;
    /// returns whether the status changed.
    pub fn emergency_stop(&mut self) -> bool {
        if matches!(self.status, VehicleStatus::Landed | VehicleStatus::Error) {
            self.velocity = Vec3::ZERO;
            return false;
        }
        self.fail();
        true
    }

    /// Enter `error`: zero velocity, drop any goal.
    pub fn fail(&mut self) {
        self.velocity = Vec3::ZERO;
        self.path.clear();
        self.target = None;
        self.takeoff = None;
        self.status = VehicleStatus::Error;
    }

    // -------------------------------------------------------------------------
    // Physics
    // -------------------------------------------------------------------------

    fn active_target(&self) -> Option<Vec3> {
        match self.status {
            VehicleStatus::GoingTo => self.path.front().copied().or(self.target),
            _ => self.target,
        }
    }

    fn desired_velocity(&self, dt: f64, config: &SimConfig) -> Vec3 {
        let Some(target) = self.active_target() else {
            return Vec3::ZERO;
        };
        let offset = target - self.position;
        let Some(direction) = offset.normalized() else {
            return Vec3::ZERO;
        };
        let distance = offset.norm();
        let cap = match self.status {
            VehicleStatus::GoingTo => self.cruise_speed.min(config.max_speed),
            _ => config.max_speed,
        };
        let speed = cap
            .min(braking_speed(
                distance,
                config.max_acceleration * BRAKING_FRACTION,
                dt,
            ))
            .min(distance / dt);
        direction * speed
    }

    /// Advance one timestep of `dt` simulated seconds.
    ///
    /// Only airborne vehicles integrate; every vehicle gets a fresh
    /// reported position. Faults put the vehicle into `error` (or, for a
    /// low battery, into `landing`) and are returned, never raised.
    pub fn step(&mut self, dt: f64, config: &SimConfig, noise: &mut SensorNoise) -> StepOutcome {
        let previous = self.status;
        let mut outcome = StepOutcome::default();

        if self.status.is_airborne() {
            self.integrate(dt, config, &mut outcome);
        }

        if self.position.is_finite() {
            self.reported_position = noise.perturb(self.position);
            self.trail.push(self.reported_position);
        }

        if self.status != previous {
            outcome.transition = Some((previous, self.status));
        }
        outcome
    }

    fn integrate(&mut self, dt: f64, config: &SimConfig, outcome: &mut StepOutcome) {
        // Settle only once the remaining speed fits in one tick of acceleration
        if self.status == VehicleStatus::Landing && self.touched_down(dt, config) {
            self.position.z = 0.0;
            self.velocity = Vec3::ZERO;
            self.target = None;
            self.status = VehicleStatus::Landed;
            return;
        }

        let desired = self.desired_velocity(dt, config);
        let acceleration =
            self.limit_acceleration((desired - self.velocity) / dt, config.max_acceleration);

        self.velocity += acceleration * dt;
        self.position += self.velocity * dt;
        self.battery = (config.battery.discharge_rate.mul_add(-dt, self.battery)).clamp(0.0, 100.0);

        if !self.position.is_finite() || !self.velocity.is_finite() {
            self.fail();
            outcome.faults.push(SafetyEventKind::NonFiniteState);
            return;
        }

        if self.status == VehicleStatus::Landing && self.position.z < 0.0 {
            // Ground contact
            self.position.z = 0.0;
        }

        if !config.workspace.contains(self.position) {
            let position = self.position;
            self.fail();
            outcome.faults.push(SafetyEventKind::OutOfBounds { position });
            return;
        }

        self.advance_mission(dt);
        self.check_battery(config, outcome);
    }

    fn touched_down(&self, dt: f64, config: &SimConfig) -> bool {
        self.position.z <= TOUCHDOWN_HEIGHT && self.velocity.norm() <= config.max_acceleration * dt
    }

    /// Clamp `acceleration` to `limit`. A landing vehicle spends the budget
    /// on the vertical axis first so horizontal corrections never starve the
    /// descent brake.
    fn limit_acceleration(&self, acceleration: Vec3, limit: f64) -> Vec3 {
        if self.status != VehicleStatus::Landing || !acceleration.is_finite() {
            return acceleration.clamp_norm(limit);
        }
        let vertical = acceleration.z.clamp(-limit, limit);
        let remaining = vertical.mul_add(-vertical, limit * limit).max(0.0).sqrt();
        let horizontal = Vec3::new(acceleration.x, acceleration.y, 0.0).clamp_norm(remaining);
        Vec3::new(horizontal.x, horizontal.y, vertical)
    }

    fn advance_mission(&mut self, dt: f64) {
        match self.status {
            VehicleStatus::TakingOff => {
                if let Some(progress) = self.takeoff.as_mut() {
                    progress.elapsed += dt;
                    let reached = (self.position.z - progress.height).abs() <= ALTITUDE_TOLERANCE;
                    if reached || progress.elapsed >= progress.duration {
                        self.takeoff = None;
                        self.status = VehicleStatus::Flying;
                    }
                }
            }
            VehicleStatus::GoingTo => {
                while let Some(&waypoint) = self.path.front() {
                    let tolerance = if self.path.len() == 1 {
                        ARRIVAL_TOLERANCE
                    } else {
                        WAYPOINT_TOLERANCE
                    };
                    if self.position.distance_to(waypoint) > tolerance {
                        break;
                    }
                    self.path.pop_front();
                }
                if self.path.is_empty() {
                    // Hover at the goal
                    self.status = VehicleStatus::Flying;
                }
            }
            _ => {}
        }
    }

    fn check_battery(&mut self, config: &SimConfig, outcome: &mut StepOutcome) {
        let battery = self.battery;
        if battery <= config.battery.critical_threshold {
            self.fail();
            outcome
                .faults
                .push(SafetyEventKind::BatteryCritical { battery });
        } else if battery <= config.battery.low_threshold
            && matches!(
                self.status,
                VehicleStatus::TakingOff | VehicleStatus::Flying | VehicleStatus::GoingTo
            )
        {
            self.start_descent();
            outcome.faults.push(SafetyEventKind::BatteryLow { battery });
        }
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> VehicleState {
        VehicleState {
            id: self.id.clone(),
            position: self.position,
            reported_position: self.reported_position,
            velocity: self.velocity,
            target: self.target,
            battery: self.battery,
            status: self.status,
            created_at: self.created_at,
            created_at_sim: self.created_at_sim,
        }
    }

    #[must_use]
    pub fn sample(&self, t: f64) -> TrajectorySample {
        TrajectorySample {
            t,
            vehicle_id: self.id.clone(),
            position: self.reported_position,
            velocity: self.velocity,
            battery: self.battery,
            status: self.status,
        }
    }
}
