//! # Experiments
//!
//! Scripted scenarios run against an [`Engine`] in simulated time. A run of
//! any length completes as fast as the CPU allows and always produces the
//! same physics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use swarm_domain::{
    FormationParams, FormationShape, FormationSpec, RunId, Vec3, VehicleId, VehicleStatus,
};
use tracing::info;

use crate::command::CommandRecord;
use crate::engine::Engine;
use crate::error::{CommandError, ExperimentError};

/// Time given to the swarm to reach takeoff height.
const TAKEOFF_SETTLE_S: f64 = 3.0;

const TAKEOFF_DURATION_S: f64 = 2.0;

/// Upper bound on the wait for every vehicle to touch down.
const LANDING_TIMEOUT_S: f64 = 10.0;

/// Longest scenario phase accepted, in simulated seconds.
pub const MAX_DURATION_S: f64 = 3600.0;

/// Figure-eight waypoints in the x/y plane, flown at the scenario height.
const FIGURE_EIGHT: [(f64, f64); 5] = [(0.0, 0.0), (0.8, 0.4), (0.0, 0.8), (-0.8, 0.4), (0.0, 0.0)];

/// Scripted flight scenario
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Scenario {
    /// Take off, arrange in a circle, land
    CircularFormation { radius: f64, height: f64 },
    /// First vehicle flies a figure-eight, the rest stay on the ground
    FigureEight { height: f64, speed: f64 },
    /// Take off, hover for the duration, land
    TakeoffHoverLand { height: f64 },
}

impl Scenario {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CircularFormation { .. } => "circular_formation",
            Self::FigureEight { .. } => "figure_eight",
            Self::TakeoffHoverLand { .. } => "takeoff_hover_land",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = ExperimentError;

    /// Accepts snake or kebab case; parameters take their defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "circular_formation" | "circle" => Ok(Self::CircularFormation {
                radius: 0.8,
                height: 0.5,
            }),
            "figure_eight" | "figure8" => Ok(Self::FigureEight {
                height: 0.6,
                speed: 0.5,
            }),
            "takeoff_hover_land" | "hover" => Ok(Self::TakeoffHoverLand { height: 0.6 }),
            _ => Err(ExperimentError::UnknownScenario(s.to_string())),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentPlan {
    pub scenario: Scenario,
    pub num_vehicles: usize,
    /// Scenario phase length in simulated seconds
    pub duration_s: f64,
}

/// Outcome of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentReport {
    pub scenario: Scenario,
    pub run_id: RunId,
    pub duration_s: f64,
    /// No vehicle ended in `error` and no command was rejected
    pub success: bool,
    pub ticks: u64,
    pub samples: usize,
    pub violations: u64,
    pub min_separation: Option<f64>,
    pub faults: u64,
    pub rejected_commands: Vec<String>,
    pub final_statuses: BTreeMap<VehicleId, VehicleStatus>,
}

struct Driver<'a> {
    engine: &'a mut Engine,
    dt: f64,
    rejected: Vec<String>,
}

impl Driver<'_> {
    fn advance(&mut self, seconds: f64) -> Result<(), ExperimentError> {
        for _ in 0..ticks_for(seconds, self.dt) {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), ExperimentError> {
        let report = self.engine.tick(self.dt)?;
        self.note(report.commands);
        Ok(())
    }

    fn note(&mut self, records: Vec<CommandRecord>) {
        self.rejected.extend(
            records
                .into_iter()
                .filter_map(|r| r.error.map(|err| format!("{}: {err}", r.command))),
        );
    }

    fn takeoff_all(&self, ids: &[VehicleId], height: f64) -> Result<(), CommandError> {
        for id in ids {
            self.engine.takeoff(id, height, TAKEOFF_DURATION_S)?;
        }
        Ok(())
    }

    /// Land everything still in the air and wait for touchdown.
    fn land_all(&mut self) -> Result<(), ExperimentError> {
        let snapshot = self.engine.snapshot();
        for vehicle in &snapshot.vehicles {
            if matches!(
                vehicle.status,
                VehicleStatus::TakingOff | VehicleStatus::Flying | VehicleStatus::GoingTo
            ) {
                self.engine.land(&vehicle.id)?;
            }
        }

        for _ in 0..ticks_for(LANDING_TIMEOUT_S, self.dt) {
            self.step()?;
            let airborne = self
                .engine
                .snapshot()
                .vehicles
                .iter()
                .any(|v| v.status.is_airborne());
            if !airborne {
                break;
            }
        }
        Ok(())
    }
}

/// Run `plan` on an engine without a current run.
pub fn run_experiment(
    engine: &mut Engine,
    plan: &ExperimentPlan,
) -> Result<ExperimentReport, ExperimentError> {
    if !(0.0..=MAX_DURATION_S).contains(&plan.duration_s) {
        return Err(CommandError::InvalidParameter(format!(
            "experiment duration must be within [0, {MAX_DURATION_S}] s, got {}",
            plan.duration_s
        ))
        .into());
    }

    let dt = engine.config().tick_dt();
    let allocation = engine.create_swarm(plan.num_vehicles)?;
    let ids = allocation.vehicle_ids;
    info!(
        scenario = %plan.scenario,
        run_id = %allocation.run_id,
        vehicles = ids.len(),
        duration_s = plan.duration_s,
        "Experiment started"
    );

    let mut driver = Driver {
        engine,
        dt,
        rejected: Vec::new(),
    };
    driver.step()?;

    match plan.scenario {
        Scenario::CircularFormation { radius, height } => {
            driver.takeoff_all(&ids, height)?;
            driver.advance(TAKEOFF_SETTLE_S)?;
            driver.engine.set_formation(FormationSpec::new(
                FormationShape::Circle,
                FormationParams {
                    radius,
                    height,
                    ..FormationParams::default()
                },
            ))?;
            driver.advance(plan.duration_s)?;
        }
        Scenario::FigureEight { height, speed } => {
            let leader = &ids[0];
            driver
                .engine
                .takeoff(leader, height, TAKEOFF_DURATION_S)?;
            driver.advance(TAKEOFF_SETTLE_S)?;
            #[allow(clippy::cast_precision_loss)]
            let leg = plan.duration_s / FIGURE_EIGHT.len() as f64;
            for (x, y) in FIGURE_EIGHT {
                driver.engine.goto(leader, Vec3::new(x, y, height), speed)?;
                driver.advance(leg)?;
            }
        }
        Scenario::TakeoffHoverLand { height } => {
            driver.takeoff_all(&ids, height)?;
            driver.advance(TAKEOFF_SETTLE_S + plan.duration_s)?;
        }
    }
    driver.land_all()?;

    let rejected_commands = driver.rejected;
    let snapshot = engine.snapshot();
    let final_statuses: BTreeMap<VehicleId, VehicleStatus> = snapshot
        .vehicles
        .iter()
        .map(|v| (v.id.clone(), v.status))
        .collect();
    let stats = engine
        .run_summary()
        .map(|summary| summary.stats)
        .unwrap_or_default();
    let success = rejected_commands.is_empty()
        && final_statuses
            .values()
            .all(|status| *status != VehicleStatus::Error);

    info!(
        scenario = %plan.scenario,
        success,
        ticks = stats.ticks,
        violations = stats.violations,
        faults = stats.faults,
        "Experiment finished"
    );

    Ok(ExperimentReport {
        scenario: plan.scenario,
        run_id: allocation.run_id,
        duration_s: plan.duration_s,
        success,
        ticks: stats.ticks,
        samples: stats.samples,
        violations: stats.violations,
        min_separation: stats.min_separation,
        faults: stats.faults,
        rejected_commands,
        final_statuses,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ticks_for(seconds: f64, dt: f64) -> u64 {
    (seconds / dt).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn engine() -> Engine {
        Engine::in_memory(SimConfig {
            position_noise_std: 0.0,
            ..SimConfig::default()
        })
        .unwrap()
    }

    fn plan(scenario: &str, num_vehicles: usize, duration_s: f64) -> ExperimentPlan {
        ExperimentPlan {
            scenario: scenario.parse().unwrap(),
            num_vehicles,
            duration_s,
        }
    }

    #[test]
    fn test_scenario_names() {
        assert_eq!(
            "figure-eight".parse::<Scenario>().unwrap().name(),
            "figure_eight"
        );
        assert_eq!(
            "Circular_Formation".parse::<Scenario>().unwrap(),
            Scenario::CircularFormation {
                radius: 0.8,
                height: 0.5
            }
        );
        assert!(matches!(
            "barrel-roll".parse::<Scenario>(),
            Err(ExperimentError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_takeoff_hover_land() {
        let mut engine = engine();
        let report = run_experiment(&mut engine, &plan("takeoff-hover-land", 2, 5.0)).unwrap();

        assert!(report.success, "{:?}", report.rejected_commands);
        assert!(report.final_statuses.values().all(|s| *s == VehicleStatus::Landed));
        assert_eq!(report.samples, usize::try_from(report.ticks).unwrap() * 2);
        assert!(report.ticks > 161);
        assert_eq!(engine.query(&report.run_id).unwrap().len(), report.samples);
    }

    #[test]
    fn test_circular_formation() {
        let mut engine = engine();
        let report = run_experiment(&mut engine, &plan("circular_formation", 4, 8.0)).unwrap();

        assert!(report.success, "{:?}", report.rejected_commands);
        assert_eq!(report.final_statuses.len(), 4);
        assert!(report.final_statuses.values().all(|s| *s == VehicleStatus::Landed));
        assert_eq!(report.faults, 0);
    }

    #[test]
    fn test_figure_eight_flies_leader_only() {
        let mut engine = engine();
        let report = run_experiment(&mut engine, &plan("figure-eight", 2, 10.0)).unwrap();

        assert!(report.success, "{:?}", report.rejected_commands);
        assert_eq!(report.final_statuses[&VehicleId::from("d1")], VehicleStatus::Landed);
        assert_eq!(report.final_statuses[&VehicleId::from("d2")], VehicleStatus::Idle);
    }

    #[test]
    fn test_invalid_plans() {
        let mut engine = engine();
        assert!(matches!(
            run_experiment(&mut engine, &plan("hover", 11, 1.0)),
            Err(ExperimentError::Command(CommandError::CapacityExceeded { .. }))
        ));
        assert!(matches!(
            run_experiment(&mut engine, &plan("hover", 1, -1.0)),
            Err(ExperimentError::Command(CommandError::InvalidParameter(_)))
        ));
        for duration in [f64::NAN, MAX_DURATION_S + 1.0, 1e300] {
            assert!(matches!(
                run_experiment(&mut engine, &plan("hover", 1, duration)),
                Err(ExperimentError::Command(CommandError::InvalidParameter(_)))
            ));
        }
        assert!(engine.run_id().is_none());
    }
}
