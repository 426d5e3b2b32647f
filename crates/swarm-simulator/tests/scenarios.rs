//! End-to-end scenarios through the public API.

use std::sync::Arc;

use swarm_domain::{
    FormationParams, FormationShape, FormationSpec, Obstacle, Vec3, VehicleId, VehicleStatus,
};
use swarm_persistence::export::{self, CSV_HEADER};
use swarm_persistence::{BackgroundSink, ExportFormat, InMemorySink, SharedSink, TrajectorySink};
use swarm_simulator::{
    CollisionPolicy, CommandError, CommandOutcome, Engine, SafetyEventKind, SimConfig,
};

const DT: f64 = 0.05;

fn quiet_config() -> SimConfig {
    SimConfig {
        position_noise_std: 0.0,
        ..SimConfig::default()
    }
}

fn advance(engine: &mut Engine, ticks: usize) {
    for _ in 0..ticks {
        engine.tick(DT).unwrap();
    }
}

fn airborne_swarm(count: usize, height: f64) -> (Engine, Vec<VehicleId>) {
    let mut engine = Engine::in_memory(quiet_config()).unwrap();
    let swarm = engine.create_swarm(count).unwrap();
    engine.tick(DT).unwrap();
    for id in &swarm.vehicle_ids {
        engine.takeoff(id, height, 2.0).unwrap();
    }
    advance(&mut engine, 40);
    (engine, swarm.vehicle_ids)
}

#[test]
fn two_vehicles_take_off_to_formation_height() {
    let (engine, ids) = airborne_swarm(2, 0.6);
    assert!(engine.sim_time() >= 2.0);
    for id in &ids {
        let state = engine.vehicle(id).unwrap();
        assert_eq!(state.status, VehicleStatus::Flying);
        assert!((state.position.z - 0.6).abs() <= 0.05);
    }
}

#[test]
fn goto_outside_workspace_changes_nothing() {
    let (mut engine, ids) = airborne_swarm(1, 0.6);
    let before = engine.snapshot();

    let err = engine
        .goto(&ids[0], Vec3::new(5.0, 5.0, 0.6), 0.5)
        .unwrap_err();
    assert_eq!(err.error_code(), "OUT_OF_BOUNDS");

    let report = engine.tick(DT).unwrap();
    assert!(report.commands.is_empty());
    let after = engine.vehicle(&ids[0]).unwrap();
    assert_eq!(after.status, VehicleStatus::Flying);
    assert_eq!(after.target, before.vehicles[0].target);
}

#[test]
fn goto_detours_around_an_obstacle() {
    let config = SimConfig {
        obstacles: vec![Obstacle::new(Vec3::new(0.45, -0.05, 0.6), 0.05)],
        ..quiet_config()
    };
    let mut engine = Engine::in_memory(config).unwrap();
    let d1 = engine.create_swarm(1).unwrap().vehicle_ids[0].clone();
    engine.tick(DT).unwrap();
    engine.takeoff(&d1, 0.6, 2.0).unwrap();
    advance(&mut engine, 40);

    let goal = Vec3::new(0.9, 0.0, 0.6);
    let mut ticket = engine.goto(&d1, goal, 0.5).unwrap();
    engine.tick(DT).unwrap();
    let Some(Ok(CommandOutcome::PathAssigned {
        waypoints, metrics, ..
    })) = ticket.try_outcome()
    else {
        panic!("no path assigned");
    };
    assert_eq!(waypoints.len(), 3);
    assert!(waypoints[1].y > 0.5);
    assert!(metrics.detour_ratio > 1.0);

    advance(&mut engine, 200);
    let state = engine.vehicle(&d1).unwrap();
    assert_eq!(state.status, VehicleStatus::Flying);
    assert!(state.position.distance_to(goal) < 0.02);
}

#[test]
fn land_while_landing_is_rejected() {
    let (mut engine, ids) = airborne_swarm(1, 0.5);
    let mut first = engine.land(&ids[0]).unwrap();
    let mut second = engine.land(&ids[0]).unwrap();
    engine.tick(DT).unwrap();

    assert!(matches!(
        first.try_outcome(),
        Some(Ok(CommandOutcome::LandingStarted { .. }))
    ));
    assert!(matches!(
        second.try_outcome(),
        Some(Err(CommandError::InvalidState {
            status: VehicleStatus::Landing,
            ..
        }))
    ));
}

#[test]
fn circle_formation_of_four() {
    let (mut engine, _) = airborne_swarm(4, 0.6);
    let mut ticket = engine
        .set_formation(FormationSpec::new(
            FormationShape::Circle,
            FormationParams::default(),
        ))
        .unwrap();
    engine.tick(DT).unwrap();

    let Some(Ok(CommandOutcome::FormationAssigned { slots })) = ticket.try_outcome() else {
        panic!("formation not assigned");
    };
    let expected = [
        Vec3::new(1.0, 0.0, 0.6),
        Vec3::new(0.0, 1.0, 0.6),
        Vec3::new(-1.0, 0.0, 0.6),
        Vec3::new(0.0, -1.0, 0.6),
    ];
    for (slot, want) in slots.iter().zip(expected) {
        assert!(slot.target.distance_to(want) < 1e-9);
    }
}

#[test]
fn close_pair_reports_one_violation() {
    let config = SimConfig {
        spawn_spacing: 0.1,
        ..quiet_config()
    };
    let mut engine = Engine::in_memory(config).unwrap();
    engine.create_swarm(2).unwrap();
    let report = engine.tick(DT).unwrap();

    assert_eq!(report.violations.len(), 1);
    assert!((report.violations[0].distance - 0.1).abs() < 1e-9);
    assert!(matches!(
        report.events[0].kind,
        SafetyEventKind::SeparationViolation { .. }
    ));
}

#[test]
fn escalation_grounds_both_vehicles() {
    let config = SimConfig {
        spawn_spacing: 0.1,
        collision_policy: CollisionPolicy::Escalate,
        ..quiet_config()
    };
    let mut engine = Engine::in_memory(config).unwrap();
    let swarm = engine.create_swarm(2).unwrap();
    engine.tick(DT).unwrap();

    let samples = engine.query(&swarm.run_id).unwrap();
    assert!(samples.iter().all(|s| s.status == VehicleStatus::Error));
}

#[tokio::test]
async fn samples_flow_through_background_sink_and_export() {
    let store = Arc::new(InMemorySink::new());
    let (sink, _writer) = BackgroundSink::spawn(store.clone());
    let shared: SharedSink = Arc::new(sink.clone());
    let mut engine = Engine::new(quiet_config(), shared).unwrap();

    let swarm = engine.create_swarm(3).unwrap();
    advance(&mut engine, 20);
    sink.flush().await.unwrap();

    let stored = store.query(&swarm.run_id).unwrap();
    assert_eq!(stored.len(), 60);
    assert_eq!(stored, engine.query(&swarm.run_id).unwrap());

    let csv = export::encode(&stored, ExportFormat::Csv).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));
    assert_eq!(lines.count(), 60);
}
