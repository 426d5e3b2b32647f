//! # Trajectory Planner
//!
//! Obstacle-aware paths by recursive midpoint detours.
//!
//! A straight segment is kept when it clears every obstacle. Otherwise a
//! detour waypoint is placed at the segment midpoint, pushed sideways away
//! from the nearest offending obstacle by 1.5 times the required clearance,
//! and both halves are repaired the same way, up to [`MAX_DETOUR_DEPTH`]
//! levels deep.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use swarm_domain::geometry::{point_segment_distance, polyline_length};
use swarm_domain::{Obstacle, Vec3, Workspace};
use thiserror::Error;

use crate::error::CommandError;

/// Maximum nesting of detours before planning gives up.
pub const MAX_DETOUR_DEPTH: usize = 4;

/// Detour offset as a multiple of the required clearance.
pub const DETOUR_FACTOR: f64 = 1.5;

/// Clearance values closer than this are treated as equal.
const CLEARANCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("No collision-free path from {start} to {goal}")]
    NoPathFound { start: Vec3, goal: Vec3 },
}

impl From<PlanError> for CommandError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NoPathFound { start, goal } => Self::NoPathFound { start, goal },
        }
    }
}

/// Summary figures of a planned path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMetrics {
    pub total_length: f64,
    pub straight_line_length: f64,
    /// `total / straight`, 1.0 for a direct or zero-length path
    pub detour_ratio: f64,
    pub waypoint_count: usize,
}

impl PathMetrics {
    #[must_use]
    pub fn of(waypoints: &[Vec3]) -> Self {
        let total_length = polyline_length(waypoints);
        let straight_line_length = match (waypoints.first(), waypoints.last()) {
            (Some(first), Some(last)) => first.distance_to(*last),
            _ => 0.0,
        };
        let detour_ratio = if straight_line_length > 0.0 {
            total_length / straight_line_length
        } else {
            1.0
        };
        Self {
            total_length,
            straight_line_length,
            detour_ratio,
            waypoint_count: waypoints.len(),
        }
    }
}

/// Waypoints from start to goal, both included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPath {
    pub waypoints: Vec<Vec3>,
    pub metrics: PathMetrics,
}

impl PlannedPath {
    fn new(waypoints: Vec<Vec3>) -> Self {
        let metrics = PathMetrics::of(&waypoints);
        Self { waypoints, metrics }
    }

    /// Waypoints after the start, as handed to a vehicle.
    #[must_use]
    pub fn remaining(&self) -> Vec<Vec3> {
        if self.waypoints.len() <= 1 {
            self.waypoints.clone()
        } else {
            self.waypoints[1..].to_vec()
        }
    }
}

/// Stateless planner parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPlanner {
    safety_radius: f64,
    bounds: Option<Workspace>,
}

impl TrajectoryPlanner {
    #[must_use]
    pub const fn new(safety_radius: f64) -> Self {
        Self {
            safety_radius,
            bounds: None,
        }
    }

    /// Reject detour waypoints outside `bounds`.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: Workspace) -> Self {
        self.bounds = Some(bounds);
        self
    }

    #[must_use]
    pub const fn safety_radius(&self) -> f64 {
        self.safety_radius
    }

    /// Minimum path distance to `obstacle`; touching it counts as a violation.
    #[must_use]
    pub fn required_clearance(&self, obstacle: &Obstacle) -> f64 {
        self.safety_radius + obstacle.radius
    }

    /// Every point of `a`–`b` keeps strictly more than the required clearance.
    #[must_use]
    pub fn segment_is_clear(&self, a: Vec3, b: Vec3, obstacles: &[Obstacle]) -> bool {
        self.nearest_violation(a, b, obstacles).is_none()
    }

    /// Plan a path from `start` to `goal` around `obstacles`.
    pub fn plan(
        &self,
        start: Vec3,
        goal: Vec3,
        obstacles: &[Obstacle],
    ) -> Result<PlannedPath, PlanError> {
        if start == goal {
            return Ok(PlannedPath::new(vec![start]));
        }
        self.repair(start, goal, obstacles, 0)
            .map(PlannedPath::new)
            .ok_or(PlanError::NoPathFound { start, goal })
    }

    fn repair(&self, a: Vec3, b: Vec3, obstacles: &[Obstacle], depth: usize) -> Option<Vec<Vec3>> {
        let Some(obstacle) = self.nearest_violation(a, b, obstacles) else {
            return Some(vec![a, b]);
        };
        if depth >= MAX_DETOUR_DEPTH {
            return None;
        }
        let detour = self.detour(a, b, obstacle, obstacles)?;
        let mut path = self.repair(a, detour, obstacles, depth + 1)?;
        let tail = self.repair(detour, b, obstacles, depth + 1)?;
        path.pop();
        path.extend(tail);
        Some(path)
    }

    /// Closest obstacle whose clearance `a`–`b` violates; ties go to the
    /// earlier obstacle.
    fn nearest_violation<'a>(
        &self,
        a: Vec3,
        b: Vec3,
        obstacles: &'a [Obstacle],
    ) -> Option<&'a Obstacle> {
        let mut nearest: Option<(&Obstacle, f64)> = None;
        for obstacle in obstacles {
            let distance = point_segment_distance(obstacle.center, a, b);
            if distance > self.required_clearance(obstacle) {
                continue;
            }
            if nearest.is_none_or(|(_, best)| distance < best) {
                nearest = Some((obstacle, distance));
            }
        }
        nearest.map(|(obstacle, _)| obstacle)
    }

    fn detour(&self, a: Vec3, b: Vec3, obstacle: &Obstacle, obstacles: &[Obstacle]) -> Option<Vec3> {
        let direction = (b - a).normalized()?;
        let midpoint = a.midpoint(b);
        let offset = self.required_clearance(obstacle) * DETOUR_FACTOR;

        let away = midpoint - obstacle.center;
        let lateral = away - direction * away.dot(direction);
        let sides = match lateral.normalized() {
            Some(side) => vec![side, -side],
            None => perpendiculars(direction),
        };

        let mut best: Option<(Vec3, f64, f64)> = None;
        for side in sides {
            let candidate = midpoint + side * offset;
            if self.bounds.is_some_and(|ws| !ws.contains(candidate)) {
                continue;
            }
            let own = candidate.distance_to(obstacle.center) - obstacle.radius;
            let overall = min_point_clearance(candidate, obstacles);
            let better = best.is_none_or(|(_, best_own, best_overall)| {
                own > best_own + CLEARANCE_EPSILON
                    || ((own - best_own).abs() <= CLEARANCE_EPSILON
                        && overall > best_overall + CLEARANCE_EPSILON)
            });
            if better {
                best = Some((candidate, own, overall));
            }
        }
        best.map(|(candidate, _, _)| candidate)
    }
}

/// Unit vectors perpendicular to `direction`: the horizontal pair first,
/// then the pair in the vertical plane through `direction`.
fn perpendiculars(direction: Vec3) -> Vec<Vec3> {
    let horizontal = direction
        .cross(Vec3::UNIT_Z)
        .normalized()
        .or_else(|| direction.cross(Vec3::UNIT_X).normalized());
    let Some(horizontal) = horizontal else {
        return Vec::new();
    };
    let mut sides = vec![horizontal, -horizontal];
    if let Some(vertical) = horizontal.cross(direction).normalized() {
        sides.extend([vertical, -vertical]);
    }
    sides
}

fn min_point_clearance(point: Vec3, obstacles: &[Obstacle]) -> f64 {
    obstacles
        .iter()
        .map(|o| point.distance_to(o.center) - o.radius)
        .fold(f64::INFINITY, f64::min)
}

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Offline check of an arbitrary path against obstacles.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub path_length: f64,
    /// Smallest segment-to-obstacle surface distance; `None` without obstacles
    pub min_clearance: Option<f64>,
    pub waypoints: usize,
}

/// Check that every segment of `path` keeps more than `safety_radius`
/// from every obstacle surface.
#[must_use]
pub fn validate_path(path: &[Vec3], obstacles: &[Obstacle], safety_radius: f64) -> PathValidation {
    if path.len() < 2 {
        return PathValidation {
            valid: false,
            reason: Some("path too short".to_string()),
            path_length: 0.0,
            min_clearance: None,
            waypoints: path.len(),
        };
    }

    let min_clearance = path
        .windows(2)
        .flat_map(|w| {
            obstacles
                .iter()
                .map(move |o| point_segment_distance(o.center, w[0], w[1]) - o.radius)
        })
        .reduce(f64::min);

    let reason = min_clearance
        .filter(|clearance| *clearance <= safety_radius)
        .map(|clearance| {
            format!("clearance {clearance:.3} m does not exceed safety radius {safety_radius} m")
        });

    PathValidation {
        valid: reason.is_none(),
        reason,
        path_length: polyline_length(path),
        min_clearance,
        waypoints: path.len(),
    }
}

/// One planner validation case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCase {
    pub start: Vec3,
    pub goal: Vec3,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    /// Overrides the planner's safety radius for this case
    #[serde(default)]
    pub safety_radius: Option<f64>,
}

/// Outcome of one validation case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    pub index: usize,
    pub success: bool,
    pub path: Vec<Vec3>,
    pub metrics: Option<PathMetrics>,
    pub validation: Option<PathValidation>,
    pub planning_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch validation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cases: Vec<CaseReport>,
}

/// Plan every case and validate the result.
#[must_use]
pub fn validate_cases(planner: &TrajectoryPlanner, cases: &[ValidationCase]) -> ValidationReport {
    let reports: Vec<CaseReport> = cases
        .iter()
        .enumerate()
        .map(|(index, case)| {
            let planner = TrajectoryPlanner {
                safety_radius: case.safety_radius.unwrap_or(planner.safety_radius),
                ..*planner
            };
            let started = Instant::now();
            let planned = planner.plan(case.start, case.goal, &case.obstacles);
            let planning_time_ms = started.elapsed().as_secs_f64() * 1000.0;

            match planned {
                Ok(path) => CaseReport {
                    index,
                    success: true,
                    validation: Some(validate_path(
                        &path.waypoints,
                        &case.obstacles,
                        planner.safety_radius,
                    )),
                    metrics: Some(path.metrics),
                    path: path.waypoints,
                    planning_time_ms,
                    error: None,
                },
                Err(err) => CaseReport {
                    index,
                    success: false,
                    path: Vec::new(),
                    metrics: None,
                    validation: None,
                    planning_time_ms,
                    error: Some(err.to_string()),
                },
            }
        })
        .collect();

    let succeeded = reports.iter().filter(|r| r.success).count();
    ValidationReport {
        total: reports.len(),
        succeeded,
        failed: reports.len() - succeeded,
        cases: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> TrajectoryPlanner {
        TrajectoryPlanner::new(0.3)
    }

    fn assert_clear(path: &[Vec3], obstacles: &[Obstacle], safety: f64) {
        for w in path.windows(2) {
            for o in obstacles {
                assert!(point_segment_distance(o.center, w[0], w[1]) > safety + o.radius);
            }
        }
    }

    #[test]
    fn test_direct_path_without_obstacles() {
        let start = Vec3::new(0.0, 0.0, 0.5);
        let goal = Vec3::new(0.8, 0.4, 0.6);
        let path = planner().plan(start, goal, &[]).unwrap();

        assert_eq!(path.waypoints, vec![start, goal]);
        assert!((path.metrics.detour_ratio - 1.0).abs() < 1e-12);
        assert_eq!(path.remaining(), vec![goal]);
    }

    #[test]
    fn test_start_equals_goal() {
        let p = Vec3::new(0.2, 0.2, 0.5);
        let path = planner()
            .plan(p, p, &[Obstacle::point(Vec3::new(0.2, 0.3, 0.5))])
            .unwrap();
        assert_eq!(path.waypoints, vec![p]);
        assert_eq!(path.metrics.total_length, 0.0);
    }

    #[test]
    fn test_detour_around_obstacle_on_line() {
        let start = Vec3::new(0.0, 0.0, 0.5);
        let goal = Vec3::new(2.0, 0.0, 0.5);
        let obstacles = [Obstacle::point(Vec3::new(1.0, 0.0, 0.5))];
        let path = planner().plan(start, goal, &obstacles).unwrap();

        assert_eq!(path.waypoints.len(), 3);
        assert_eq!(path.waypoints[0], start);
        assert_eq!(path.waypoints[2], goal);
        // Offset is 1.5 x 0.3, on the first horizontal side
        let detour = path.waypoints[1];
        assert!((detour.y.abs() - 0.45).abs() < 1e-9);
        assert!((detour.z - 0.5).abs() < 1e-9);
        assert!(path.metrics.detour_ratio > 1.0);
        assert_clear(&path.waypoints, &obstacles, 0.3);
    }

    #[test]
    fn test_detour_moves_away_from_offset_obstacle() {
        let start = Vec3::new(-0.9, 0.0, 0.5);
        let goal = Vec3::new(0.9, 0.0, 0.5);
        let obstacles = [Obstacle::new(Vec3::new(0.0, 0.1, 0.5), 0.05)];
        let path = planner().plan(start, goal, &obstacles).unwrap();

        assert!(path.waypoints[1].y < 0.0);
        assert_clear(&path.waypoints, &obstacles, 0.3);
    }

    #[test]
    fn test_radius_is_inclusive() {
        let start = Vec3::new(0.0, 0.0, 0.5);
        let goal = Vec3::new(1.0, 0.0, 0.5);
        let p = planner();
        // Exactly at the required clearance counts as a violation
        let touching = [Obstacle::point(Vec3::new(0.5, 0.3, 0.5))];
        assert!(!p.segment_is_clear(start, goal, &touching));
        let clear = [Obstacle::point(Vec3::new(0.5, 0.31, 0.5))];
        assert!(p.segment_is_clear(start, goal, &clear));
    }

    #[test]
    fn test_goal_inside_obstacle_fails() {
        let start = Vec3::new(0.0, 0.0, 0.5);
        let goal = Vec3::new(1.0, 0.0, 0.5);
        let err = planner()
            .plan(start, goal, &[Obstacle::point(goal)])
            .unwrap_err();
        assert_eq!(err, PlanError::NoPathFound { start, goal });

        let command: CommandError = err.into();
        assert_eq!(command.error_code(), "NO_PATH_FOUND");
    }

    #[test]
    fn test_bounds_reject_detours() {
        let start = Vec3::new(-0.9, 0.0, 0.5);
        let goal = Vec3::new(0.9, 0.0, 0.5);
        let obstacles = [Obstacle::new(Vec3::new(0.0, 0.0, 0.5), 0.4)];
        // Detour offset is 1.05, every side leaves a 0.5 m box
        let tight = planner().with_bounds(Workspace::symmetric(0.5, 1.0));
        assert!(tight.plan(start, goal, &obstacles).is_err());
        // Without bounds the same request succeeds
        assert!(planner().plan(start, goal, &obstacles).is_ok());
    }

    #[test]
    fn test_deterministic() {
        let start = Vec3::new(-0.8, -0.8, 0.4);
        let goal = Vec3::new(0.8, 0.7, 0.6);
        let obstacles = [
            Obstacle::new(Vec3::new(0.0, 0.0, 0.5), 0.1),
            Obstacle::point(Vec3::new(0.4, 0.3, 0.5)),
        ];
        let a = planner().plan(start, goal, &obstacles);
        let b = planner().plan(start, goal, &obstacles);
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_path() {
        let obstacles = [Obstacle::point(Vec3::new(1.0, 0.0, 0.5))];

        let short = validate_path(&[Vec3::ZERO], &obstacles, 0.3);
        assert!(!short.valid);
        assert_eq!(short.reason.as_deref(), Some("path too short"));

        let straight = [Vec3::new(0.0, 0.0, 0.5), Vec3::new(2.0, 0.0, 0.5)];
        let result = validate_path(&straight, &obstacles, 0.3);
        assert!(!result.valid);
        assert!((result.path_length - 2.0).abs() < 1e-12);
        assert!(result.min_clearance.unwrap().abs() < 1e-12);

        let planned = planner().plan(straight[0], straight[1], &obstacles).unwrap();
        let result = validate_path(&planned.waypoints, &obstacles, 0.3);
        assert!(result.valid);
        assert!(result.min_clearance.unwrap() > 0.3);

        let free = validate_path(&straight, &[], 0.3);
        assert!(free.valid);
        assert_eq!(free.min_clearance, None);
    }

    #[test]
    fn test_validate_cases() {
        let cases: Vec<ValidationCase> = serde_json::from_str(
            r#"[
                {"start": {"x": 0, "y": 0, "z": 0.5}, "goal": {"x": 2, "y": 0, "z": 0.5},
                 "obstacles": [{"center": {"x": 1, "y": 0, "z": 0.5}}]},
                {"start": {"x": 0, "y": 0, "z": 0.5}, "goal": {"x": 1, "y": 0, "z": 0.5},
                 "obstacles": [{"center": {"x": 1, "y": 0, "z": 0.5}, "radius": 0.1}]},
                {"start": {"x": 0, "y": 0, "z": 0.5}, "goal": {"x": 1, "y": 1, "z": 0.5}}
            ]"#,
        )
        .unwrap();

        let report = validate_cases(&planner(), &cases);
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(report.cases[0].validation.as_ref().unwrap().valid);
        assert!(report.cases[1].error.is_some());
        assert_eq!(report.cases[2].path.len(), 2);
        assert!(report.cases.iter().all(|c| c.planning_time_ms >= 0.0));
    }
}
