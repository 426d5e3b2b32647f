//! Collision monitor: pairwise separation checks between active vehicles.

use serde::Serialize;
use swarm_domain::{Vec3, VehicleId};

/// Two vehicles closer than the minimum separation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparationViolation {
    pub a: VehicleId,
    pub b: VehicleId,
    pub distance: f64,
}

/// Result of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparationReport {
    pub violations: Vec<SeparationViolation>,
    /// Smallest pairwise distance seen; `None` with fewer than two vehicles
    pub min_distance: Option<f64>,
    pub pairs_checked: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionMonitor {
    min_separation: f64,
}

impl CollisionMonitor {
    #[must_use]
    pub const fn new(min_separation: f64) -> Self {
        Self { min_separation }
    }

    #[must_use]
    pub const fn min_separation(&self) -> f64 {
        self.min_separation
    }

    /// Check every unordered pair; `a` precedes `b` in input order.
    #[must_use]
    pub fn check(&self, vehicles: &[(&VehicleId, Vec3)]) -> SeparationReport {
        let mut report = SeparationReport::default();
        for (i, (id_a, pos_a)) in vehicles.iter().enumerate() {
            for (id_b, pos_b) in &vehicles[i + 1..] {
                let distance = pos_a.distance_to(*pos_b);
                report.pairs_checked += 1;
                report.min_distance = Some(report.min_distance.map_or(distance, |d| d.min(distance)));
                if distance < self.min_separation {
                    report.violations.push(SeparationViolation {
                        a: (*id_a).clone(),
                        b: (*id_b).clone(),
                        distance,
                    });
                }
            }
        }
        report
    }
}
