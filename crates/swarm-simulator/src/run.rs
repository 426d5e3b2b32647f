//! The current simulation run: samples, safety events and statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use swarm_domain::{RunId, TrajectorySample, VehicleId};

use crate::collision::SeparationReport;
use crate::safety::{SafetyEvent, SafetyEventKind};

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub ticks: u64,
    pub samples: usize,
    pub violations: u64,
    /// Safety events other than separation violations
    pub faults: u64,
    /// Smallest vehicle-to-vehicle distance ever observed
    pub min_separation: Option<f64>,
}

/// Read-side summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub vehicles: Vec<VehicleId>,
    /// Simulated seconds since the run started
    pub elapsed: f64,
    pub stats: RunStats,
    pub events: usize,
}

#[derive(Debug, Clone)]
pub struct Run {
    id: RunId,
    started_at: DateTime<Utc>,
    started_at_sim: f64,
    vehicles: Vec<VehicleId>,
    samples: Vec<TrajectorySample>,
    events: Vec<SafetyEvent>,
    stats: RunStats,
}

impl Run {
    #[must_use]
    pub const fn new(
        id: RunId,
        started_at: DateTime<Utc>,
        started_at_sim: f64,
        vehicles: Vec<VehicleId>,
    ) -> Self {
        Self {
            id,
            started_at,
            started_at_sim,
            vehicles,
            samples: Vec::new(),
            events: Vec::new(),
            stats: RunStats {
                ticks: 0,
                samples: 0,
                violations: 0,
                faults: 0,
                min_separation: None,
            },
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.id
    }

    /// Run-relative time for an engine clock reading.
    #[must_use]
    pub fn relative_time(&self, sim_time: f64) -> f64 {
        sim_time - self.started_at_sim
    }

    #[must_use]
    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    #[must_use]
    pub fn events(&self) -> &[SafetyEvent] {
        &self.events
    }

    #[must_use]
    pub const fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn push_event(&mut self, event: SafetyEvent) {
        if matches!(event.kind, SafetyEventKind::SeparationViolation { .. }) {
            self.stats.violations += 1;
        } else {
            self.stats.faults += 1;
        }
        self.events.push(event);
    }

    /// Close one tick: append its samples and fold in the monitor result.
    pub fn record_tick(
        &mut self,
        samples: &[TrajectorySample],
        events: &[SafetyEvent],
        separation: &SeparationReport,
    ) {
        self.stats.ticks += 1;
        self.stats.samples += samples.len();
        self.samples.extend_from_slice(samples);
        for event in events {
            self.push_event(event.clone());
        }
        if let Some(distance) = separation.min_distance {
            self.stats.min_separation = Some(
                self.stats
                    .min_separation
                    .map_or(distance, |seen| seen.min(distance)),
            );
        }
    }

    #[must_use]
    pub fn summary(&self, sim_time: f64) -> RunSummary {
        RunSummary {
            run_id: self.id.clone(),
            started_at: self.started_at,
            vehicles: self.vehicles.clone(),
            elapsed: self.relative_time(sim_time),
            stats: self.stats.clone(),
            events: self.events.len(),
        }
    }
}
