//! In-memory trajectory store.

use std::collections::HashMap;

use parking_lot::RwLock;
use swarm_domain::{RunId, TrajectorySample};

use super::traits::TrajectorySink;
use crate::error::{PersistenceError, Result};

/// Process-lifetime sample store.
#[derive(Debug, Default)]
pub struct InMemorySink {
    runs: RwLock<HashMap<RunId, Vec<TrajectorySample>>>,
    order: RwLock<Vec<RunId>>,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of samples across all runs.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.runs.read().values().map(Vec::len).sum()
    }

    fn bucket(&self, run_id: &RunId, samples: Vec<TrajectorySample>) {
        let mut runs = self.runs.write();
        match runs.get_mut(run_id) {
            Some(existing) => existing.extend(samples),
            None => {
                self.order.write().push(run_id.clone());
                runs.insert(run_id.clone(), samples);
            }
        }
    }
}

impl TrajectorySink for InMemorySink {
    fn append(&self, run_id: &RunId, sample: TrajectorySample) {
        self.bucket(run_id, vec![sample]);
    }

    fn append_batch(&self, run_id: &RunId, samples: Vec<TrajectorySample>) {
        if !samples.is_empty() {
            self.bucket(run_id, samples);
        }
    }

    fn query(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| PersistenceError::RunNotFound(run_id.to_string()))
    }

    fn runs(&self) -> Vec<RunId> {
        self.order.read().clone()
    }
}
