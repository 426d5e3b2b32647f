//! # Sink Traits
//!
//! Abstract trajectory log interface. The simulator only ever talks to this
//! trait, so the in-memory store can be swapped for a durable backend.

use std::sync::Arc;

use swarm_domain::{RunId, TrajectorySample};

use crate::error::Result;

/// Append/query log of trajectory samples, keyed by run.
pub trait TrajectorySink: Send + Sync {
    /// Record one sample. Fire-and-forget: must return without blocking on
    /// I/O, and failures are logged rather than surfaced to the tick loop.
    fn append(&self, run_id: &RunId, sample: TrajectorySample);

    /// Record all samples of one tick.
    fn append_batch(&self, run_id: &RunId, samples: Vec<TrajectorySample>) {
        for sample in samples {
            self.append(run_id, sample);
        }
    }

    /// All samples of a run in the order they were appended.
    fn query(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>>;

    /// Runs known to this sink.
    fn runs(&self) -> Vec<RunId>;
}

/// Shared sink handle
pub type SharedSink = Arc<dyn TrajectorySink>;
