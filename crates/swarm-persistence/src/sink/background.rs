//! Write-back sink: appends are queued on a channel and applied to an inner
//! sink by a background tokio task, so the tick loop never waits on storage.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use swarm_domain::{RunId, TrajectorySample};

use super::traits::{SharedSink, TrajectorySink};
use crate::error::{PersistenceError, Result};

enum SinkMessage {
    Append(RunId, Vec<TrajectorySample>),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking sink in front of another sink.
#[derive(Clone)]
pub struct BackgroundSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
    inner: SharedSink,
}

impl BackgroundSink {
    /// Start the writer task. Must be called from within a tokio runtime.
    ///
    /// The task ends once every clone of the returned sink has been dropped.
    #[must_use]
    pub fn spawn(inner: SharedSink) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = inner.clone();

        let handle = tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(message) = rx.recv().await {
                match message {
                    SinkMessage::Append(run_id, samples) => {
                        written += samples.len();
                        writer.append_batch(&run_id, samples);
                    }
                    SinkMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            tracing::debug!(samples = written, "Trajectory writer stopped");
        });

        (Self { tx, inner }, handle)
    }

    /// Wait until every append queued before this call has reached the
    /// inner sink.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SinkMessage::Flush(ack_tx))
            .map_err(|_| PersistenceError::SinkClosed)?;
        ack_rx.await.map_err(|_| PersistenceError::SinkClosed)
    }

    fn enqueue(&self, run_id: &RunId, samples: Vec<TrajectorySample>) {
        if self
            .tx
            .send(SinkMessage::Append(run_id.clone(), samples))
            .is_err()
        {
            tracing::warn!(run_id = %run_id, "Trajectory writer closed, dropping samples");
        }
    }
}

impl TrajectorySink for BackgroundSink {
    fn append(&self, run_id: &RunId, sample: TrajectorySample) {
        self.enqueue(run_id, vec![sample]);
    }

    fn append_batch(&self, run_id: &RunId, samples: Vec<TrajectorySample>) {
        if !samples.is_empty() {
            self.enqueue(run_id, samples);
        }
    }

    /// Reads the inner sink; call [`BackgroundSink::flush`] first to see
    /// every append made so far.
    fn query(&self, run_id: &RunId) -> Result<Vec<TrajectorySample>> {
        self.inner.query(run_id)
    }

    fn runs(&self) -> Vec<RunId> {
        self.inner.runs()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sink::InMemorySink;
    use swarm_domain::{Vec3, VehicleId, VehicleStatus};

    fn sample(t: f64) -> TrajectorySample {
        TrajectorySample {
            t,
            vehicle_id: VehicleId::from("d1"),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            battery: 99.0,
            status: VehicleStatus::Idle,
        }
    }

    #[tokio::test]
    async fn test_flush_makes_appends_visible() {
        let store = Arc::new(InMemorySink::new());
        let (sink, _handle) = BackgroundSink::spawn(store.clone());
        let run = RunId::from("run_bg");

        for i in 1..=50 {
            sink.append(&run, sample(f64::from(i) * 0.05));
        }
        sink.flush().await.unwrap();

        let samples = sink.query(&run).unwrap();
        assert_eq!(samples.len(), 50);
        assert!(samples.windows(2).all(|w| w[0].t < w[1].t));
        assert_eq!(store.sample_count(), 50);
    }

    #[tokio::test]
    async fn test_writer_stops_when_dropped() {
        let store = Arc::new(InMemorySink::new());
        let (sink, handle) = BackgroundSink::spawn(store.clone());
        sink.append_batch(&RunId::from("run_x"), vec![sample(0.05), sample(0.10)]);
        drop(sink);

        tokio_test::assert_ok!(handle.await);
        assert_eq!(store.sample_count(), 2);
    }
}
