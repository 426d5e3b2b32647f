//! # Swarm Persistence Library
//!
//! Trajectory log for the swarm simulator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Simulation Engine (tick)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ append(run_id, samples)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TrajectorySink trait                     │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │     BackgroundSink      │──▶│        InMemorySink          │
//! │  (channel + writer)     │   │   (query side, per run)      │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use swarm_persistence::{BackgroundSink, InMemorySink, TrajectorySink};
//!
//! let store = Arc::new(InMemorySink::new());
//! let (sink, _writer) = BackgroundSink::spawn(store.clone());
//!
//! sink.append(&run_id, sample);
//! sink.flush().await?;
//! let samples = sink.query(&run_id)?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod export;
pub mod sink;

// Re-export commonly used types
pub use error::{PersistenceError, Result};
pub use export::ExportFormat;
pub use sink::{BackgroundSink, InMemorySink, SharedSink, TrajectorySink};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
