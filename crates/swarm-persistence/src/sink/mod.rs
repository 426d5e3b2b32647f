//! # Sink Module
//!
//! Trajectory log implementations.
//!
//! - `InMemorySink` - process-lifetime store, also the default query side
//! - `BackgroundSink` - channel + writer task in front of another sink

pub mod background;
pub mod memory_impl;
pub mod traits;

pub use background::BackgroundSink;
pub use memory_impl::InMemorySink;
pub use traits::{SharedSink, TrajectorySink};
