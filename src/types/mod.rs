//! Shared data structures for powertrain health analysis
//!
//! - `MetricKind` / `MetricSample`: raw controller telemetry
//! - `Insight`: append-only knowledge accumulated over the equipment's life

mod insight;
mod metrics;

pub use insight::*;
pub use metrics::*;
