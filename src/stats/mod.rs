//! Job-scoped metric aggregation
//!
//! Workers of the same job share metrics through the store: every worker
//! sees every other worker's increments and extremum updates.

pub mod codec;
pub mod collector;
pub mod dst;
pub mod keys;
pub mod value;

pub use codec::ValueCodec;
pub use collector::{CollectorState, JobStats, StatsCollector};
pub use dst::{
    run_stats_batch, summarize_stats_batch, StatsDSTConfig, StatsDSTHarness, StatsDSTResult,
};
pub use keys::{JobId, KeyNamespace, Layout, Slot, DEFAULT_JOB, DEFAULT_KEY_TEMPLATE};
pub use value::{MetricValue, Number};
