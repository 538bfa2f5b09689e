//! Signal inspection: a pool of isolated workers that turn each
//! [`ProcessingRequest`] into a classified [`WorkerResult`] with
//! recommendations.

pub mod analysis;
pub mod pool;
pub mod protocol;
pub mod rules;
mod worker;

pub use analysis::{
    inspect, Analysis, Classification, Inspection, ProcessingRequest, Recommendation,
    RecommendationKind,
};
pub use pool::{InspectorPool, PoolConfig, PoolOutcome, PoolStats, WorkerStats, WorkerStatus};
pub use protocol::{WorkerErrorCode, WorkerFailure, WorkerId, WorkerResult};
pub use worker::WorkerSettings;
