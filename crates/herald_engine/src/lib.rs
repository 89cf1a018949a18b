//! Herald clustering engine.
//!
//! One [`ClusteringEngine::run`] streams the ungrouped embeddings of the
//! lookback window in creation order and either joins each one to its most
//! similar active group or starts a new group for it. All persistence goes
//! through the `herald_core` adapter traits.

mod candidates;
mod config;
mod feed;
mod orchestrator;
mod report;
mod retry;

pub use candidates::CandidateSet;
pub use config::{EngineConfig, RunRequest};
pub use feed::UngroupedFeed;
pub use orchestrator::ClusteringEngine;
pub use report::RunReport;
pub use retry::{Attempted, RetryPolicy, timed, with_retry, with_shrinking_retry};
