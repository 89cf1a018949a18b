//! Core types and pure clustering math for Herald story groups.
//!
//! Storage adapters implement the traits in [`api`]; the orchestrator in
//! `herald_engine` drives them with [`similarity::best_match`] and
//! [`centroid::incremental_mean`].

pub mod api;
pub mod centroid;
pub mod error;
pub mod ids;
pub mod model;
pub mod schema_manifest;
pub mod similarity;
pub mod time;

pub use api::*;
pub use centroid::incremental_mean;
pub use error::{ClusterError, ClusterResult};
pub use ids::*;
pub use model::*;
pub use schema_manifest::*;
pub use similarity::{MatchOutcome, best_match, cosine_similarity};
pub use time::*;
