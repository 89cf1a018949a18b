//! Storage adapters for Herald story clustering.
//!
//! [`ClusterStore`] persists embeddings, groups and memberships through
//! sea-orm on sqlite, postgres or mysql. [`MemoryStore`] keeps the same
//! contract in process and supports scripted faults for orchestrator tests.

pub mod config;
pub mod datastore;
mod db;
pub mod memory;
pub mod migration;
pub mod schema_manifest;
pub mod store;

pub use config::{DatabaseConfig, EngineSettings, HeraldConfig, PoolConfig, RetrySettings};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use herald_core::*;
pub use memory::{Fault, MemoryStore, StoreOp};
pub use schema_manifest::load_schema_manifest;
pub use store::ClusterStore;
