//! A Herald datastore directory: `herald.json` and, for sqlite, the database file.

use std::path::{Path, PathBuf};

use log::info;

use crate::{ClusterStore, EngineSettings, HeraldConfig};
use herald_core::ClusterResult;

const DEFAULT_DB_NAME: &str = "herald.sqlite";

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

/// Read `base/herald.json`, writing a sqlite default on first use.
pub fn load_or_init_config(base: &Path) -> ClusterResult<HeraldConfig> {
    HeraldConfig::load_or_init(base, &default_sqlite_path(base))
}

/// Connect the configured backend, run pending migrations and resolve engine settings.
pub async fn open_store(base: &Path) -> ClusterResult<(ClusterStore, EngineSettings)> {
    let config = load_or_init_config(base)?;
    let store = ClusterStore::connect(&config, base).await?;
    info!(
        "herald.store: opened {} datastore under {}",
        store.backend_name(),
        base.display()
    );
    Ok((store, config.engine_settings()))
}
