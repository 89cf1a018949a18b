use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use herald_core::{ClusterError, ClusterResult};

const DEFAULT_CONFIG_NAME: &str = "herald.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

/// Operational knobs for clustering runs. The similarity threshold and the
/// lookback window are per-run arguments and never live here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub ungrouped_batch_size: Option<u32>,
    pub group_id_page_size: Option<u32>,
    pub group_resolve_chunk: Option<usize>,
    pub max_batches: Option<u32>,
    pub call_timeout_ms: Option<u64>,
    pub batch_timeout_ms: Option<u64>,
    pub expected_dimension: Option<usize>,
    pub retry: Option<RetrySettings>,
}

impl EngineSettings {
    pub fn with_defaults() -> Self {
        Self {
            ungrouped_batch_size: Some(500),
            group_id_page_size: Some(1_000),
            group_resolve_chunk: Some(200),
            max_batches: Some(1_000),
            call_timeout_ms: Some(10_000),
            batch_timeout_ms: Some(60_000),
            expected_dimension: None,
            retry: Some(RetrySettings {
                max_attempts: Some(4),
                base_backoff_ms: Some(250),
                max_backoff_ms: Some(5_000),
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeraldConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub engine: Option<EngineSettings>,
    pub failpoints: Option<Vec<String>>,
}

impl HeraldConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            engine: Some(EngineSettings::with_defaults()),
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> ClusterResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| ClusterError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| ClusterError::storage(format!("read config: {err}")))?;
            let config: HeraldConfig =
                serde_json::from_str(&raw).map_err(|err| ClusterError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = HeraldConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| ClusterError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| ClusterError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> ClusterResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| "herald.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(ClusterError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    /// Engine settings with every unset field filled from the defaults.
    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::with_defaults();
        let Some(engine) = self.engine.clone() else {
            return defaults;
        };
        let default_retry = defaults.retry.clone().unwrap_or_default();
        let retry = engine.retry.unwrap_or_default();
        EngineSettings {
            ungrouped_batch_size: engine.ungrouped_batch_size.or(defaults.ungrouped_batch_size),
            group_id_page_size: engine.group_id_page_size.or(defaults.group_id_page_size),
            group_resolve_chunk: engine.group_resolve_chunk.or(defaults.group_resolve_chunk),
            max_batches: engine.max_batches.or(defaults.max_batches),
            call_timeout_ms: engine.call_timeout_ms.or(defaults.call_timeout_ms),
            batch_timeout_ms: engine.batch_timeout_ms.or(defaults.batch_timeout_ms),
            expected_dimension: engine.expected_dimension,
            retry: Some(RetrySettings {
                max_attempts: retry.max_attempts.or(default_retry.max_attempts),
                base_backoff_ms: retry.base_backoff_ms.or(default_retry.base_backoff_ms),
                max_backoff_ms: retry.max_backoff_ms.or(default_retry.max_backoff_ms),
            }),
        }
    }
}
