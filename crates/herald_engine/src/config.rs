use std::time::Duration;

use serde::{Deserialize, Serialize};

use herald_core::{ClusterError, ClusterResult};

use crate::retry::RetryPolicy;

/// Per-run parameters. Both are required on every invocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub threshold: f64,
    pub lookback_days: u32,
}

impl RunRequest {
    pub fn new(threshold: f64, lookback_days: u32) -> ClusterResult<Self> {
        let request = Self {
            threshold,
            lookback_days,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> ClusterResult<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(ClusterError::invalid(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.lookback_days == 0 {
            return Err(ClusterError::invalid("lookback_days must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub ungrouped_batch_size: u32,
    pub group_id_page_size: u32,
    pub group_resolve_chunk: usize,
    /// Ceiling on ungrouped batches per run; reaching it with work left marks the run partial.
    pub max_batches: u32,
    pub call_timeout: Duration,
    pub batch_timeout: Duration,
    /// Vector dimension every embedding and stored centroid must have.
    pub expected_dimension: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ungrouped_batch_size: 500,
            group_id_page_size: 1_000,
            group_resolve_chunk: 200,
            max_batches: 1_000,
            call_timeout: Duration::from_secs(10),
            batch_timeout: Duration::from_secs(60),
            expected_dimension: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ClusterResult<()> {
        if self.ungrouped_batch_size == 0 || self.group_id_page_size == 0 {
            return Err(ClusterError::invalid("batch sizes must be positive"));
        }
        if self.group_resolve_chunk == 0 {
            return Err(ClusterError::invalid("group_resolve_chunk must be positive"));
        }
        if self.max_batches == 0 {
            return Err(ClusterError::invalid("max_batches must be positive"));
        }
        if self.call_timeout.is_zero() || self.batch_timeout.is_zero() {
            return Err(ClusterError::invalid("timeouts must be positive"));
        }
        if self.expected_dimension == Some(0) {
            return Err(ClusterError::invalid("expected_dimension must be positive"));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_range_is_half_open() {
        assert!(RunRequest::new(1.0, 1).is_ok());
        assert!(RunRequest::new(0.0001, 30).is_ok());
        assert!(RunRequest::new(0.0, 1).is_err());
        assert!(RunRequest::new(1.01, 1).is_err());
        assert!(RunRequest::new(f64::NAN, 1).is_err());
        assert!(RunRequest::new(0.8, 0).is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        let config = EngineConfig {
            max_batches: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
