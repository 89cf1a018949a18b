use serde::{Deserialize, Serialize};

use herald_core::{RunId, RunRecord, Timestamp};

use crate::RunRequest;

/// Statistics for one clustering run. `partial` is a normal outcome.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub groups_created: u64,
    pub memberships_created: u64,
    pub embeddings_skipped: u64,
    pub duplicates_ignored: u64,
    pub conflicts_retried: u64,
    pub batches_processed: u64,
    pub partial: bool,
    pub duration_ms: u64,
    pub started_at: Timestamp,
    pub cutoff: Timestamp,
}

impl RunReport {
    pub fn to_record(&self, request: &RunRequest) -> RunRecord {
        RunRecord {
            run_id: RunId::new(),
            started_at: self.started_at,
            threshold: request.threshold,
            lookback_days: request.lookback_days,
            groups_created: self.groups_created,
            memberships_created: self.memberships_created,
            embeddings_skipped: self.embeddings_skipped,
            partial: self.partial,
            duration_ms: self.duration_ms,
        }
    }
}
