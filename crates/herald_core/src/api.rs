use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    ClusterResult, Embedding, EmbeddingCursor, EmbeddingId, Group, GroupId, GroupStatus,
    Membership, Page, RunId, StoryId, Timestamp,
};

/// Window query over the ungrouped view (embeddings without a membership row).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UngroupedQuery {
    pub cutoff: Timestamp,
    pub limit: u32,
    pub offset: u64,
    /// Resume strictly after this position; combined with `offset` when both are set.
    pub after: Option<EmbeddingCursor>,
}

impl UngroupedQuery {
    pub fn new(cutoff: Timestamp, limit: u32, offset: u64) -> Self {
        Self {
            cutoff,
            limit,
            offset,
            after: None,
        }
    }

    pub fn resume(cutoff: Timestamp, limit: u32, after: Option<EmbeddingCursor>) -> Self {
        Self {
            cutoff,
            limit,
            offset: 0,
            after,
        }
    }

    pub fn with_limit(self, limit: u32) -> Self {
        Self { limit, ..self }
    }
}

#[async_trait]
pub trait EmbeddingSource: Send + Sync {
    /// Ungrouped embeddings with `created_at >= cutoff`, ordered by `(created_at, id)`.
    async fn fetch_ungrouped_batch(&self, query: UngroupedQuery) -> ClusterResult<Page<Embedding>>;
}

/// Membership insert plus conditional centroid update, applied as one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinGroupInput {
    pub group_id: GroupId,
    pub embedding_id: EmbeddingId,
    pub similarity: f64,
    pub new_centroid: Vec<f32>,
    /// Member count the caller based `new_centroid` on; the update is rejected if it moved.
    pub expected_member_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSingletonInput {
    pub embedding_id: EmbeddingId,
    pub centroid: Vec<f32>,
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn fetch_active_group_ids(
        &self,
        cutoff: Timestamp,
        limit: u32,
        offset: u64,
    ) -> ClusterResult<Page<GroupId>>;

    async fn fetch_groups_by_ids(&self, ids: &[GroupId]) -> ClusterResult<Vec<Group>>;

    async fn create_group(&self, centroid: Vec<f32>) -> ClusterResult<GroupId>;

    async fn add_membership(
        &self,
        group_id: GroupId,
        embedding_id: EmbeddingId,
        similarity: f64,
    ) -> ClusterResult<()>;

    async fn update_centroid(
        &self,
        group_id: GroupId,
        new_centroid: Vec<f32>,
        new_member_count: u32,
    ) -> ClusterResult<()>;

    async fn join_group(&self, input: JoinGroupInput) -> ClusterResult<()>;

    async fn create_singleton_group(&self, input: CreateSingletonInput) -> ClusterResult<Group>;

    /// Group that already holds `embedding_id`, if any.
    async fn membership_owner(&self, embedding_id: EmbeddingId) -> ClusterResult<Option<GroupId>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEmbedding {
    pub story_id: StoryId,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[async_trait]
pub trait EmbeddingIngestApi: Send + Sync {
    async fn insert_embedding(&self, input: NewEmbedding) -> ClusterResult<Embedding>;
}

#[async_trait]
pub trait GroupCurationApi: Send + Sync {
    /// External curation transition; frozen groups receive no further clustering writes.
    async fn set_group_status(&self, group_id: GroupId, status: GroupStatus) -> ClusterResult<()>;

    async fn list_group_members(&self, group_id: GroupId) -> ClusterResult<Vec<Membership>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountMismatch {
    pub group_id: GroupId,
    pub member_count: u32,
    pub membership_rows: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub groups_checked: u64,
    pub embeddings_total: u64,
    pub embeddings_ungrouped: u64,
    pub count_mismatches: Vec<CountMismatch>,
    pub multi_assigned: Vec<EmbeddingId>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.count_mismatches.is_empty() && self.multi_assigned.is_empty()
    }
}

#[async_trait]
pub trait DiagnosticsApi: Send + Sync {
    async fn check_integrity(&self) -> ClusterResult<IntegrityReport>;
}

/// Persisted summary of one orchestrator run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: Timestamp,
    pub threshold: f64,
    pub lookback_days: u32,
    pub groups_created: u64,
    pub memberships_created: u64,
    pub embeddings_skipped: u64,
    pub partial: bool,
    pub duration_ms: u64,
}

#[async_trait]
pub trait RunHistoryApi: Send + Sync {
    async fn record_run(&self, record: RunRecord) -> ClusterResult<()>;

    /// Most recent runs first.
    async fn list_runs(&self, limit: u32) -> ClusterResult<Vec<RunRecord>>;
}
