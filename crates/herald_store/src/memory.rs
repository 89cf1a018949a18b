//! In-process adapter with the same contract as [`crate::ClusterStore`].
//!
//! Faults can be scripted per operation so orchestrator behaviour under
//! timeouts, outages and interleaved writers is reproducible in tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use herald_core::{
    ClusterError, ClusterResult, CountMismatch, CreateSingletonInput, DiagnosticsApi, Embedding,
    EmbeddingCursor, EmbeddingId, EmbeddingIngestApi, EmbeddingSource, Group, GroupCurationApi,
    GroupId, GroupRepository, GroupStatus, IntegrityReport, JoinGroupInput, Membership,
    MembershipId, NewEmbedding, Page, RunHistoryApi, RunRecord, Timestamp, UngroupedQuery,
    Vector,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreOp {
    FetchUngrouped,
    FetchGroupIds,
    FetchGroups,
    CreateGroup,
    AddMembership,
    UpdateCentroid,
    JoinGroup,
    CreateSingleton,
    MembershipOwner,
}

/// One scripted outcome, consumed by the next call of the targeted operation.
#[derive(Clone)]
pub enum Fault {
    Timeout,
    Unavailable,
    Storage,
    /// Sleep before serving the call.
    Delay(Duration),
    /// Run a concurrent writer against the store, then serve the call.
    Interleave(Arc<dyn Fn(&MemoryStore) + Send + Sync>),
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Timeout => f.write_str("Timeout"),
            Fault::Unavailable => f.write_str("Unavailable"),
            Fault::Storage => f.write_str("Storage"),
            Fault::Delay(duration) => write!(f, "Delay({duration:?})"),
            Fault::Interleave(_) => f.write_str("Interleave"),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    embeddings: BTreeMap<EmbeddingCursor, Embedding>,
    groups: BTreeMap<GroupId, Group>,
    memberships: Vec<Membership>,
    runs: Vec<RunRecord>,
}

impl MemoryState {
    fn owner_of(&self, embedding_id: EmbeddingId) -> Option<GroupId> {
        self.memberships
            .iter()
            .find(|membership| membership.embedding_id == embedding_id)
            .map(|membership| membership.group_id)
    }

    fn push_membership(&mut self, membership: Membership) -> ClusterResult<()> {
        if let Some(owner) = self.owner_of(membership.embedding_id) {
            return Err(ClusterError::duplicate_membership(format!(
                "embedding {} already belongs to group {owner}",
                membership.embedding_id
            )));
        }
        self.memberships.push(membership);
        Ok(())
    }

    fn rejected_group_update(&self, group_id: GroupId) -> ClusterError {
        match self.groups.get(&group_id) {
            None => ClusterError::not_found(format!("group {group_id}")),
            Some(group) if !group.is_active() => {
                ClusterError::conflict(format!("group {group_id} is {}", group.status.as_str()))
            }
            Some(group) => ClusterError::conflict(format!(
                "group {group_id} member count moved to {}",
                group.member_count
            )),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<HashMap<StoreOp, VecDeque<Fault>>>>,
    calls: Arc<Mutex<HashMap<StoreOp, usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_fault(&self, op: StoreOp, fault: Fault) {
        self.inject_faults(op, fault, 1);
    }

    pub fn inject_faults(&self, op: StoreOp, fault: Fault, times: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            let queue = faults.entry(op).or_default();
            for _ in 0..times {
                queue.push_back(fault.clone());
            }
        }
    }

    /// Number of calls made to `op`, including calls that failed.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Insert a fully specified group, e.g. to backdate fixtures.
    pub fn seed_group(&self, group: Group) -> ClusterResult<()> {
        let mut state = self.state()?;
        state.groups.insert(group.id, group);
        Ok(())
    }

    /// Record a membership directly, as another writer would. Keeps the
    /// one-group-per-embedding rule but leaves group counts untouched.
    pub fn seed_membership(&self, membership: Membership) -> ClusterResult<()> {
        self.state()?.push_membership(membership)
    }

    /// Mutate a stored group outside the repository contract. Returns false when absent.
    pub fn edit_group(&self, group_id: GroupId, edit: impl FnOnce(&mut Group)) -> bool {
        let Ok(mut state) = self.state() else {
            return false;
        };
        match state.groups.get_mut(&group_id) {
            Some(group) => {
                edit(group);
                true
            }
            None => false,
        }
    }

    pub fn group(&self, group_id: GroupId) -> Option<Group> {
        self.state()
            .ok()
            .and_then(|state| state.groups.get(&group_id).cloned())
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state()
            .map(|state| state.groups.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn memberships(&self) -> Vec<Membership> {
        self.state()
            .map(|state| state.memberships.clone())
            .unwrap_or_default()
    }

    fn state(&self) -> ClusterResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ClusterError::storage("memory store poisoned"))
    }

    async fn enter(&self, op: StoreOp) -> ClusterResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.get_mut(&op).and_then(|queue| queue.pop_front()));
        match fault {
            None => Ok(()),
            Some(Fault::Timeout) => Err(ClusterError::timeout(format!("{op:?} timed out"))),
            Some(Fault::Unavailable) => {
                Err(ClusterError::unavailable(format!("{op:?} store unreachable")))
            }
            Some(Fault::Storage) => Err(ClusterError::storage(format!("{op:?} failed"))),
            Some(Fault::Delay(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(Fault::Interleave(writer)) => {
                writer(self);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EmbeddingSource for MemoryStore {
    async fn fetch_ungrouped_batch(&self, query: UngroupedQuery) -> ClusterResult<Page<Embedding>> {
        if query.limit == 0 {
            return Err(ClusterError::invalid("ungrouped batch limit must be positive"));
        }
        self.enter(StoreOp::FetchUngrouped).await?;
        let state = self.state()?;
        let items = state
            .embeddings
            .iter()
            .filter(|(cursor, _)| cursor.created_at >= query.cutoff)
            .filter(|(cursor, _)| query.after.is_none_or(|after| **cursor > after))
            .filter(|(cursor, _)| state.owner_of(cursor.embedding_id).is_none())
            .skip(query.offset as usize)
            .take(query.limit as usize + 1)
            .map(|(_, embedding)| embedding.clone())
            .collect();
        Ok(Page::from_overfetch(items, query.limit))
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn fetch_active_group_ids(
        &self,
        cutoff: Timestamp,
        limit: u32,
        offset: u64,
    ) -> ClusterResult<Page<GroupId>> {
        if limit == 0 {
            return Err(ClusterError::invalid("group id page size must be positive"));
        }
        self.enter(StoreOp::FetchGroupIds).await?;
        let state = self.state()?;
        let mut active: Vec<&Group> = state
            .groups
            .values()
            .filter(|group| group.is_active() && group.created_at >= cutoff)
            .collect();
        active.sort_by_key(|group| (group.created_at, group.id));
        let ids = active
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize + 1)
            .map(|group| group.id)
            .collect();
        Ok(Page::from_overfetch(ids, limit))
    }

    async fn fetch_groups_by_ids(&self, ids: &[GroupId]) -> ClusterResult<Vec<Group>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.enter(StoreOp::FetchGroups).await?;
        let state = self.state()?;
        let mut groups: Vec<Group> = ids
            .iter()
            .filter_map(|id| state.groups.get(id).cloned())
            .collect();
        groups.sort_by_key(|group| group.id);
        groups.dedup_by_key(|group| group.id);
        Ok(groups)
    }

    async fn create_group(&self, centroid: Vec<f32>) -> ClusterResult<GroupId> {
        self.enter(StoreOp::CreateGroup).await?;
        let group = singleton(Vector::new(centroid)?.into_inner());
        let id = group.id;
        self.state()?.groups.insert(id, group);
        Ok(id)
    }

    async fn add_membership(
        &self,
        group_id: GroupId,
        embedding_id: EmbeddingId,
        similarity: f64,
    ) -> ClusterResult<()> {
        self.enter(StoreOp::AddMembership).await?;
        self.state()?.push_membership(Membership {
            id: MembershipId::new(),
            group_id,
            embedding_id,
            similarity,
            added_at: Timestamp::now(),
        })
    }

    async fn update_centroid(
        &self,
        group_id: GroupId,
        new_centroid: Vec<f32>,
        new_member_count: u32,
    ) -> ClusterResult<()> {
        self.enter(StoreOp::UpdateCentroid).await?;
        let mut state = self.state()?;
        match state.groups.get_mut(&group_id) {
            Some(group) if group.is_active() => {
                group.centroid = new_centroid;
                group.member_count = new_member_count;
                group.updated_at = Timestamp::now();
                Ok(())
            }
            _ => Err(state.rejected_group_update(group_id)),
        }
    }

    async fn join_group(&self, input: JoinGroupInput) -> ClusterResult<()> {
        self.enter(StoreOp::JoinGroup).await?;
        let mut state = self.state()?;
        if let Some(owner) = state.owner_of(input.embedding_id) {
            return Err(ClusterError::duplicate_membership(format!(
                "embedding {} already belongs to group {owner}",
                input.embedding_id
            )));
        }
        let accepted = state.groups.get(&input.group_id).is_some_and(|group| {
            group.is_active() && group.member_count == input.expected_member_count
        });
        if !accepted {
            return Err(state.rejected_group_update(input.group_id));
        }
        let now = Timestamp::now();
        if let Some(group) = state.groups.get_mut(&input.group_id) {
            group.centroid = input.new_centroid;
            group.member_count = input.expected_member_count + 1;
            group.updated_at = now;
        }
        state.memberships.push(Membership {
            id: MembershipId::new(),
            group_id: input.group_id,
            embedding_id: input.embedding_id,
            similarity: input.similarity,
            added_at: now,
        });
        Ok(())
    }

    async fn create_singleton_group(&self, input: CreateSingletonInput) -> ClusterResult<Group> {
        self.enter(StoreOp::CreateSingleton).await?;
        let group = singleton(Vector::new(input.centroid)?.into_inner());
        let mut state = self.state()?;
        state.push_membership(Membership {
            id: MembershipId::new(),
            group_id: group.id,
            embedding_id: input.embedding_id,
            similarity: 1.0,
            added_at: group.created_at,
        })?;
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn membership_owner(&self, embedding_id: EmbeddingId) -> ClusterResult<Option<GroupId>> {
        self.enter(StoreOp::MembershipOwner).await?;
        Ok(self.state()?.owner_of(embedding_id))
    }
}

#[async_trait]
impl EmbeddingIngestApi for MemoryStore {
    async fn insert_embedding(&self, input: NewEmbedding) -> ClusterResult<Embedding> {
        if input.story_id.as_str().trim().is_empty() {
            return Err(ClusterError::invalid("story id is required"));
        }
        let embedding = Embedding {
            id: EmbeddingId::new(),
            story_id: input.story_id,
            vector: (!input.vector.is_empty()).then_some(input.vector),
            created_at: input.created_at.unwrap_or_else(Timestamp::now),
        };
        self.state()?
            .embeddings
            .insert(embedding.cursor(), embedding.clone());
        Ok(embedding)
    }
}

#[async_trait]
impl GroupCurationApi for MemoryStore {
    async fn set_group_status(&self, group_id: GroupId, status: GroupStatus) -> ClusterResult<()> {
        let mut state = self.state()?;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| ClusterError::not_found(format!("group {group_id}")))?;
        if group.status == status {
            return Ok(());
        }
        if !group.is_active() {
            return Err(ClusterError::conflict(format!(
                "group {group_id} is {} and cannot become {}",
                group.status.as_str(),
                status.as_str()
            )));
        }
        group.status = status;
        group.updated_at = Timestamp::now();
        Ok(())
    }

    async fn list_group_members(&self, group_id: GroupId) -> ClusterResult<Vec<Membership>> {
        let state = self.state()?;
        if !state.groups.contains_key(&group_id) {
            return Err(ClusterError::not_found(format!("group {group_id}")));
        }
        let mut members: Vec<Membership> = state
            .memberships
            .iter()
            .filter(|membership| membership.group_id == group_id)
            .cloned()
            .collect();
        members.sort_by_key(|membership| (membership.added_at, membership.id));
        Ok(members)
    }
}

#[async_trait]
impl DiagnosticsApi for MemoryStore {
    async fn check_integrity(&self) -> ClusterResult<IntegrityReport> {
        let state = self.state()?;
        let mut rows_per_group: HashMap<GroupId, u32> = HashMap::new();
        let mut rows_per_embedding: HashMap<EmbeddingId, u32> = HashMap::new();
        for membership in &state.memberships {
            *rows_per_group.entry(membership.group_id).or_insert(0) += 1;
            *rows_per_embedding.entry(membership.embedding_id).or_insert(0) += 1;
        }
        let count_mismatches = state
            .groups
            .values()
            .filter_map(|group| {
                let rows = rows_per_group.get(&group.id).copied().unwrap_or(0);
                (rows != group.member_count).then_some(CountMismatch {
                    group_id: group.id,
                    member_count: group.member_count,
                    membership_rows: rows,
                })
            })
            .collect();
        let mut multi_assigned: Vec<EmbeddingId> = rows_per_embedding
            .into_iter()
            .filter(|(_, rows)| *rows > 1)
            .map(|(embedding_id, _)| embedding_id)
            .collect();
        multi_assigned.sort();
        let embeddings_ungrouped = state
            .embeddings
            .keys()
            .filter(|cursor| state.owner_of(cursor.embedding_id).is_none())
            .count() as u64;
        Ok(IntegrityReport {
            groups_checked: state.groups.len() as u64,
            embeddings_total: state.embeddings.len() as u64,
            embeddings_ungrouped,
            count_mismatches,
            multi_assigned,
        })
    }
}

#[async_trait]
impl RunHistoryApi for MemoryStore {
    async fn record_run(&self, record: RunRecord) -> ClusterResult<()> {
        self.state()?.runs.push(record);
        Ok(())
    }

    async fn list_runs(&self, limit: u32) -> ClusterResult<Vec<RunRecord>> {
        let state = self.state()?;
        let mut runs = state.runs.clone();
        runs.sort_by(|a, b| (b.started_at, b.run_id).cmp(&(a.started_at, a.run_id)));
        runs.truncate(limit as usize);
        Ok(runs)
    }
}

fn singleton(centroid: Vec<f32>) -> Group {
    let now = Timestamp::now();
    Group {
        id: GroupId::new(),
        centroid,
        member_count: 1,
        status: GroupStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::StoryId;

    fn new_embedding(story: &str, vector: Vec<f32>, created_at: i64) -> NewEmbedding {
        NewEmbedding {
            story_id: StoryId::new(story),
            vector,
            created_at: Some(Timestamp::from_micros(created_at)),
        }
    }

    #[tokio::test]
    async fn ungrouped_view_excludes_members_and_old_rows() -> ClusterResult<()> {
        let store = MemoryStore::new();
        store
            .insert_embedding(new_embedding("old", vec![1.0], 5))
            .await?;
        let a = store
            .insert_embedding(new_embedding("a", vec![1.0], 20))
            .await?;
        let b = store
            .insert_embedding(new_embedding("b", vec![1.0], 10))
            .await?;
        store
            .create_singleton_group(CreateSingletonInput {
                embedding_id: a.id,
                centroid: vec![1.0],
            })
            .await?;
        let page = store
            .fetch_ungrouped_batch(UngroupedQuery::new(Timestamp::from_micros(10), 10, 0))
            .await?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, b.id);
        assert!(!page.has_more);
        Ok(())
    }

    #[tokio::test]
    async fn scripted_faults_fire_once_in_order() -> ClusterResult<()> {
        let store = MemoryStore::new();
        store.inject_fault(StoreOp::FetchGroupIds, Fault::Timeout);
        store.inject_fault(StoreOp::FetchGroupIds, Fault::Unavailable);
        let cutoff = Timestamp::from_micros(0);
        let first = store.fetch_active_group_ids(cutoff, 10, 0).await;
        assert!(matches!(first, Err(ClusterError::Timeout { .. })));
        let second = store.fetch_active_group_ids(cutoff, 10, 0).await;
        assert!(matches!(second, Err(ClusterError::Unavailable { .. })));
        assert!(store.fetch_active_group_ids(cutoff, 10, 0).await?.items.is_empty());
        assert_eq!(store.calls(StoreOp::FetchGroupIds), 3);
        Ok(())
    }

    #[tokio::test]
    async fn join_rejects_moved_member_count() -> ClusterResult<()> {
        let store = MemoryStore::new();
        let first = store
            .insert_embedding(new_embedding("a", vec![1.0, 0.0], 1))
            .await?;
        let second = store
            .insert_embedding(new_embedding("b", vec![1.0, 0.1], 2))
            .await?;
        let group = store
            .create_singleton_group(CreateSingletonInput {
                embedding_id: first.id,
                centroid: vec![1.0, 0.0],
            })
            .await?;
        let err = store
            .join_group(JoinGroupInput {
                group_id: group.id,
                embedding_id: second.id,
                similarity: 0.99,
                new_centroid: vec![1.0, 0.05],
                expected_member_count: 2,
            })
            .await
            .expect_err("stale count");
        assert!(matches!(err, ClusterError::Conflict { .. }));
        assert_eq!(store.memberships().len(), 1);
        assert_eq!(store.group(group.id).map(|g| g.member_count), Some(1));
        Ok(())
    }
}
