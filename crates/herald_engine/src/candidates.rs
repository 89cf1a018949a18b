//! In-memory working set of candidate groups for one run.

use std::collections::BTreeMap;

use herald_core::{Group, GroupId, MatchOutcome, best_match};

/// Active groups in the lookback window. Ids are listed up front; full
/// records (with centroids) are resolved on first use.
#[derive(Debug, Default)]
pub struct CandidateSet {
    unresolved: Vec<GroupId>,
    groups: BTreeMap<GroupId, Group>,
}

impl CandidateSet {
    pub fn with_ids(ids: Vec<GroupId>) -> Self {
        Self {
            unresolved: ids,
            groups: BTreeMap::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn unresolved(&self) -> &[GroupId] {
        &self.unresolved
    }

    /// Mark the first `count` unresolved ids as loaded and keep the active records.
    pub fn resolve(&mut self, count: usize, groups: Vec<Group>) {
        let count = count.min(self.unresolved.len());
        self.unresolved.drain(..count);
        for group in groups {
            self.upsert(group);
        }
    }

    /// Replace a candidate with a fresher record; inactive records drop out.
    pub fn upsert(&mut self, group: Group) {
        if group.is_active() {
            self.groups.insert(group.id, group);
        } else {
            self.groups.remove(&group.id);
        }
    }

    pub fn remove(&mut self, group_id: GroupId) {
        self.groups.remove(&group_id);
    }

    pub fn get(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// Reflect an accepted join so the next embedding sees the new centroid.
    pub fn apply_join(&mut self, group_id: GroupId, centroid: Vec<f32>, member_count: u32) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.centroid = centroid;
            group.member_count = member_count;
        }
    }

    pub fn best_match(&self, vector: &[f32], threshold: f64) -> Option<MatchOutcome> {
        best_match(vector, self.groups.values(), threshold)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
