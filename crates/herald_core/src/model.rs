use serde::{Deserialize, Serialize};

use crate::{ClusterError, ClusterResult, EmbeddingId, GroupId, MembershipId, StoryId, Timestamp};

/// Embedding vector that passed validation: non-empty, finite, non-zero norm.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Vector(Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> ClusterResult<Self> {
        if values.is_empty() {
            return Err(ClusterError::invalid("vector is empty"));
        }
        if let Some(index) = values.iter().position(|value| !value.is_finite()) {
            return Err(ClusterError::invalid(format!(
                "vector has non-finite value at index {index}"
            )));
        }
        if values.iter().all(|value| *value == 0.0) {
            return Err(ClusterError::invalid("vector has zero norm"));
        }
        Ok(Self(values))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Vector::new(values).map_err(serde::de::Error::custom)
    }
}

/// One clustering unit. `vector` is `None` when the stored payload is missing or undecodable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: EmbeddingId,
    pub story_id: StoryId,
    pub vector: Option<Vec<f32>>,
    pub created_at: Timestamp,
}

impl Embedding {
    pub fn cursor(&self) -> EmbeddingCursor {
        EmbeddingCursor {
            created_at: self.created_at,
            embedding_id: self.id,
        }
    }

    /// Validate the payload, optionally against an established dimension.
    pub fn validated_vector(&self, expected_dimension: Option<usize>) -> ClusterResult<Vector> {
        let values = self
            .vector
            .clone()
            .ok_or_else(|| ClusterError::invalid(format!("embedding {} has no vector", self.id)))?;
        let vector = Vector::new(values)?;
        if let Some(expected) = expected_dimension
            && vector.dimension() != expected
        {
            return Err(ClusterError::dimension_mismatch(
                expected,
                vector.dimension(),
                format!("embedding {}", self.id),
            ));
        }
        Ok(vector)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum GroupStatus {
    Active = 1,
    Archived = 2,
    Merged = 3,
}

impl GroupStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(GroupStatus::Active),
            2 => Some(GroupStatus::Archived),
            3 => Some(GroupStatus::Merged),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Archived => "archived",
            GroupStatus::Merged => "merged",
        }
    }
}

impl std::str::FromStr for GroupStatus {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(GroupStatus::Active),
            "archived" => Ok(GroupStatus::Archived),
            "merged" => Ok(GroupStatus::Merged),
            other => Err(ClusterError::invalid(format!("unknown group status '{other}'"))),
        }
    }
}

/// A story group and its running-mean centroid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub centroid: Vec<f32>,
    pub member_count: u32,
    pub status: GroupStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Group {
    pub fn dimension(&self) -> usize {
        self.centroid.len()
    }

    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub group_id: GroupId,
    pub embedding_id: EmbeddingId,
    pub similarity: f64,
    pub added_at: Timestamp,
}

/// Position in the `(created_at, id)` ordering of embeddings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EmbeddingCursor {
    pub created_at: Timestamp,
    pub embedding_id: EmbeddingId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }

    /// Build a page from up to `limit + 1` fetched rows.
    pub fn from_overfetch(mut items: Vec<T>, limit: u32) -> Self {
        let has_more = items.len() > limit as usize;
        items.truncate(limit as usize);
        Self { items, has_more }
    }
}
