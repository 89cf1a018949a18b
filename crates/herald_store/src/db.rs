use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum HeraldEmbeddings {
    Table,
    EmbeddingId,
    StoryId,
    Vector,
    Dimension,
    CreatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum HeraldGroups {
    Table,
    GroupId,
    Centroid,
    Dimension,
    MemberCount,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum HeraldMemberships {
    Table,
    MembershipId,
    GroupId,
    EmbeddingId,
    Similarity,
    AddedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum HeraldClusterRuns {
    Table,
    RunId,
    StartedAt,
    Threshold,
    LookbackDays,
    GroupsCreated,
    MembershipsCreated,
    EmbeddingsSkipped,
    Partial,
    DurationMs,
}

/// Vectors are persisted as packed little-endian `f32` values.
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// `None` when the payload length is not a whole number of `f32` values.
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
