use std::path::Path;
use std::sync::Arc;

use herald_core::{
    ClusterError, ClusterResult, DiagnosticsApi, EmbeddingIngestApi, GroupCurationApi, GroupId,
    GroupRepository, GroupStatus, NewEmbedding, RunHistoryApi, StoryId, Timestamp,
};
use herald_engine::{ClusteringEngine, EngineConfig, RunRequest};
use herald_store::{ClusterStore, HeraldConfig};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tempfile::tempdir;

async fn open(base: &Path) -> ClusterResult<Arc<ClusterStore>> {
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    Ok(Arc::new(ClusterStore::connect(&config, base).await?))
}

async fn embed(store: &ClusterStore, story: &str, vector: Vec<f32>) -> ClusterResult<()> {
    store
        .insert_embedding(NewEmbedding {
            story_id: StoryId::new(story),
            vector,
            created_at: None,
        })
        .await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_run_groups_stories_and_records_history() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    embed(&store, "a", vec![1.0, 0.0, 0.0]).await?;
    embed(&store, "b", vec![0.99, 0.14, 0.0]).await?;
    embed(&store, "c", vec![0.0, 1.0, 0.0]).await?;

    let engine = ClusteringEngine::with_store(store.clone(), EngineConfig::default());
    let request = RunRequest::new(0.9, 3)?;
    let report = engine.run(request).await?;
    assert_eq!(report.groups_created, 2);
    assert_eq!(report.memberships_created, 3);
    assert!(!report.partial);
    store.record_run(report.to_record(&request)).await?;

    let integrity = store.check_integrity().await?;
    assert!(integrity.is_consistent(), "{integrity:?}");
    assert_eq!(integrity.embeddings_total, 3);
    assert_eq!(integrity.embeddings_ungrouped, 0);
    assert_eq!(integrity.groups_checked, 2);

    let again = engine.run(request).await?;
    assert_eq!(again.groups_created, 0);
    assert_eq!(again.memberships_created, 0);
    store.record_run(again.to_record(&request)).await?;

    let runs = store.list_runs(10).await?;
    assert_eq!(runs.len(), 2);
    assert_eq!(runs.iter().map(|r| r.groups_created).sum::<u64>(), 2);
    Ok(())
}

#[tokio::test]
async fn archived_group_stops_absorbing_stories() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    embed(&store, "a", vec![1.0, 0.0]).await?;
    let engine = ClusteringEngine::with_store(store.clone(), EngineConfig::default());
    let request = RunRequest::new(0.9, 3)?;
    engine.run(request).await?;

    let active = store
        .fetch_active_group_ids(Timestamp::now().minus_days(3), 10, 0)
        .await?;
    assert_eq!(active.items.len(), 1);
    let first_group = active.items[0];
    store
        .set_group_status(first_group, GroupStatus::Archived)
        .await?;

    embed(&store, "b", vec![1.0, 0.01]).await?;
    let report = engine.run(request).await?;
    assert_eq!(report.groups_created, 1);
    assert_eq!(report.memberships_created, 1);
    assert_eq!(store.list_group_members(first_group).await?.len(), 1);
    let frozen = store.fetch_groups_by_ids(&[first_group]).await?;
    assert_eq!(frozen[0].status, GroupStatus::Archived);
    assert_eq!(frozen[0].member_count, 1);
    Ok(())
}

/// Write an active group row directly, bypassing centroid validation.
async fn seed_raw_group(store: &ClusterStore, centroid_hex: &str) -> ClusterResult<GroupId> {
    let id = GroupId::new();
    let now = Timestamp::now().as_micros();
    let sql = format!(
        "INSERT INTO herald_groups \
         (group_id, centroid, dimension, member_count, status, created_at, updated_at) \
         VALUES ('{}', X'{centroid_hex}', 3, 1, {}, {now}, {now})",
        id.0.to_uuid_string(),
        GroupStatus::Active.as_i16()
    );
    store
        .connection()
        .execute(Statement::from_string(DatabaseBackend::Sqlite, sql))
        .await
        .map_err(ClusterError::from)?;
    Ok(id)
}

async fn assert_run_ignores_stored_centroid(centroid_hex: &str) -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed_raw_group(&store, centroid_hex).await?;
    embed(&store, "a", vec![1.0, 0.0, 0.0]).await?;

    let engine = ClusteringEngine::with_store(store.clone(), EngineConfig::default());
    let report = engine.run(RunRequest::new(0.9, 3)?).await?;
    assert!(!report.partial, "{report:?}");
    assert_eq!(report.groups_created, 1);
    assert_eq!(report.memberships_created, 1);
    assert_eq!(report.embeddings_skipped, 0);
    let integrity = store.check_integrity().await?;
    assert_eq!(integrity.embeddings_ungrouped, 0);
    assert_eq!(integrity.groups_checked, 2);
    Ok(())
}

#[tokio::test]
async fn undecodable_centroid_row_does_not_block_runs() -> ClusterResult<()> {
    assert_run_ignores_stored_centroid("000000").await
}

#[tokio::test]
async fn empty_centroid_row_does_not_fix_run_dimension() -> ClusterResult<()> {
    assert_run_ignores_stored_centroid("").await
}
