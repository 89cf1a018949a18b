use herald_store::{
    ClusterError, ClusterResult, ClusterStore, CreateSingletonInput, DiagnosticsApi,
    EmbeddingIngestApi, GroupRepository, HeraldConfig, NewEmbedding, RunHistoryApi, RunId,
    RunRecord, StoryId, Timestamp,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tempfile::tempdir;

fn run(started_at: i64, partial: bool) -> RunRecord {
    RunRecord {
        run_id: RunId::new(),
        started_at: Timestamp::from_micros(started_at),
        threshold: 0.85,
        lookback_days: 3,
        groups_created: 2,
        memberships_created: 5,
        embeddings_skipped: 1,
        partial,
        duration_ms: 42,
    }
}

#[tokio::test]
async fn integrity_reports_count_drift() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    let embedding = store
        .insert_embedding(NewEmbedding {
            story_id: StoryId::new("story"),
            vector: vec![0.2, 0.4],
            created_at: None,
        })
        .await?;
    store
        .insert_embedding(NewEmbedding {
            story_id: StoryId::new("pending"),
            vector: vec![0.4, 0.2],
            created_at: None,
        })
        .await?;
    let group = store
        .create_singleton_group(CreateSingletonInput {
            embedding_id: embedding.id,
            centroid: vec![0.2, 0.4],
        })
        .await?;

    let report = store.check_integrity().await?;
    assert!(report.is_consistent());
    assert_eq!(report.groups_checked, 1);
    assert_eq!(report.embeddings_total, 2);
    assert_eq!(report.embeddings_ungrouped, 1);

    store
        .connection()
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "UPDATE herald_groups SET member_count = 4".to_string(),
        ))
        .await
        .map_err(ClusterError::from)?;
    let report = store.check_integrity().await?;
    assert!(!report.is_consistent());
    assert_eq!(report.count_mismatches.len(), 1);
    assert_eq!(report.count_mismatches[0].group_id, group.id);
    assert_eq!(report.count_mismatches[0].member_count, 4);
    assert_eq!(report.count_mismatches[0].membership_rows, 1);
    Ok(())
}

#[tokio::test]
async fn run_history_lists_latest_first() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    let older = run(1_000, false);
    let newer = run(2_000, true);
    store.record_run(older.clone()).await?;
    store.record_run(newer.clone()).await?;

    let runs = store.list_runs(10).await?;
    assert_eq!(runs, vec![newer.clone(), older]);
    let latest = store.list_runs(1).await?;
    assert_eq!(latest, vec![newer]);
    Ok(())
}
