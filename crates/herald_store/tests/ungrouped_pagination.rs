use herald_store::{
    ClusterResult, ClusterStore, CreateSingletonInput, Embedding, EmbeddingIngestApi,
    EmbeddingSource, GroupRepository, HeraldConfig, NewEmbedding, StoryId, Timestamp,
    UngroupedQuery,
};
use tempfile::tempdir;

async fn insert(store: &ClusterStore, story: &str, created_at: i64) -> ClusterResult<Embedding> {
    store
        .insert_embedding(NewEmbedding {
            story_id: StoryId::new(story),
            vector: vec![1.0, 0.0, 0.0],
            created_at: Some(Timestamp::from_micros(created_at)),
        })
        .await
}

#[tokio::test]
async fn ungrouped_batches_follow_creation_order() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;

    insert(&store, "too-old", 50).await?;
    let late = insert(&store, "late", 300).await?;
    let tie_a = insert(&store, "tie-a", 200).await?;
    let tie_b = insert(&store, "tie-b", 200).await?;
    let early = insert(&store, "early", 100).await?;

    let cutoff = Timestamp::from_micros(100);
    let first = store
        .fetch_ungrouped_batch(UngroupedQuery::new(cutoff, 2, 0))
        .await?;
    let ids: Vec<_> = first.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![early.id, tie_a.id]);
    assert!(first.has_more);

    let second = store
        .fetch_ungrouped_batch(UngroupedQuery::new(cutoff, 2, 2))
        .await?;
    let ids: Vec<_> = second.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![tie_b.id, late.id]);
    assert!(!second.has_more);

    let vector = first.items[0].vector.clone().expect("vector");
    assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    assert_eq!(first.items[0].story_id.as_str(), "early");
    Ok(())
}

#[tokio::test]
async fn resume_cursor_is_stable_while_memberships_land() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;

    let mut inserted = Vec::new();
    for (idx, created_at) in [10, 20, 30, 40, 50].into_iter().enumerate() {
        inserted.push(insert(&store, &format!("story-{idx}"), created_at).await?);
    }
    let cutoff = Timestamp::from_micros(0);
    let first = store
        .fetch_ungrouped_batch(UngroupedQuery::resume(cutoff, 2, None))
        .await?;
    assert_eq!(first.items.len(), 2);

    // Consuming the first page shrinks the ungrouped view; a cursor keeps its place.
    for embedding in &first.items {
        store
            .create_singleton_group(CreateSingletonInput {
                embedding_id: embedding.id,
                centroid: vec![1.0, 0.0, 0.0],
            })
            .await?;
    }
    let after = first.items.last().map(|e| e.cursor());
    let second = store
        .fetch_ungrouped_batch(UngroupedQuery::resume(cutoff, 2, after))
        .await?;
    let ids: Vec<_> = second.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![inserted[2].id, inserted[3].id]);
    assert!(second.has_more);

    // A concurrent insert with an older timestamp than the cursor is not replayed.
    insert(&store, "backfill", 15).await?;
    let after = second.items.last().map(|e| e.cursor());
    let third = store
        .fetch_ungrouped_batch(UngroupedQuery::resume(cutoff, 2, after))
        .await?;
    let ids: Vec<_> = third.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![inserted[4].id]);
    assert!(!third.has_more);
    Ok(())
}

#[tokio::test]
async fn missing_vectors_read_back_as_none() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    store
        .insert_embedding(NewEmbedding {
            story_id: StoryId::new("empty"),
            vector: Vec::new(),
            created_at: None,
        })
        .await?;
    let page = store
        .fetch_ungrouped_batch(UngroupedQuery::new(Timestamp::from_micros(0), 10, 0))
        .await?;
    assert_eq!(page.items.len(), 1);
    assert!(page.items[0].vector.is_none());
    Ok(())
}

#[tokio::test]
async fn zero_limit_is_rejected() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    let result = store
        .fetch_ungrouped_batch(UngroupedQuery::new(Timestamp::from_micros(0), 0, 0))
        .await;
    assert!(result.is_err());
    Ok(())
}
