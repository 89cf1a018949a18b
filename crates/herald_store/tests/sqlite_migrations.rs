use std::collections::HashSet;

use herald_store::{ClusterError, ClusterResult, ClusterStore, HeraldConfig, load_schema_manifest};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tempfile::tempdir;

async fn list_names(store: &ClusterStore, kind: &str) -> ClusterResult<HashSet<String>> {
    let rows = store
        .connection()
        .query_all(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT name FROM sqlite_master WHERE type = '{kind}'"),
        ))
        .await
        .map_err(ClusterError::from)?;
    let mut names = HashSet::new();
    for row in rows {
        let name: String = row.try_get("", "name").map_err(ClusterError::from)?;
        names.insert(name);
    }
    Ok(names)
}

#[tokio::test]
async fn sqlite_migrations_create_clustering_tables() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    let tables = list_names(&store, "table").await?;
    for table in [
        "herald_embeddings",
        "herald_groups",
        "herald_memberships",
        "herald_cluster_runs",
    ] {
        assert!(tables.contains(table), "expected table '{table}' to exist");
    }
    // Idempotency check.
    let _store = ClusterStore::connect(&config, base).await?;
    Ok(())
}

#[tokio::test]
async fn migrations_match_schema_manifest() -> ClusterResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = HeraldConfig::default_sqlite(base.join("herald.sqlite").to_string_lossy());
    let store = ClusterStore::connect(&config, base).await?;
    let manifest = load_schema_manifest()?;

    let applied = store.applied_migrations().await?;
    assert_eq!(applied, manifest.migrations);

    let tables = list_names(&store, "table").await?;
    let indexes = list_names(&store, "index").await?;
    for table in &manifest.tables {
        assert!(tables.contains(&table.name), "missing table {}", table.name);
        for index in &table.indexes {
            assert!(indexes.contains(&index.name), "missing index {}", index.name);
        }
    }
    let memberships = manifest
        .tables
        .iter()
        .find(|table| table.name == "herald_memberships")
        .expect("memberships table in manifest");
    let unique: Vec<&str> = memberships
        .unique_indexes()
        .map(|index| index.name.as_str())
        .collect();
    assert_eq!(
        unique,
        vec![
            "ux_herald_memberships_group_embedding",
            "ux_herald_memberships_embedding"
        ]
    );
    Ok(())
}
