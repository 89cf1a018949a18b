use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query;
use sea_orm::sea_query::{
    Alias, Cond, Expr, Func, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query,
    QueryStatementWriter, SqliteQueryBuilder, Value as SeaValue,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::HeraldConfig;
use crate::db::*;
use crate::migration::Migrator;
use herald_core::{
    ClusterError, ClusterResult, CountMismatch, CreateSingletonInput, DiagnosticsApi, Embedding,
    EmbeddingId, EmbeddingIngestApi, EmbeddingSource, Group, GroupCurationApi, GroupId,
    GroupRepository, GroupStatus, Id, IntegrityReport, JoinGroupInput, Membership, MembershipId,
    NewEmbedding, Page, RunHistoryApi, RunId, RunRecord, StoryId, Timestamp, UngroupedQuery,
    Vector,
};

/// Relational adapter for embeddings, groups, memberships and run history.
#[derive(Clone)]
pub struct ClusterStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    failpoints: HashSet<String>,
}

impl ClusterStore {
    pub async fn connect(config: &HeraldConfig, base_dir: &Path) -> ClusterResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await.map_err(ClusterError::from)?;
        let backend = conn.get_database_backend();
        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        let store = Self {
            conn,
            backend,
            failpoints,
        };
        Migrator::up(&store.conn, None)
            .await
            .map_err(ClusterError::from)?;
        log::debug!(
            "herald.store: connected backend={}",
            config.backend_name()
        );
        Ok(store)
    }

    pub async fn connect_sqlite(path: &Path) -> ClusterResult<Self> {
        let config = HeraldConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    fn maybe_failpoint(&self, key: &str) -> ClusterResult<()> {
        if self.failpoints.contains(key) {
            Err(ClusterError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            DatabaseBackend::Sqlite => "sqlite",
            DatabaseBackend::Postgres => "postgres",
            DatabaseBackend::MySql => "mysql",
        }
    }

    pub async fn ping(&self) -> ClusterResult<()> {
        self.conn.ping().await?;
        Ok(())
    }

    /// Names of migrations recorded as applied, oldest first.
    pub async fn applied_migrations(&self) -> ClusterResult<Vec<String>> {
        let applied = Migrator::get_applied_migrations(&self.conn).await?;
        Ok(applied
            .iter()
            .map(|migration| migration.name().to_string())
            .collect())
    }

    async fn read_group_conn<C: ConnectionTrait>(
        &self,
        conn: &C,
        group_id: GroupId,
    ) -> ClusterResult<Option<Group>> {
        let select = group_select()
            .and_where(Expr::col(HeraldGroups::GroupId).eq(id_value(self.backend, group_id.0)))
            .to_owned();
        match query_one(conn, &select).await? {
            Some(row) => Ok(Some(read_group(&row)?)),
            None => Ok(None),
        }
    }

    /// Explain why a guarded group update touched no row.
    async fn rejected_group_update(&self, group_id: GroupId) -> ClusterError {
        match self.read_group_conn(&self.conn, group_id).await {
            Ok(None) => ClusterError::not_found(format!("group {group_id}")),
            Ok(Some(group)) if !group.is_active() => {
                ClusterError::conflict(format!("group {group_id} is {}", group.status.as_str()))
            }
            Ok(Some(group)) => ClusterError::conflict(format!(
                "group {group_id} member count moved to {}",
                group.member_count
            )),
            Err(err) => err,
        }
    }

    async fn count_embeddings(&self) -> ClusterResult<u64> {
        let select = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("row_count"))
            .from(HeraldEmbeddings::Table)
            .to_owned();
        let row = query_one(&self.conn, &select).await?;
        let count = match row {
            Some(row) => row.try_get::<i64>("", "row_count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn count_ungrouped(&self) -> ClusterResult<u64> {
        let select = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("row_count"))
            .from(HeraldEmbeddings::Table)
            .left_join(
                HeraldMemberships::Table,
                Expr::col((HeraldMemberships::Table, HeraldMemberships::EmbeddingId))
                    .equals((HeraldEmbeddings::Table, HeraldEmbeddings::EmbeddingId)),
            )
            .and_where(
                Expr::col((HeraldMemberships::Table, HeraldMemberships::MembershipId)).is_null(),
            )
            .to_owned();
        let row = query_one(&self.conn, &select).await?;
        let count = match row {
            Some(row) => row.try_get::<i64>("", "row_count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl EmbeddingSource for ClusterStore {
    async fn fetch_ungrouped_batch(&self, query: UngroupedQuery) -> ClusterResult<Page<Embedding>> {
        if query.limit == 0 {
            return Err(ClusterError::invalid("ungrouped batch limit must be positive"));
        }
        self.maybe_failpoint("fetch_ungrouped_batch")?;
        let created_col = (HeraldEmbeddings::Table, HeraldEmbeddings::CreatedAt);
        let id_col = (HeraldEmbeddings::Table, HeraldEmbeddings::EmbeddingId);
        let mut filter = Cond::all()
            .add(Expr::col((HeraldMemberships::Table, HeraldMemberships::MembershipId)).is_null())
            .add(Expr::col(created_col).gte(query.cutoff.as_micros()));
        if let Some(after) = query.after {
            let after_created = after.created_at.as_micros();
            filter = filter.add(
                Cond::any()
                    .add(Expr::col(created_col).gt(after_created))
                    .add(
                        Cond::all()
                            .add(Expr::col(created_col).eq(after_created))
                            .add(
                                Expr::col(id_col)
                                    .gt(id_value(self.backend, after.embedding_id.0)),
                            ),
                    ),
            );
        }
        let select = Query::select()
            .column(id_col)
            .column((HeraldEmbeddings::Table, HeraldEmbeddings::StoryId))
            .column((HeraldEmbeddings::Table, HeraldEmbeddings::Vector))
            .column(created_col)
            .from(HeraldEmbeddings::Table)
            .left_join(
                HeraldMemberships::Table,
                Expr::col((HeraldMemberships::Table, HeraldMemberships::EmbeddingId))
                    .equals(id_col),
            )
            .cond_where(filter)
            .order_by(created_col, Order::Asc)
            .order_by(id_col, Order::Asc)
            .limit(query.limit as u64 + 1)
            .offset(query.offset)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(read_embedding(&row)?);
        }
        Ok(Page::from_overfetch(items, query.limit))
    }
}

#[async_trait]
impl GroupRepository for ClusterStore {
    async fn fetch_active_group_ids(
        &self,
        cutoff: Timestamp,
        limit: u32,
        offset: u64,
    ) -> ClusterResult<Page<GroupId>> {
        if limit == 0 {
            return Err(ClusterError::invalid("group id page size must be positive"));
        }
        self.maybe_failpoint("fetch_active_group_ids")?;
        let select = Query::select()
            .column(HeraldGroups::GroupId)
            .from(HeraldGroups::Table)
            .and_where(Expr::col(HeraldGroups::Status).eq(GroupStatus::Active.as_i16()))
            .and_where(Expr::col(HeraldGroups::CreatedAt).gte(cutoff.as_micros()))
            .order_by(HeraldGroups::CreatedAt, Order::Asc)
            .order_by(HeraldGroups::GroupId, Order::Asc)
            .limit(limit as u64 + 1)
            .offset(offset)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(GroupId(read_id(&row, HeraldGroups::GroupId)?));
        }
        Ok(Page::from_overfetch(ids, limit))
    }

    async fn fetch_groups_by_ids(&self, ids: &[GroupId]) -> ClusterResult<Vec<Group>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.maybe_failpoint("fetch_groups_by_ids")?;
        let select = group_select()
            .and_where(
                Expr::col(HeraldGroups::GroupId)
                    .is_in(ids.iter().map(|id| id_value(self.backend, id.0))),
            )
            .order_by(HeraldGroups::GroupId, Order::Asc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            match read_group(row) {
                Ok(group) => groups.push(group),
                Err(err) => log::warn!("herald.store: skipping unreadable group row: {err}"),
            }
        }
        Ok(groups)
    }

    async fn create_group(&self, centroid: Vec<f32>) -> ClusterResult<GroupId> {
        self.maybe_failpoint("create_group")?;
        let group = new_group(Vector::new(centroid)?.into_inner());
        insert_group(&self.conn, self.backend, &group).await?;
        Ok(group.id)
    }

    async fn add_membership(
        &self,
        group_id: GroupId,
        embedding_id: EmbeddingId,
        similarity: f64,
    ) -> ClusterResult<()> {
        self.maybe_failpoint("add_membership")?;
        let membership = new_membership(group_id, embedding_id, similarity);
        insert_membership(&self.conn, self.backend, &membership).await
    }

    async fn update_centroid(
        &self,
        group_id: GroupId,
        new_centroid: Vec<f32>,
        new_member_count: u32,
    ) -> ClusterResult<()> {
        self.maybe_failpoint("update_centroid")?;
        let update = centroid_update(&new_centroid, new_member_count)
            .and_where(Expr::col(HeraldGroups::GroupId).eq(id_value(self.backend, group_id.0)))
            .and_where(Expr::col(HeraldGroups::Status).eq(GroupStatus::Active.as_i16()))
            .to_owned();
        if exec_affected(&self.conn, &update).await? == 0 {
            return Err(self.rejected_group_update(group_id).await);
        }
        Ok(())
    }

    async fn join_group(&self, input: JoinGroupInput) -> ClusterResult<()> {
        let tx = self.conn.begin().await?;
        let membership = new_membership(input.group_id, input.embedding_id, input.similarity);
        insert_membership(&tx, self.backend, &membership).await?;
        self.maybe_failpoint("join_group.after_membership")?;
        let update = centroid_update(&input.new_centroid, input.expected_member_count + 1)
            .and_where(
                Expr::col(HeraldGroups::GroupId).eq(id_value(self.backend, input.group_id.0)),
            )
            .and_where(Expr::col(HeraldGroups::Status).eq(GroupStatus::Active.as_i16()))
            .and_where(
                Expr::col(HeraldGroups::MemberCount).eq(input.expected_member_count as i64),
            )
            .to_owned();
        if exec_affected(&tx, &update).await? == 0 {
            tx.rollback().await?;
            return Err(self.rejected_group_update(input.group_id).await);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_singleton_group(&self, input: CreateSingletonInput) -> ClusterResult<Group> {
        let group = new_group(Vector::new(input.centroid)?.into_inner());
        let tx = self.conn.begin().await?;
        insert_group(&tx, self.backend, &group).await?;
        self.maybe_failpoint("create_singleton_group.after_group")?;
        let membership = new_membership(group.id, input.embedding_id, 1.0);
        insert_membership(&tx, self.backend, &membership).await?;
        tx.commit().await?;
        Ok(group)
    }

    async fn membership_owner(&self, embedding_id: EmbeddingId) -> ClusterResult<Option<GroupId>> {
        self.maybe_failpoint("membership_owner")?;
        owner_of(&self.conn, self.backend, embedding_id).await
    }
}

#[async_trait]
impl EmbeddingIngestApi for ClusterStore {
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
        let (blob, dimension) = match &embedding.vector {
            Some(values) => (
                SeaValue::Bytes(Some(Box::new(encode_vector(values)))),
                values.len() as i64,
            ),
            None => (SeaValue::Bytes(None), 0),
        };
        let insert = Query::insert()
            .into_table(HeraldEmbeddings::Table)
            .columns([
                HeraldEmbeddings::EmbeddingId,
                HeraldEmbeddings::StoryId,
                HeraldEmbeddings::Vector,
                HeraldEmbeddings::Dimension,
                HeraldEmbeddings::CreatedAt,
            ])
            .values_panic([
                id_value(self.backend, embedding.id.0).into(),
                embedding.story_id.as_str().into(),
                blob.into(),
                dimension.into(),
                embedding.created_at.as_micros().into(),
            ])
            .to_owned();
        exec(&self.conn, &insert).await?;
        Ok(embedding)
    }
}

#[async_trait]
impl GroupCurationApi for ClusterStore {
    async fn set_group_status(&self, group_id: GroupId, status: GroupStatus) -> ClusterResult<()> {
        let current = self
            .read_group_conn(&self.conn, group_id)
            .await?
            .ok_or_else(|| ClusterError::not_found(format!("group {group_id}")))?;
        if current.status == status {
            return Ok(());
        }
        if !current.is_active() {
            return Err(ClusterError::conflict(format!(
                "group {group_id} is {} and cannot become {}",
                current.status.as_str(),
                status.as_str()
            )));
        }
        let update = Query::update()
            .table(HeraldGroups::Table)
            .values([
                (HeraldGroups::Status, status.as_i16().into()),
                (HeraldGroups::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(HeraldGroups::GroupId).eq(id_value(self.backend, group_id.0)))
            .and_where(Expr::col(HeraldGroups::Status).eq(GroupStatus::Active.as_i16()))
            .to_owned();
        if exec_affected(&self.conn, &update).await? == 0 {
            return Err(self.rejected_group_update(group_id).await);
        }
        log::info!("herald.store: group {group_id} marked {}", status.as_str());
        Ok(())
    }

    async fn list_group_members(&self, group_id: GroupId) -> ClusterResult<Vec<Membership>> {
        if self.read_group_conn(&self.conn, group_id).await?.is_none() {
            return Err(ClusterError::not_found(format!("group {group_id}")));
        }
        let select = Query::select()
            .columns([
                HeraldMemberships::MembershipId,
                HeraldMemberships::GroupId,
                HeraldMemberships::EmbeddingId,
                HeraldMemberships::Similarity,
                HeraldMemberships::AddedAt,
            ])
            .from(HeraldMemberships::Table)
            .and_where(
                Expr::col(HeraldMemberships::GroupId).eq(id_value(self.backend, group_id.0)),
            )
            .order_by(HeraldMemberships::AddedAt, Order::Asc)
            .order_by(HeraldMemberships::MembershipId, Order::Asc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(read_membership).collect()
    }
}

#[async_trait]
impl DiagnosticsApi for ClusterStore {
    async fn check_integrity(&self) -> ClusterResult<IntegrityReport> {
        let groups = Query::select()
            .columns([HeraldGroups::GroupId, HeraldGroups::MemberCount])
            .from(HeraldGroups::Table)
            .order_by(HeraldGroups::GroupId, Order::Asc)
            .to_owned();
        let group_rows = query_all(&self.conn, &groups).await?;

        let per_group = Query::select()
            .column(HeraldMemberships::GroupId)
            .expr_as(
                Func::count(Expr::col(HeraldMemberships::MembershipId)),
                Alias::new("membership_rows"),
            )
            .from(HeraldMemberships::Table)
            .group_by_col(HeraldMemberships::GroupId)
            .to_owned();
        let mut membership_rows: HashMap<GroupId, i64> = HashMap::new();
        for row in query_all(&self.conn, &per_group).await? {
            let group_id = GroupId(read_id(&row, HeraldMemberships::GroupId)?);
            membership_rows.insert(group_id, row.try_get::<i64>("", "membership_rows")?);
        }

        let mut count_mismatches = Vec::new();
        for row in &group_rows {
            let group_id = GroupId(read_id(row, HeraldGroups::GroupId)?);
            let member_count: i64 = row.try_get("", &col_name(HeraldGroups::MemberCount))?;
            let rows = membership_rows.get(&group_id).copied().unwrap_or(0);
            if rows != member_count {
                count_mismatches.push(CountMismatch {
                    group_id,
                    member_count: member_count.max(0) as u32,
                    membership_rows: rows.max(0) as u32,
                });
            }
        }

        let multi = Query::select()
            .column(HeraldMemberships::EmbeddingId)
            .from(HeraldMemberships::Table)
            .group_by_col(HeraldMemberships::EmbeddingId)
            .and_having(
                Expr::expr(Func::count(Expr::col(HeraldMemberships::MembershipId))).gt(1),
            )
            .to_owned();
        let mut multi_assigned = Vec::new();
        for row in query_all(&self.conn, &multi).await? {
            multi_assigned.push(EmbeddingId(read_id(&row, HeraldMemberships::EmbeddingId)?));
        }
        multi_assigned.sort();

        let report = IntegrityReport {
            groups_checked: group_rows.len() as u64,
            embeddings_total: self.count_embeddings().await?,
            embeddings_ungrouped: self.count_ungrouped().await?,
            count_mismatches,
            multi_assigned,
        };
        if !report.is_consistent() {
            log::warn!(
                "herald.store: integrity check found {} count mismatches and {} multi-assigned embeddings",
                report.count_mismatches.len(),
                report.multi_assigned.len()
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl RunHistoryApi for ClusterStore {
    async fn record_run(&self, record: RunRecord) -> ClusterResult<()> {
        let insert = Query::insert()
            .into_table(HeraldClusterRuns::Table)
            .columns([
                HeraldClusterRuns::RunId,
                HeraldClusterRuns::StartedAt,
                HeraldClusterRuns::Threshold,
                HeraldClusterRuns::LookbackDays,
                HeraldClusterRuns::GroupsCreated,
                HeraldClusterRuns::MembershipsCreated,
                HeraldClusterRuns::EmbeddingsSkipped,
                HeraldClusterRuns::Partial,
                HeraldClusterRuns::DurationMs,
            ])
            .values_panic([
                id_value(self.backend, record.run_id.0).into(),
                record.started_at.as_micros().into(),
                record.threshold.into(),
                (record.lookback_days as i64).into(),
                (record.groups_created as i64).into(),
                (record.memberships_created as i64).into(),
                (record.embeddings_skipped as i64).into(),
                record.partial.into(),
                (record.duration_ms as i64).into(),
            ])
            .to_owned();
        exec(&self.conn, &insert).await
    }

    async fn list_runs(&self, limit: u32) -> ClusterResult<Vec<RunRecord>> {
        let select = Query::select()
            .columns([
                HeraldClusterRuns::RunId,
                HeraldClusterRuns::StartedAt,
                HeraldClusterRuns::Threshold,
                HeraldClusterRuns::LookbackDays,
                HeraldClusterRuns::GroupsCreated,
                HeraldClusterRuns::MembershipsCreated,
                HeraldClusterRuns::EmbeddingsSkipped,
                HeraldClusterRuns::Partial,
                HeraldClusterRuns::DurationMs,
            ])
            .from(HeraldClusterRuns::Table)
            .order_by(HeraldClusterRuns::StartedAt, Order::Desc)
            .order_by(HeraldClusterRuns::RunId, Order::Desc)
            .limit(limit as u64)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(read_run).collect()
    }
}

fn new_group(centroid: Vec<f32>) -> Group {
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

fn new_membership(group_id: GroupId, embedding_id: EmbeddingId, similarity: f64) -> Membership {
    Membership {
        id: MembershipId::new(),
        group_id,
        embedding_id,
        similarity,
        added_at: Timestamp::now(),
    }
}

fn group_select() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            HeraldGroups::GroupId,
            HeraldGroups::Centroid,
            HeraldGroups::MemberCount,
            HeraldGroups::Status,
            HeraldGroups::CreatedAt,
            HeraldGroups::UpdatedAt,
        ])
        .from(HeraldGroups::Table)
        .to_owned()
}

fn centroid_update(centroid: &[f32], member_count: u32) -> sea_query::UpdateStatement {
    Query::update()
        .table(HeraldGroups::Table)
        .values([
            (HeraldGroups::Centroid, encode_vector(centroid).into()),
            (HeraldGroups::Dimension, (centroid.len() as i64).into()),
            (HeraldGroups::MemberCount, (member_count as i64).into()),
            (HeraldGroups::UpdatedAt, Timestamp::now().as_micros().into()),
        ])
        .to_owned()
}

async fn insert_group<C: ConnectionTrait>(
    conn: &C,
    backend: DatabaseBackend,
    group: &Group,
) -> ClusterResult<()> {
    let insert = Query::insert()
        .into_table(HeraldGroups::Table)
        .columns([
            HeraldGroups::GroupId,
            HeraldGroups::Centroid,
            HeraldGroups::Dimension,
            HeraldGroups::MemberCount,
            HeraldGroups::Status,
            HeraldGroups::CreatedAt,
            HeraldGroups::UpdatedAt,
        ])
        .values_panic([
            id_value(backend, group.id.0).into(),
            encode_vector(&group.centroid).into(),
            (group.centroid.len() as i64).into(),
            (group.member_count as i64).into(),
            group.status.as_i16().into(),
            group.created_at.as_micros().into(),
            group.updated_at.as_micros().into(),
        ])
        .to_owned();
    exec(conn, &insert).await
}

async fn owner_of<C: ConnectionTrait>(
    conn: &C,
    backend: DatabaseBackend,
    embedding_id: EmbeddingId,
) -> ClusterResult<Option<GroupId>> {
    let select = Query::select()
        .column(HeraldMemberships::GroupId)
        .from(HeraldMemberships::Table)
        .and_where(Expr::col(HeraldMemberships::EmbeddingId).eq(id_value(backend, embedding_id.0)))
        .limit(1)
        .to_owned();
    match query_one(conn, &select).await? {
        Some(row) => Ok(Some(GroupId(read_id(&row, HeraldMemberships::GroupId)?))),
        None => Ok(None),
    }
}

/// Insert a membership row, refusing an embedding that already belongs to a group.
async fn insert_membership<C: ConnectionTrait>(
    conn: &C,
    backend: DatabaseBackend,
    membership: &Membership,
) -> ClusterResult<()> {
    if let Some(owner) = owner_of(conn, backend, membership.embedding_id).await? {
        return Err(ClusterError::duplicate_membership(format!(
            "embedding {} already belongs to group {owner}",
            membership.embedding_id
        )));
    }
    let insert = Query::insert()
        .into_table(HeraldMemberships::Table)
        .columns([
            HeraldMemberships::MembershipId,
            HeraldMemberships::GroupId,
            HeraldMemberships::EmbeddingId,
            HeraldMemberships::Similarity,
            HeraldMemberships::AddedAt,
        ])
        .values_panic([
            id_value(backend, membership.id.0).into(),
            id_value(backend, membership.group_id.0).into(),
            id_value(backend, membership.embedding_id.0).into(),
            membership.similarity.into(),
            membership.added_at.as_micros().into(),
        ])
        .to_owned();
    exec(conn, &insert).await
}

fn read_embedding(row: &QueryResult) -> ClusterResult<Embedding> {
    let id = EmbeddingId(read_id(row, HeraldEmbeddings::EmbeddingId)?);
    let story_id: String = row.try_get("", &col_name(HeraldEmbeddings::StoryId))?;
    let blob: Option<Vec<u8>> = row.try_get("", &col_name(HeraldEmbeddings::Vector))?;
    let created_at: i64 = row.try_get("", &col_name(HeraldEmbeddings::CreatedAt))?;
    let vector = blob
        .and_then(|bytes| decode_vector(&bytes))
        .filter(|values| !values.is_empty());
    Ok(Embedding {
        id,
        story_id: StoryId(story_id),
        vector,
        created_at: Timestamp::from_micros(created_at),
    })
}

fn read_group(row: &QueryResult) -> ClusterResult<Group> {
    let id = GroupId(read_id(row, HeraldGroups::GroupId)?);
    let blob: Vec<u8> = row.try_get("", &col_name(HeraldGroups::Centroid))?;
    let centroid = decode_vector(&blob)
        .ok_or_else(|| ClusterError::storage(format!("group {id} centroid is not decodable")))?;
    let member_count: i64 = row.try_get("", &col_name(HeraldGroups::MemberCount))?;
    let status: i16 = row.try_get("", &col_name(HeraldGroups::Status))?;
    let status = GroupStatus::from_i16(status)
        .ok_or_else(|| ClusterError::storage(format!("group {id} has unknown status {status}")))?;
    let created_at: i64 = row.try_get("", &col_name(HeraldGroups::CreatedAt))?;
    let updated_at: i64 = row.try_get("", &col_name(HeraldGroups::UpdatedAt))?;
    Ok(Group {
        id,
        centroid,
        member_count: member_count.max(0) as u32,
        status,
        created_at: Timestamp::from_micros(created_at),
        updated_at: Timestamp::from_micros(updated_at),
    })
}

fn read_membership(row: &QueryResult) -> ClusterResult<Membership> {
    Ok(Membership {
        id: MembershipId(read_id(row, HeraldMemberships::MembershipId)?),
        group_id: GroupId(read_id(row, HeraldMemberships::GroupId)?),
        embedding_id: EmbeddingId(read_id(row, HeraldMemberships::EmbeddingId)?),
        similarity: row.try_get("", &col_name(HeraldMemberships::Similarity))?,
        added_at: Timestamp::from_micros(
            row.try_get("", &col_name(HeraldMemberships::AddedAt))?,
        ),
    })
}

fn read_run(row: &QueryResult) -> ClusterResult<RunRecord> {
    let count = |column: HeraldClusterRuns| -> ClusterResult<u64> {
        let value: i64 = row.try_get("", &col_name(column))?;
        Ok(value.max(0) as u64)
    };
    Ok(RunRecord {
        run_id: RunId(read_id(row, HeraldClusterRuns::RunId)?),
        started_at: Timestamp::from_micros(
            row.try_get("", &col_name(HeraldClusterRuns::StartedAt))?,
        ),
        threshold: row.try_get("", &col_name(HeraldClusterRuns::Threshold))?,
        lookback_days: count(HeraldClusterRuns::LookbackDays)? as u32,
        groups_created: count(HeraldClusterRuns::GroupsCreated)?,
        memberships_created: count(HeraldClusterRuns::MembershipsCreated)?,
        embeddings_skipped: count(HeraldClusterRuns::EmbeddingsSkipped)?,
        partial: row.try_get("", &col_name(HeraldClusterRuns::Partial))?,
        duration_ms: count(HeraldClusterRuns::DurationMs)?,
    })
}

fn id_value(backend: DatabaseBackend, id: Id) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => {
            let uuid = Uuid::from_bytes(id.as_bytes());
            SeaValue::from(uuid)
        }
        DatabaseBackend::MySql => SeaValue::from(id.as_vec()),
        DatabaseBackend::Sqlite => SeaValue::from(id.to_uuid_string()),
    }
}

fn bytes_to_id(bytes: Vec<u8>) -> Option<Id> {
    if bytes.len() == 16 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes);
        Some(Id::from_bytes(buf))
    } else {
        None
    }
}

fn read_id(row: &QueryResult, column: impl sea_query::Iden) -> ClusterResult<Id> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<String>("", &name) {
        return Id::from_uuid_str(&value);
    }
    if let Ok(value) = row.try_get::<Uuid>("", &name) {
        return Ok(Id::from_bytes(*value.as_bytes()));
    }
    if let Ok(value) = row.try_get::<Vec<u8>>("", &name) {
        return bytes_to_id(value).ok_or_else(|| ClusterError::storage("invalid id length"));
    }
    Err(ClusterError::storage("unsupported id format"))
}

fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

async fn exec<C, S>(conn: &C, stmt: &S) -> ClusterResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    exec_affected(conn, stmt).await?;
    Ok(())
}

async fn exec_affected<C, S>(conn: &C, stmt: &S) -> ClusterResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

async fn query_all<C, S>(conn: &C, stmt: &S) -> ClusterResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

async fn query_one<C, S>(conn: &C, stmt: &S) -> ClusterResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

fn build_connection_url(config: &HeraldConfig, base_dir: &Path) -> ClusterResult<String> {
    match &config.database {
        crate::DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        crate::DatabaseConfig::Postgres { url } => Ok(url.clone()),
        crate::DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}
