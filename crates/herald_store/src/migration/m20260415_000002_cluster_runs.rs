use sea_orm_migration::prelude::*;

use super::id_col;
use crate::db::HeraldClusterRuns;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .create_table(
                Table::create()
                    .table(HeraldClusterRuns::Table)
                    .if_not_exists()
                    .col(id_col(backend, HeraldClusterRuns::RunId, false))
                    .col(
                        ColumnDef::new(HeraldClusterRuns::StartedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::Threshold)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::LookbackDays)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::GroupsCreated)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::MembershipsCreated)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::EmbeddingsSkipped)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::Partial)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldClusterRuns::DurationMs)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_herald_cluster_runs")
                            .col(HeraldClusterRuns::RunId),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_herald_cluster_runs_started")
                    .table(HeraldClusterRuns::Table)
                    .col(HeraldClusterRuns::StartedAt)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(HeraldClusterRuns::Table).to_owned())
            .await?;
        Ok(())
    }
}
