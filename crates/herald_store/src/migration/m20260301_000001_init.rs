use sea_orm_migration::prelude::*;

use super::id_col;
use crate::db::{HeraldEmbeddings, HeraldGroups, HeraldMemberships};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(HeraldEmbeddings::Table)
                    .if_not_exists()
                    .col(id_col(backend, HeraldEmbeddings::EmbeddingId, false))
                    .col(
                        ColumnDef::new(HeraldEmbeddings::StoryId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(HeraldEmbeddings::Vector).blob().null())
                    .col(
                        ColumnDef::new(HeraldEmbeddings::Dimension)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldEmbeddings::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_herald_embeddings")
                            .col(HeraldEmbeddings::EmbeddingId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_herald_embeddings_created")
                    .table(HeraldEmbeddings::Table)
                    .col(HeraldEmbeddings::CreatedAt)
                    .col(HeraldEmbeddings::EmbeddingId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HeraldGroups::Table)
                    .if_not_exists()
                    .col(id_col(backend, HeraldGroups::GroupId, false))
                    .col(ColumnDef::new(HeraldGroups::Centroid).blob().not_null())
                    .col(
                        ColumnDef::new(HeraldGroups::Dimension)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldGroups::MemberCount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldGroups::Status)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldGroups::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldGroups::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_herald_groups")
                            .col(HeraldGroups::GroupId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_herald_groups_status_created")
                    .table(HeraldGroups::Table)
                    .col(HeraldGroups::Status)
                    .col(HeraldGroups::CreatedAt)
                    .col(HeraldGroups::GroupId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(HeraldMemberships::Table)
                    .if_not_exists()
                    .col(id_col(backend, HeraldMemberships::MembershipId, false))
                    .col(id_col(backend, HeraldMemberships::GroupId, false))
                    .col(id_col(backend, HeraldMemberships::EmbeddingId, false))
                    .col(
                        ColumnDef::new(HeraldMemberships::Similarity)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HeraldMemberships::AddedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_herald_memberships")
                            .col(HeraldMemberships::MembershipId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ux_herald_memberships_group_embedding")
                    .table(HeraldMemberships::Table)
                    .col(HeraldMemberships::GroupId)
                    .col(HeraldMemberships::EmbeddingId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ux_herald_memberships_embedding")
                    .table(HeraldMemberships::Table)
                    .col(HeraldMemberships::EmbeddingId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(HeraldMemberships::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HeraldGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HeraldEmbeddings::Table).to_owned())
            .await?;
        Ok(())
    }
}
