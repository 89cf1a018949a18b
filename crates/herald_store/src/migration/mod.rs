use sea_orm_migration::prelude::*;

mod m20260301_000001_init;
mod m20260415_000002_cluster_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_init::Migration),
            Box::new(m20260415_000002_cluster_runs::Migration),
        ]
    }
}

pub(crate) fn id_col(
    backend: sea_orm_migration::sea_orm::DatabaseBackend,
    col: impl Iden + 'static,
    nullable: bool,
) -> ColumnDef {
    use sea_orm_migration::sea_orm::DatabaseBackend;

    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Postgres => {
            col_def.uuid();
        }
        DatabaseBackend::MySql => {
            col_def.binary_len(16);
        }
        DatabaseBackend::Sqlite => {
            col_def.string_len(36);
        }
    }
    if nullable {
        col_def.null();
    } else {
        col_def.not_null();
    }
    col_def.to_owned()
}
