use sea_orm::sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{chain_checkpoints, transfers};
use bridge_monitor_domain::storage::{StorageError, StorageResult};

/// Decimal digits of `u64::MAX`.
const AMOUNT_DIGITS: u32 = 20;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let transfers_table = Table::create()
        .if_not_exists()
        .table(transfers::Entity)
        .col(
            ColumnDef::new(transfers::Column::TransferId)
                .string_len(66)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(transfers::Column::CreatedTime)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(transfers::Column::ChainA).string().not_null())
        .col(
            ColumnDef::new(transfers::Column::ActionA)
                .string_len(8)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfers::Column::AmountA)
                .string_len(AMOUNT_DIGITS)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfers::Column::TxHashA)
                .string_len(66)
                .not_null(),
        )
        .col(ColumnDef::new(transfers::Column::ChainB).string().null())
        .col(ColumnDef::new(transfers::Column::ActionB).string_len(8).null())
        .col(
            ColumnDef::new(transfers::Column::AmountB)
                .string_len(AMOUNT_DIGITS)
                .null(),
        )
        .col(ColumnDef::new(transfers::Column::TxHashB).string_len(66).null())
        .col(
            ColumnDef::new(transfers::Column::IsMatched)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(transfers::Column::RecordedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(transfers::Column::CompletedAt)
                .date_time()
                .null(),
        )
        .to_owned();
    create_table(db, backend, transfers_table).await?;

    let unmatched_index = Index::create()
        .if_not_exists()
        .name("idx_transfers_is_matched")
        .table(transfers::Entity)
        .col(transfers::Column::IsMatched)
        .to_owned();
    create_index(db, backend, unmatched_index).await?;

    let checkpoints_table = Table::create()
        .if_not_exists()
        .table(chain_checkpoints::Entity)
        .col(
            ColumnDef::new(chain_checkpoints::Column::Chain)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(chain_checkpoints::Column::BlockNumber)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(chain_checkpoints::Column::UpdatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, checkpoints_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    statement: IndexCreateStatement,
) -> StorageResult<()> {
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
