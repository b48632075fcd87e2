use bridge_monitor_domain::storage::{CheckpointStore, StorageError, StorageResult};
use chrono::Utc;
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::entity::chain_checkpoints;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl CheckpointStore for SeaOrmStorage {
    async fn load_checkpoint(&self, chain: &str) -> StorageResult<Option<u64>> {
        let maybe = chain_checkpoints::Entity::find_by_id(chain.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe
            .map(|model| {
                u64::try_from(model.block_number).map_err(|_| StorageError::Corrupt {
                    key: chain.to_string(),
                    reason: format!("negative checkpoint {}", model.block_number),
                })
            })
            .transpose()
    }

    async fn save_checkpoint(&self, chain: &str, block: u64) -> StorageResult<()> {
        let block_number = i64::try_from(block).map_err(|_| {
            StorageError::Database(format!("checkpoint {block} exceeds BIGINT range"))
        })?;
        let active = chain_checkpoints::ActiveModel {
            chain: Set(chain.to_string()),
            block_number: Set(block_number),
            updated_at: Set(Utc::now()),
        };
        chain_checkpoints::Entity::insert(active)
            .on_conflict(
                OnConflict::column(chain_checkpoints::Column::Chain)
                    .update_columns([
                        chain_checkpoints::Column::BlockNumber,
                        chain_checkpoints::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}
