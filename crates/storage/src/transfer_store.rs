use bridge_monitor_domain::model::{LegAction, LegDetail, TransferId, TransferRecord};
use bridge_monitor_domain::storage::{StorageError, StorageResult, TransferStore};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::transfers;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl TransferStore for SeaOrmStorage {
    async fn find_transfer(&self, id: &TransferId) -> StorageResult<Option<TransferRecord>> {
        let maybe = transfers::Entity::find_by_id(id.as_str().to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(transfer_to_record).transpose()
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> StorageResult<bool> {
        let model = transfers::ActiveModel {
            transfer_id: Set(record.transfer_id.as_str().to_string()),
            created_time: Set(to_db_int(record.timestamp, "created_time")?),
            chain_a: Set(record.leg_a.chain.clone()),
            action_a: Set(record.leg_a.action.to_string()),
            amount_a: Set(record.leg_a.amount.to_string()),
            tx_hash_a: Set(record.leg_a.tx_hash.clone()),
            chain_b: Set(None),
            action_b: Set(None),
            amount_b: Set(None),
            tx_hash_b: Set(None),
            is_matched: Set(false),
            recorded_at: Set(Utc::now()),
            completed_at: Set(None),
        };

        let inserted = transfers::Entity::insert(model)
            .on_conflict(
                OnConflict::column(transfers::Column::TransferId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(inserted == 1)
    }

    async fn complete_transfer(&self, record: &TransferRecord) -> StorageResult<bool> {
        let Some(leg_b) = record.leg_b.as_ref() else {
            return Err(StorageError::Database(format!(
                "transfer {} has no second leg to persist",
                record.transfer_id
            )));
        };
        let leg_a = &record.leg_a;

        // Guarded on `chain_b IS NULL`: leg A is only ever written by insert
        // while the row is half-filled, so this acts as a compare-and-swap.
        let result = transfers::Entity::update_many()
            .col_expr(transfers::Column::ChainA, Expr::value(leg_a.chain.clone()))
            .col_expr(transfers::Column::ActionA, Expr::value(leg_a.action.to_string()))
            .col_expr(transfers::Column::AmountA, Expr::value(leg_a.amount.to_string()))
            .col_expr(transfers::Column::TxHashA, Expr::value(leg_a.tx_hash.clone()))
            .col_expr(transfers::Column::ChainB, Expr::value(leg_b.chain.clone()))
            .col_expr(transfers::Column::ActionB, Expr::value(leg_b.action.to_string()))
            .col_expr(transfers::Column::AmountB, Expr::value(leg_b.amount.to_string()))
            .col_expr(transfers::Column::TxHashB, Expr::value(leg_b.tx_hash.clone()))
            .col_expr(transfers::Column::IsMatched, Expr::value(record.is_matched))
            .col_expr(transfers::Column::CompletedAt, Expr::value(Utc::now()))
            .filter(transfers::Column::TransferId.eq(record.transfer_id.as_str()))
            .filter(transfers::Column::ChainB.is_null())
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected == 1)
    }

    async fn find_unmatched(&self) -> StorageResult<Vec<TransferRecord>> {
        transfers::Entity::find()
            .filter(transfers::Column::IsMatched.eq(false))
            .order_by_asc(transfers::Column::CreatedTime)
            .order_by_asc(transfers::Column::TransferId)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(transfer_to_record)
            .collect()
    }
}

fn to_db_int(value: u64, column: &str) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Database(format!("{column} value {value} exceeds BIGINT range")))
}

fn from_db_int(value: i64, key: &str, column: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("negative {column}: {value}"),
    })
}

fn parse_amount(raw: &str, key: &str, column: &str) -> StorageResult<u64> {
    raw.parse().map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("{column} is not an amount: `{raw}`"),
    })
}

fn parse_action(raw: &str, key: &str) -> StorageResult<LegAction> {
    raw.parse().map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("unknown action `{raw}`"),
    })
}

fn transfer_to_record(model: transfers::Model) -> StorageResult<TransferRecord> {
    let key = model.transfer_id.clone();
    let transfer_id = TransferId::parse(&model.transfer_id).map_err(|err| StorageError::Corrupt {
        key: key.clone(),
        reason: err.to_string(),
    })?;

    let leg_a = LegDetail {
        chain: model.chain_a,
        action: parse_action(&model.action_a, &key)?,
        amount: parse_amount(&model.amount_a, &key, "amount_a")?,
        tx_hash: model.tx_hash_a,
    };

    let leg_b = match (model.chain_b, model.action_b, model.amount_b, model.tx_hash_b) {
        (Some(chain), Some(action), Some(amount), Some(tx_hash)) => Some(LegDetail {
            chain,
            action: parse_action(&action, &key)?,
            amount: parse_amount(&amount, &key, "amount_b")?,
            tx_hash,
        }),
        (None, None, None, None) => None,
        _ => {
            return Err(StorageError::Corrupt {
                key,
                reason: "second leg is partially populated".into(),
            })
        }
    };

    Ok(TransferRecord {
        transfer_id,
        timestamp: from_db_int(model.created_time, &key, "created_time")?,
        leg_a,
        leg_b,
        is_matched: model.is_matched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_monitor_domain::model::TransferLeg;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("storage inits")
    }

    fn transfer_id(last: u8) -> TransferId {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        TransferId::from_bytes(&bytes)
    }

    fn leg(id: &TransferId, chain: &str, action: LegAction, amount: u64, tx: &str) -> TransferLeg {
        TransferLeg {
            transfer_id: id.clone(),
            chain: chain.to_string(),
            action,
            amount,
            created_time: 1_700_000_000,
            tx_hash: tx.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_is_insert_if_absent() {
        let storage = storage().await;
        let id = transfer_id(1);
        let first = TransferRecord::from_first_leg(&leg(&id, "Ethereum", LegAction::Burn, 10, "0xa"));
        let other = TransferRecord::from_first_leg(&leg(&id, "BSC", LegAction::Mint, 10, "0xb"));

        assert!(storage.insert_transfer(&first).await.unwrap());
        assert!(!storage.insert_transfer(&other).await.unwrap());

        let stored = storage.find_transfer(&id).await.unwrap().expect("row exists");
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn complete_applies_once() {
        let storage = storage().await;
        let id = transfer_id(2);
        let burn = leg(&id, "Ethereum", LegAction::Burn, 10, "0xa");
        let pending = TransferRecord::from_first_leg(&burn);
        storage.insert_transfer(&pending).await.unwrap();

        let completed = pending.with_second_leg(leg(&id, "BSC", LegAction::Mint, 10, "0xb").detail());
        assert!(storage.complete_transfer(&completed).await.unwrap());

        let conflicting =
            pending.with_second_leg(leg(&id, "Polygon", LegAction::Mint, 10, "0xc").detail());
        assert!(!storage.complete_transfer(&conflicting).await.unwrap());

        let stored = storage.find_transfer(&id).await.unwrap().expect("row exists");
        assert_eq!(stored, completed);
        assert!(stored.is_matched);
    }

    #[tokio::test]
    async fn unmatched_query_covers_pending_and_mismatched() {
        let storage = storage().await;

        let pending_id = transfer_id(3);
        let pending = TransferRecord::from_first_leg(&leg(
            &pending_id,
            "Ethereum",
            LegAction::Burn,
            10,
            "0xa",
        ));
        storage.insert_transfer(&pending).await.unwrap();

        let mismatched_id = transfer_id(4);
        let half = TransferRecord::from_first_leg(&leg(
            &mismatched_id,
            "Ethereum",
            LegAction::Burn,
            10,
            "0xb",
        ));
        storage.insert_transfer(&half).await.unwrap();
        let mismatched =
            half.with_second_leg(leg(&mismatched_id, "BSC", LegAction::Mint, 9, "0xc").detail());
        storage.complete_transfer(&mismatched).await.unwrap();

        let matched_id = transfer_id(5);
        let half = TransferRecord::from_first_leg(&leg(
            &matched_id,
            "Ethereum",
            LegAction::Burn,
            10,
            "0xd",
        ));
        storage.insert_transfer(&half).await.unwrap();
        storage
            .complete_transfer(
                &half.with_second_leg(leg(&matched_id, "BSC", LegAction::Mint, 10, "0xe").detail()),
            )
            .await
            .unwrap();

        let unmatched = storage.find_unmatched().await.unwrap();
        let ids: Vec<_> = unmatched.iter().map(|r| r.transfer_id.clone()).collect();
        assert_eq!(ids, vec![pending_id, mismatched_id]);
        assert!(unmatched[0].leg_b.is_none());
        assert_eq!(unmatched[1].leg_b.as_ref().map(|l| l.amount), Some(9));
    }

    #[tokio::test]
    async fn full_width_amounts_are_stored_exactly() {
        let storage = storage().await;
        let id = transfer_id(6);
        let pending =
            TransferRecord::from_first_leg(&leg(&id, "Ethereum", LegAction::Burn, u64::MAX, "0xa"));
        assert!(storage.insert_transfer(&pending).await.unwrap());

        let completed =
            pending.with_second_leg(leg(&id, "BSC", LegAction::Mint, u64::MAX, "0xb").detail());
        assert!(storage.complete_transfer(&completed).await.unwrap());

        let stored = storage.find_transfer(&id).await.unwrap().expect("row exists");
        assert_eq!(stored, completed);
        assert!(stored.is_matched);
    }

    #[tokio::test]
    async fn unparsable_amount_is_reported_as_corrupt() {
        let storage = storage().await;
        let id = transfer_id(7);
        let record = TransferRecord::from_first_leg(&leg(&id, "Ethereum", LegAction::Burn, 5, "0xa"));
        storage.insert_transfer(&record).await.unwrap();

        transfers::Entity::update_many()
            .col_expr(transfers::Column::AmountA, Expr::value("-5"))
            .filter(transfers::Column::TransferId.eq(id.as_str()))
            .exec(storage.connection())
            .await
            .unwrap();

        assert!(matches!(
            storage.find_transfer(&id).await,
            Err(StorageError::Corrupt { .. })
        ));
    }
}
