//! Merges the two legs of a transfer into one durable record.
//!
//! Every write is conditional (insert-if-absent, then complete-if-leg-B-empty)
//! so two scanners delivering the halves of the same transfer at the same
//! moment cannot clobber each other: the loser re-reads and re-decides.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_monitor_domain::model::{TransferId, TransferLeg, TransferRecord};
use bridge_monitor_domain::storage::{StorageError, TransferStore};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertKind, AlertSink};

/// Re-read/re-write rounds before giving up on a contended identifier.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    /// First leg stored; waiting for the other chain.
    Recorded,
    /// The leg was already stored in one of the two slots.
    Duplicate,
    /// Burn and mint with equal amounts.
    Matched,
    /// Completed, but flagged with the given alert.
    Inconsistent(AlertKind),
}

impl LegOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Duplicate => "duplicate",
            Self::Matched => "matched",
            Self::Inconsistent(AlertKind::MismatchedActionPair) => "mismatched_action_pair",
            Self::Inconsistent(_) => "amount_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("transfer {transfer_id} already has a different second leg")]
    ConflictingSecondLeg { transfer_id: TransferId },
    #[error("transfer {transfer_id} kept changing under concurrent writers")]
    Contention { transfer_id: TransferId },
}

impl ReconcileError {
    /// Errors after which the same leg may succeed on a later delivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            Self::Contention { .. } => true,
            Self::ConflictingSecondLeg { .. } => false,
        }
    }
}

/// Consumer of decoded legs; implemented by [`Reconciler`] and by test doubles.
#[async_trait]
pub trait LegHandler: Send + Sync {
    async fn handle_leg(&self, leg: TransferLeg) -> Result<LegOutcome, ReconcileError>;
}

pub struct Reconciler<S, A> {
    store: Arc<S>,
    alerts: Arc<A>,
}

impl<S, A> Reconciler<S, A>
where
    S: TransferStore,
    A: AlertSink,
{
    pub fn new(store: Arc<S>, alerts: Arc<A>) -> Self {
        Self { store, alerts }
    }

    async fn reconcile(&self, leg: &TransferLeg) -> Result<LegOutcome, ReconcileError> {
        let incoming = leg.detail();

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(existing) = self.store.find_transfer(&leg.transfer_id).await? else {
                if self
                    .store
                    .insert_transfer(&TransferRecord::from_first_leg(leg))
                    .await?
                {
                    debug!(transfer_id = %leg.transfer_id, chain = %leg.chain, "first leg recorded");
                    return Ok(LegOutcome::Recorded);
                }
                debug!(transfer_id = %leg.transfer_id, attempt, "lost insert race, re-reading");
                continue;
            };

            if existing.contains_leg(&incoming) {
                return Ok(LegOutcome::Duplicate);
            }

            if existing.is_complete() {
                error!(
                    transfer_id = %leg.transfer_id,
                    chain = %leg.chain,
                    tx_hash = %leg.tx_hash,
                    "second leg already populated"
                );
                self.alerts.notify(
                    Alert::new(AlertKind::ConflictingSecondLeg, existing).with_incoming(incoming),
                );
                return Err(ReconcileError::ConflictingSecondLeg {
                    transfer_id: leg.transfer_id.clone(),
                });
            }

            let completed = existing.with_second_leg(incoming.clone());
            if !self.store.complete_transfer(&completed).await? {
                debug!(transfer_id = %leg.transfer_id, attempt, "lost completion race, re-reading");
                continue;
            }
            return Ok(self.judge(completed));
        }

        Err(ReconcileError::Contention {
            transfer_id: leg.transfer_id.clone(),
        })
    }

    fn judge(&self, record: TransferRecord) -> LegOutcome {
        if !record.is_valid_pair() {
            warn!(transfer_id = %record.transfer_id, "legs do not form a burn/mint pair");
            self.alerts
                .notify(Alert::new(AlertKind::MismatchedActionPair, record));
            return LegOutcome::Inconsistent(AlertKind::MismatchedActionPair);
        }
        if !record.is_matched {
            warn!(transfer_id = %record.transfer_id, "burn and mint amounts differ");
            self.alerts.notify(Alert::new(AlertKind::AmountMismatch, record));
            return LegOutcome::Inconsistent(AlertKind::AmountMismatch);
        }

        if let Some(leg_b) = &record.leg_b {
            info!(
                transfer_id = %record.transfer_id,
                created_time = record.timestamp,
                chain_a = %record.leg_a.chain,
                action_a = %record.leg_a.action,
                amount_a = record.leg_a.amount,
                tx_hash_a = %record.leg_a.tx_hash,
                chain_b = %leg_b.chain,
                action_b = %leg_b.action,
                amount_b = leg_b.amount,
                tx_hash_b = %leg_b.tx_hash,
                "cross-chain transfer matched"
            );
        }
        LegOutcome::Matched
    }
}

#[async_trait]
impl<S, A> LegHandler for Reconciler<S, A>
where
    S: TransferStore,
    A: AlertSink,
{
    async fn handle_leg(&self, leg: TransferLeg) -> Result<LegOutcome, ReconcileError> {
        let result = self.reconcile(&leg).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(ReconcileError::ConflictingSecondLeg { .. }) => "conflicting_second_leg",
            Err(ReconcileError::Contention { .. }) => "contention",
            Err(ReconcileError::Storage(err)) if err.is_transient() => "storage_error",
            Err(ReconcileError::Storage(err)) => {
                error!(transfer_id = %leg.transfer_id, chain = %leg.chain, %err, "stored record is unreadable");
                self.alerts.notify(Alert::new(
                    AlertKind::UnreadableRecord,
                    TransferRecord::from_first_leg(&leg),
                ));
                "unreadable_record"
            }
        };
        counter!("reconcile_outcomes_total", "outcome" => label).increment(1);
        result
    }
}
