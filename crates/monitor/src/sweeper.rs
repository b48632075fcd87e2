//! Periodic re-alerting for transfers that never reconciled.

use std::sync::Arc;
use std::time::Duration;

use bridge_monitor_domain::storage::{StorageError, TransferStore};
use chrono::Utc;
use metrics::gauge;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::alert::{Alert, AlertKind, AlertSink};

/// Raises an alert for every unmatched record on each tick. The sweep is
/// stateless: a record keeps alerting until it is fixed by hand.
pub struct TimeoutSweeper<S, A> {
    store: Arc<S>,
    alerts: Arc<A>,
    period: Duration,
    stuck_after: Duration,
}

impl<S, A> TimeoutSweeper<S, A>
where
    S: TransferStore,
    A: AlertSink,
{
    pub fn new(store: Arc<S>, alerts: Arc<A>, period: Duration) -> Self {
        Self {
            store,
            alerts,
            period,
            stuck_after: Duration::ZERO,
        }
    }

    /// Pending records younger than `grace` are left alone.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.stuck_after = grace;
        self
    }

    pub async fn run(self) {
        info!(period = ?self.period, grace = ?self.stuck_after, "timeout sweeper started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first sweep runs one
        // period after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
            if let Err(err) = self.sweep_once(now).await {
                error!(%err, "timeout sweep failed");
            }
        }
    }

    /// Alerts on every unmatched record and returns how many were raised.
    pub async fn sweep_once(&self, now_secs: u64) -> Result<usize, StorageError> {
        let unmatched = self.store.find_unmatched().await?;
        gauge!("sweeper_unmatched_records").set(unmatched.len() as f64);

        let grace = self.stuck_after.as_secs();
        let mut raised = 0;
        for record in unmatched {
            let kind = if record.is_complete() && !record.is_valid_pair() {
                AlertKind::MismatchedActionPair
            } else if record.is_complete() {
                AlertKind::AmountMismatch
            } else if now_secs.saturating_sub(record.timestamp) < grace {
                continue;
            } else {
                AlertKind::StuckTransfer
            };
            self.alerts.notify(Alert::new(kind, record));
            raised += 1;
        }

        if raised > 0 {
            info!(raised, "timeout sweep raised alerts");
        }
        Ok(raised)
    }
}
