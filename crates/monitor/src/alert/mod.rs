//! Consistency alerts and their delivery to chat channels.
//!
//! Reconciliation and the timeout sweep only ever see [`AlertSink`], whose
//! `notify` is synchronous and infallible. [`AlertDispatcher`] renders the
//! alert once and hands it to every configured [`AlertChannel`] on its own
//! task, so a slow or failing chat platform never stalls a scanner.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_monitor_domain::config::AlertSettings;
use bridge_monitor_domain::model::{LegAction, LegDetail, TransferRecord};
use metrics::counter;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::{error, warn};

mod lark;
mod telegram;

pub use lark::LarkChannel;
pub use telegram::TelegramChannel;

const TITLE: &str = "Bridge data anomaly";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    /// A different second leg arrived for an already completed record.
    ConflictingSecondLeg,
    /// Both legs carry the same action.
    MismatchedActionPair,
    /// Burn and mint amounts differ.
    AmountMismatch,
    /// The record is still unmatched when the timeout sweep runs.
    StuckTransfer,
    /// The stored row for the leg's identifier could not be read back.
    UnreadableRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub record: TransferRecord,
    /// The rejected leg for [`AlertKind::ConflictingSecondLeg`].
    pub incoming: Option<LegDetail>,
}

impl Alert {
    pub fn new(kind: AlertKind, record: TransferRecord) -> Self {
        Self {
            kind,
            record,
            incoming: None,
        }
    }

    pub fn with_incoming(mut self, leg: LegDetail) -> Self {
        self.incoming = Some(leg);
        self
    }
}

/// Fire-and-forget alert consumer.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status code: {0}")]
    Status(u16),
}

impl From<reqwest::Error> for NotifyError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

/// A chat platform alerts can be delivered to.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// One rendered side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegLine {
    pub chain: String,
    pub action: &'static str,
    pub amount: String,
    pub tx_hash: String,
}

impl LegLine {
    fn from_detail(leg: &LegDetail) -> Self {
        Self {
            chain: leg.chain.clone(),
            action: action_label(leg.action),
            amount: format_with_commas(leg.amount),
            tx_hash: leg.tx_hash.clone(),
        }
    }

    fn empty() -> Self {
        Self {
            chain: "-".into(),
            action: "-",
            amount: "-".into(),
            tx_hash: "-".into(),
        }
    }
}

/// Channel-agnostic rendering of an [`Alert`]. The burn side is shown as
/// "From" and the mint side as "To"; with no burn present leg A is "From".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub kind: AlertKind,
    pub title: String,
    pub transfer_id: String,
    pub time: String,
    pub from: LegLine,
    pub to: LegLine,
    pub incoming: Option<LegLine>,
}

impl AlertMessage {
    pub fn from_alert(alert: &Alert) -> Self {
        let record = &alert.record;
        let (from, to) = match (&record.leg_a, &record.leg_b) {
            (a, Some(b)) if a.action != LegAction::Burn && b.action == LegAction::Burn => {
                (LegLine::from_detail(b), LegLine::from_detail(a))
            }
            (a, Some(b)) => (LegLine::from_detail(a), LegLine::from_detail(b)),
            (a, None) if a.action == LegAction::Mint => (LegLine::empty(), LegLine::from_detail(a)),
            (a, None) => (LegLine::from_detail(a), LegLine::empty()),
        };

        let time = record
            .created_at()
            .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| record.timestamp.to_string());

        Self {
            kind: alert.kind,
            title: format!("[{}] {TITLE}", alert.kind),
            transfer_id: record.transfer_id.to_string(),
            time,
            from,
            to,
            incoming: alert.incoming.as_ref().map(LegLine::from_detail),
        }
    }
}

fn action_label(action: LegAction) -> &'static str {
    match action {
        LegAction::Burn => "Burn",
        LegAction::Mint => "Mint",
    }
}

/// `1234567` -> `1,234,567`.
pub fn format_with_commas(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Fans every alert out to the configured channels.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { channels }
    }

    pub fn from_settings(settings: &AlertSettings) -> Result<Self, NotifyError> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
        if let Some(telegram) = &settings.telegram {
            channels.push(Arc::new(TelegramChannel::new(
                telegram.bot_token.clone(),
                telegram.chat_ids.clone(),
            )?));
        }
        if let Some(url) = &settings.lark_webhook_url {
            channels.push(Arc::new(LarkChannel::new(url.clone())?));
        }
        if channels.is_empty() {
            warn!("no alert channels configured, alerts will only be logged");
        }
        Ok(Self::new(channels))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl AlertSink for AlertDispatcher {
    fn notify(&self, alert: Alert) {
        counter!("alerts_total", "kind" => alert.kind.as_ref().to_string()).increment(1);
        warn!(
            kind = %alert.kind,
            transfer_id = %alert.record.transfer_id,
            chain_a = %alert.record.leg_a.chain,
            chain_b = alert.record.leg_b.as_ref().map(|leg| leg.chain.as_str()),
            "bridge consistency alert"
        );
        if self.channels.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(kind = %alert.kind, "no async runtime available to deliver alert");
            return;
        };
        let message = Arc::new(AlertMessage::from_alert(&alert));
        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let message = Arc::clone(&message);
            runtime.spawn(async move {
                let result = channel.send(&message).await;
                let label = if result.is_ok() { "ok" } else { "error" };
                counter!(
                    "alert_deliveries_total",
                    "channel" => channel.name(),
                    "result" => label
                )
                .increment(1);
                if let Err(err) = result {
                    error!(channel = channel.name(), %err, "failed to deliver alert");
                }
            });
        }
    }
}
