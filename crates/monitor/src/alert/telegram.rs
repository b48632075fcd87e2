use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::{AlertChannel, AlertMessage, LegLine, NotifyError};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts HTML alerts through the Bot API to every configured chat.
pub struct TelegramChannel {
    http: reqwest::Client,
    endpoint: String,
    chat_ids: Vec<i64>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, chat_ids: Vec<i64>) -> Result<Self, NotifyError> {
        Self::with_api_base(API_BASE, &bot_token, chat_ids)
    }

    pub fn with_api_base(
        api_base: &str,
        bot_token: &str,
        chat_ids: Vec<i64>,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{bot_token}/sendMessage", api_base.trim_end_matches('/')),
            chat_ids,
        })
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let text = render_html(message);
        let mut last_error = None;

        // One chat failing must not hide the alert from the others.
        for chat_id in &self.chat_ids {
            let outcome = self
                .http
                .post(&self.endpoint)
                .json(&json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }))
                .send()
                .await;
            match outcome {
                Ok(resp) if resp.status().is_success() => {
                    debug!(chat_id, "telegram alert sent");
                }
                Ok(resp) => {
                    warn!(chat_id, status = %resp.status(), "telegram rejected alert");
                    last_error = Some(NotifyError::Status(resp.status().as_u16()));
                }
                Err(err) => {
                    warn!(chat_id, ?err, "telegram request failed");
                    last_error = Some(err.into());
                }
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}

pub(crate) fn render_html(message: &AlertMessage) -> String {
    let mut text = format!(
        "<b>*****❗️❗️{}❗️❗️*****</b>\n\
         <b>Transfer:</b> <code>{}</code>\n\
         <b>Time:</b> {}\n\n\
         <b>From:</b> {}\n\
         <b>To:</b> {}\n\n\
         <b>Tx hash (From):</b> {}\n\
         <b>Tx hash (To):</b> {}\n",
        escape(&message.title),
        message.transfer_id,
        message.time,
        leg_html(&message.from),
        leg_html(&message.to),
        escape(&message.from.tx_hash),
        escape(&message.to.tx_hash),
    );
    if let Some(incoming) = &message.incoming {
        text.push_str(&format!(
            "\n<b>Rejected leg:</b> {}\n<b>Tx hash (Rejected):</b> {}\n",
            leg_html(incoming),
            escape(&incoming.tx_hash),
        ));
    }
    text
}

fn leg_html(leg: &LegLine) -> String {
    format!(
        "{} <b>{}</b> [{}]",
        escape(&leg.chain),
        leg.action,
        leg.amount
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
