use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AlertChannel, AlertMessage, LegLine, NotifyError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts interactive cards to a Lark custom-bot webhook.
pub struct LarkChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl LarkChannel {
    pub fn new(webhook_url: String) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, webhook_url })
    }
}

#[async_trait]
impl AlertChannel for LarkChannel {
    fn name(&self) -> &'static str {
        "lark"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&card(message))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

pub(crate) fn card(message: &AlertMessage) -> Value {
    let mut content = format!(
        "**Transfer:** {}\n**Time:** {}\n\n**From:** {}\n**To:** {}\n\n**Tx hash (From):** {}\n**Tx hash (To):** {}\n",
        message.transfer_id,
        message.time,
        leg_md(&message.from),
        leg_md(&message.to),
        message.from.tx_hash,
        message.to.tx_hash,
    );
    if let Some(incoming) = &message.incoming {
        content.push_str(&format!(
            "\n**Rejected leg:** {}\n**Tx hash (Rejected):** {}\n",
            leg_md(incoming),
            incoming.tx_hash
        ));
    }

    json!({
        "msg_type": "interactive",
        "card": {
            "header": {
                "title": {
                    "tag": "plain_text",
                    "content": format!("*****❗️❗️{}❗️❗️*****", message.title),
                },
            },
            "elements": [{
                "tag": "div",
                "text": {
                    "tag": "lark_md",
                    "content": content,
                },
            }],
        },
    })
}

fn leg_md(leg: &LegLine) -> String {
    format!("{} **{}** [{}]", leg.chain, leg.action, leg.amount)
}
