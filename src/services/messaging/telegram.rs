use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::MessagingProvider;
use crate::models::Reply;

const CONTACT_BUTTON_LABEL: &str = "Share phone number";

pub struct TelegramProvider {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramProvider {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }
}

/// Bot API `sendMessage` body for a reply. Options become an inline keyboard;
/// a contact request becomes a one-time reply keyboard, which takes precedence.
pub fn render(reply: &Reply) -> Value {
    let mut body = json!({
        "chat_id": reply.to,
        "text": reply.text,
    });

    if reply.request_contact {
        body["reply_markup"] = json!({
            "keyboard": [[{ "text": CONTACT_BUTTON_LABEL, "request_contact": true }]],
            "resize_keyboard": true,
            "one_time_keyboard": true,
        });
    } else if !reply.options.is_empty() {
        let rows: Vec<Value> = reply
            .options
            .iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|o| json!({ "text": o.label, "callback_data": o.action }))
                        .collect(),
                )
            })
            .collect();
        body["reply_markup"] = json!({ "inline_keyboard": rows });
    }

    body
}

#[async_trait]
impl MessagingProvider for TelegramProvider {
    async fn send_message(&self, reply: &Reply) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        self.client
            .post(&url)
            .json(&render(reply))
            .send()
            .await
            .context("failed to reach Telegram Bot API")?
            .error_for_status()
            .context("Telegram Bot API returned error")?;

        Ok(())
    }
}
