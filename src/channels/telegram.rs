//! Telegram Bot API notification channel

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{NotificationChannel, SendOptions};
use crate::error::TransportError;
use crate::models::RiskLevel;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
pub const DETAILS_CALLBACK_PREFIX: &str = "details:";
const DETAILS_BUTTON: &str = "Подробности";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramChannel {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Permanent(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wire form of an alert: risk icon, then the text as preformatted HTML
pub fn format_message(text: &str, risk: RiskLevel) -> String {
    format!("{}\n<pre>{}</pre>", risk.icon(), escape_html(text))
}

fn build_payload(address: &str, text: &str, options: &SendOptions) -> serde_json::Value {
    let mut payload = json!({
        "chat_id": address,
        "text": format_message(text, options.risk),
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    });
    if let Some(message_ref) = options.details_ref {
        payload["reply_markup"] = json!({
            "inline_keyboard": [[{
                "text": DETAILS_BUTTON,
                "callback_data": format!("{}{}", DETAILS_CALLBACK_PREFIX, message_ref),
            }]]
        });
    }
    payload
}

fn classify_status(status: reqwest::StatusCode, description: String) -> TransportError {
    if status.as_u16() == 429 || status.is_server_error() {
        TransportError::Transient(format!("{}: {}", status, description))
    } else {
        TransportError::Permanent(format!("{}: {}", status, description))
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(
        &self,
        address: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<String, TransportError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = build_payload(address, text, options);

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => return Err(classify_status(status, e.to_string())),
            Err(e) => return Err(TransportError::Permanent(format!("malformed response: {}", e))),
        };

        if !status.is_success() || !body.ok {
            return Err(classify_status(
                status,
                body.description.unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        body.result
            .map(|m| m.message_id.to_string())
            .ok_or_else(|| TransportError::Permanent("response without message id".to_string()))
    }
}
