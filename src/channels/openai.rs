//! Chat-completions text generator

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationRequest, TextGenerator};
use crate::error::TransportError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a SOC analyst. Assess the real risk of the event using the asset \
context. If the same detection appears on several hosts, call it out as a possible lateral \
movement attempt. For HIGH/CRITICAL threats name the likely MITRE ATT&CK technique. \
Reply with a concise report for a chat message: first line '<icon> | <type> | <device>', \
paths and hashes verbatim.";

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Permanent(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("-")
}

/// User message carrying the event and its context
pub fn build_prompt(request: &GenerationRequest<'_>) -> String {
    let ev = request.event;
    let mut out = String::from("Event:\n");
    let _ = writeln!(out, "- vendor_severity: {}", opt(&ev.vendor_severity));
    let _ = writeln!(out, "- device: {}", opt(&ev.device));
    let _ = writeln!(out, "- event_type: {}", opt(&ev.event_type));
    let _ = writeln!(out, "- detection_name: {}", opt(&ev.detection_name));
    let _ = writeln!(out, "- object_path: {}", opt(&ev.object_path));
    let _ = writeln!(out, "- process_name: {}", opt(&ev.process_name));
    let _ = writeln!(out, "- sha256: {}", opt(&ev.sha256));
    let _ = writeln!(out, "- user: {}", opt(&ev.user));
    let _ = writeln!(out, "- result: {}", opt(&ev.result));
    let _ = writeln!(
        out,
        "- event_time_utc: {}",
        ev.event_time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    );

    out.push_str("\nRules-based assessment:\n");
    let _ = writeln!(
        out,
        "- asset_class: {}",
        request.asset_class.map(|c| c.as_str()).unwrap_or("-")
    );
    let _ = writeln!(out, "- risk_level: {}", request.risk);
    let _ = writeln!(out, "- reason: {}", request.reason.unwrap_or("-"));
    let _ = writeln!(out, "- repeats: {}", request.repeat_count);

    let servers = if request.known_servers.is_empty() {
        "(none)".to_string()
    } else {
        request.known_servers.join(", ")
    };
    let _ = writeln!(out, "\nKnown servers: {}", servers);

    if !request.related_devices.is_empty() {
        let _ = writeln!(
            out,
            "Correlation hint: same detection_name seen on other devices recently: {}",
            request.related_devices.join(", ")
        );
    }
    out
}

fn map_error(e: reqwest::Error) -> TransportError {
    // Only connectivity problems are worth another attempt
    if e.is_connect() || e.is_timeout() {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Permanent(e.to_string())
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, TransportError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(request) },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::Permanent(format!("{}: {}", status, detail)));
        }

        let completion: Completion = response.json().await.map_err(map_error)?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TransportError::Permanent("empty completion".to_string()))
    }
}
