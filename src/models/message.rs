use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CanonicalEvent, RiskLevel};

/// A message as handed over by the mail source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: String,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new(uid: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            uid: uid.into(),
            body: body.into(),
        }
    }
}

/// Extractor output: message headers, decoded text and the canonical event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub uid: String,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub raw_text: String,
    pub event: CanonicalEvent,
    pub fingerprint: String,
}

/// Stored source message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedMessage {
    pub id: i64,
    pub uid: String,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub raw_text: String,
}

/// Outcome of the dedup engine, recorded on the event once made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupDecision {
    pub should_alert: bool,
    pub count: u64,
}

/// Stored event tied one-to-one to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedEvent {
    pub id: i64,
    pub message_ref: i64,
    pub event: CanonicalEvent,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub decision: Option<DedupDecision>,
}

/// Ids returned by an idempotent message insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub message_ref: i64,
    pub event_ref: i64,
    pub created: bool,
}

/// Per-fingerprint suppression state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub last_message_ref: Option<i64>,
}

/// Record of one successful send of a rendered alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub id: i64,
    pub message_ref: i64,
    pub device: Option<String>,
    pub address: String,
    pub handle: String,
    pub sent_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub ai_enabled: bool,
    pub model_used: Option<String>,
    pub fallback: Option<String>,
    pub text: String,
}

/// Receipt fields supplied by the router before insertion
#[derive(Debug, Clone)]
pub struct NewReceipt<'a> {
    pub message_ref: i64,
    pub device: Option<&'a str>,
    pub address: &'a str,
    pub handle: &'a str,
    pub sent_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub ai_enabled: bool,
    pub model_used: Option<&'a str>,
    pub fallback: Option<&'a str>,
    pub text: &'a str,
}

/// Row of a device's delivery history listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub receipt_id: i64,
    pub sent_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub message_ref: i64,
    pub model_used: Option<String>,
}
