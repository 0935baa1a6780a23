//! Collaborator seams: mail source, notification channel, text generation

pub mod openai;
pub mod spool;
pub mod telegram;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::models::{AssetClass, CanonicalEvent, RawMessage, RiskLevel};

pub use openai::OpenAiGenerator;
pub use spool::SpoolMailSource;
pub use telegram::TelegramChannel;

/// Source of vendor alert mails
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Messages from `sender` not yet acknowledged, oldest first, at most the last `limit`
    async fn fetch_unseen(&self, sender: &str, limit: usize)
        -> Result<Vec<RawMessage>, TransportError>;

    /// Last `limit` messages from `sender` regardless of acknowledgment
    async fn fetch_latest(&self, sender: &str, limit: usize)
        -> Result<Vec<RawMessage>, TransportError>;

    /// Mark messages processed; returns how many were marked
    async fn acknowledge(&self, uids: &[String]) -> Result<usize, TransportError>;
}

/// Per-send presentation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub risk: RiskLevel,
    /// Message reference for a details action; only set for admin deliveries
    pub details_ref: Option<i64>,
}

/// Outbound notification channel
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver `text` to `address`; returns the channel-native message handle
    async fn send(
        &self,
        address: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<String, TransportError>;
}

/// Input to a text-generation collaborator
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub event: &'a CanonicalEvent,
    pub asset_class: Option<AssetClass>,
    pub risk: RiskLevel,
    pub reason: Option<&'a str>,
    pub repeat_count: u64,
    pub known_servers: &'a [String],
    pub related_devices: &'a [String],
}

/// Optional natural-language enrichment
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, TransportError>;
}
