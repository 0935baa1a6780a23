//! Fan-out delivery with receipts, retry and replay

pub mod render;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::channels::{NotificationChannel, SendOptions};
use crate::db::Database;
use crate::error::TransportError;
use crate::models::{NewReceipt, RiskLevel};
use crate::utils::{RetryError, RetryPolicy, Shutdown};

pub use render::{LlmRenderer, RenderContext, Rendered, Renderer, RuleRenderer};

/// Who a delivery goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Admin,
    Owner,
}

/// Per-message delivery tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub admin_sent: usize,
    /// Admins that already held a receipt for the message
    pub admin_already: usize,
    pub admin_failed: usize,
    pub owner_sent: usize,
    pub owner_already: usize,
    pub owner_failed: usize,
    pub replayed: bool,
}

impl DispatchOutcome {
    /// At least one admin has the message, either now or from an earlier attempt
    pub fn acknowledgeable(&self) -> bool {
        self.admin_sent + self.admin_already > 0
    }
}

/// Delivery targets for one message, admins first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub admins: Vec<String>,
    pub owners: Vec<String>,
}

pub struct Router {
    db: Arc<Database>,
    channel: Arc<dyn NotificationChannel>,
    admins: Vec<String>,
    retry: RetryPolicy,
    shutdown: Shutdown,
}

impl Router {
    pub fn new(
        db: Arc<Database>,
        channel: Arc<dyn NotificationChannel>,
        admins: Vec<String>,
        retry: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            db,
            channel,
            admins,
            retry,
            shutdown,
        }
    }

    /// Admin addresses plus enabled owners of `device` whose threshold admits `risk`.
    ///
    /// Owners that are also admins are dropped so nobody gets the message twice.
    pub fn resolve(&self, device: Option<&str>, risk: RiskLevel) -> Result<Targets> {
        let mut owners: Vec<String> = Vec::new();
        for r in self.db.recipients_for_device(device)? {
            if !r.accepts(risk) || self.admins.contains(&r.address) || owners.contains(&r.address) {
                continue;
            }
            owners.push(r.address);
        }
        Ok(Targets {
            admins: self.admins.clone(),
            owners,
        })
    }

    /// Deliver a freshly rendered alert
    pub async fn dispatch(
        &self,
        message_ref: i64,
        device: Option<&str>,
        risk: RiskLevel,
        rendered: &Rendered,
    ) -> Result<DispatchOutcome> {
        let targets = self.resolve(device, risk)?;
        let mut outcome = DispatchOutcome::default();

        for address in &targets.admins {
            match self
                .deliver(message_ref, device, address, Audience::Admin, risk, rendered)
                .await?
            {
                Delivery::Sent => outcome.admin_sent += 1,
                Delivery::Already => outcome.admin_already += 1,
                Delivery::Failed => outcome.admin_failed += 1,
            }
        }
        if !outcome.acknowledgeable() {
            // Owners only hear about what an admin has already seen
            tracing::error!(
                "Delivery failed to all {} admin address(es) for message {}, skipping {} owner(s)",
                targets.admins.len(),
                message_ref,
                targets.owners.len()
            );
            return Ok(outcome);
        }

        for address in &targets.owners {
            match self
                .deliver(message_ref, device, address, Audience::Owner, risk, rendered)
                .await?
            {
                Delivery::Sent => outcome.owner_sent += 1,
                Delivery::Already => outcome.owner_already += 1,
                Delivery::Failed => outcome.owner_failed += 1,
            }
        }
        Ok(outcome)
    }

    /// Re-send the last rendered text of an already delivered message to any eligible
    /// address lacking a receipt.
    ///
    /// Returns `None` when no configured admin holds a receipt for the message, so the caller
    /// runs the normal path instead.
    pub async fn replay(
        &self,
        message_ref: i64,
        device: Option<&str>,
    ) -> Result<Option<DispatchOutcome>> {
        let mut admin_has_it = false;
        for address in &self.admins {
            if self.db.has_delivery(message_ref, address)? {
                admin_has_it = true;
                break;
            }
        }
        if !admin_has_it {
            return Ok(None);
        }
        let Some(stored) = self.db.latest_delivery(message_ref)? else {
            return Ok(None);
        };
        let rendered = Rendered {
            text: stored.text,
            ai_enabled: stored.ai_enabled,
            model_used: stored.model_used,
            fallback: stored.fallback,
        };
        let mut outcome = self
            .dispatch(message_ref, device, stored.risk_level, &rendered)
            .await?;
        outcome.replayed = true;
        if outcome.admin_sent + outcome.owner_sent > 0 {
            tracing::info!(
                "Replayed message {} to {} admin(s) and {} owner(s)",
                message_ref,
                outcome.admin_sent,
                outcome.owner_sent
            );
        }
        Ok(Some(outcome))
    }

    async fn deliver(
        &self,
        message_ref: i64,
        device: Option<&str>,
        address: &str,
        audience: Audience,
        risk: RiskLevel,
        rendered: &Rendered,
    ) -> Result<Delivery> {
        if self.db.has_delivery(message_ref, address)? {
            return Ok(Delivery::Already);
        }

        let options = SendOptions {
            risk,
            details_ref: (audience == Audience::Admin).then_some(message_ref),
        };
        let channel = self.channel.as_ref();
        let text = rendered.text.as_str();
        let options = &options;
        let sent = self
            .retry
            .retry(&self.shutdown, TransportError::is_transient, move || {
                channel.send(address, text, options)
            })
            .await;

        let handle = match sent {
            Ok(handle) => handle,
            Err(RetryError::Failed { error, attempts }) => {
                tracing::warn!(
                    "Send to {:?} {} failed after {} attempt(s): {}",
                    audience,
                    address,
                    attempts,
                    error
                );
                return Ok(Delivery::Failed);
            }
            Err(RetryError::Cancelled(error)) => {
                tracing::warn!("Send to {} abandoned on shutdown: {}", address, error);
                return Ok(Delivery::Failed);
            }
        };

        let receipt = NewReceipt {
            message_ref,
            device,
            address,
            handle: &handle,
            sent_at: Utc::now(),
            risk_level: risk,
            ai_enabled: rendered.ai_enabled,
            model_used: rendered.model_used.as_deref(),
            fallback: rendered.fallback.as_deref(),
            text: &rendered.text,
        };
        // The send already happened; a lost receipt must not turn it into a failure
        if let Err(e) = self.db.insert_delivery(&receipt) {
            tracing::error!(
                "Delivered message {} to {} but could not store the receipt: {}",
                message_ref,
                address,
                e
            );
        }
        Ok(Delivery::Sent)
    }
}

enum Delivery {
    Sent,
    Already,
    Failed,
}
