use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::RiskLevel;

/// Pending multi-step operator action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
    /// The next address the operator supplies is bound to the asset
    BindOwner,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindOwner => write!(f, "bind_owner"),
        }
    }
}

impl InteractionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bind_owner" => Some(Self::BindOwner),
            _ => None,
        }
    }
}

/// Per-operator interaction state with explicit expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub operator_id: String,
    pub kind: InteractionKind,
    pub asset_id: i64,
    pub min_risk: RiskLevel,
    pub expires_at: DateTime<Utc>,
}

impl Interaction {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
