use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::RiskLevel;

/// Operator-assigned classification of a monitored host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Unclassified,
    Server,
    Workstation,
}

impl Default for AssetClass {
    fn default() -> Self {
        Self::Unclassified
    }
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "UNCLASSIFIED",
            Self::Server => "SERVER",
            Self::Workstation => "WORKSTATION",
        }
    }

    /// Sort key used by asset listings: unclassified hosts first
    pub fn listing_priority(&self) -> u8 {
        match self {
            Self::Unclassified => 0,
            Self::Server => 1,
            Self::Workstation => 2,
        }
    }
}

impl From<&str> for AssetClass {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SERVER" => Self::Server,
            "WORKSTATION" => Self::Workstation,
            _ => Self::Unclassified,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A monitored host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub hostname: String,
    pub class: AssetClass,
}

/// Extra notification target bound to an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub asset_id: i64,
    pub address: String,
    /// Operator who created the binding, if known
    pub operator_id: Option<String>,
    pub min_risk: RiskLevel,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    /// Whether this binding should receive a message of the given level
    pub fn accepts(&self, level: RiskLevel) -> bool {
        self.enabled && level >= self.min_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(min_risk: RiskLevel, enabled: bool) -> Recipient {
        Recipient {
            id: 1,
            asset_id: 1,
            address: "1001".to_string(),
            operator_id: None,
            min_risk,
            enabled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_asset_class_parse() {
        assert_eq!(AssetClass::from("server"), AssetClass::Server);
        assert_eq!(AssetClass::from("WORKSTATION"), AssetClass::Workstation);
        assert_eq!(AssetClass::from(""), AssetClass::Unclassified);
        assert_eq!(AssetClass::from("router"), AssetClass::Unclassified);
    }

    #[test]
    fn test_recipient_threshold() {
        let r = recipient(RiskLevel::High, true);
        assert!(!r.accepts(RiskLevel::Medium));
        assert!(r.accepts(RiskLevel::High));
        assert!(r.accepts(RiskLevel::Critical));

        let disabled = recipient(RiskLevel::Info, false);
        assert!(!disabled.accepts(RiskLevel::Critical));
    }
}
