//! Rule-based risk classification

use serde::{Deserialize, Serialize};

use crate::models::{severity_rank, AssetClass, CanonicalEvent, RiskLevel};

const THREAT_MARKERS: &[&str] = &["ransomware", "malware", "exploit"];

pub const REASON_THREAT_CATEGORY: &str = "Threat category escalated to CRITICAL (rules)";
pub const REASON_CRITICAL_ASSET: &str = "Critical Asset Involved";
pub const REASON_NEEDS_CLASSIFICATION: &str = "Asset is UNCLASSIFIED (needs classification)";
pub const REASON_SOFT_ESCALATION: &str = "Soft escalation: UNCLASSIFIED + Medium severity";

/// Classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub level: RiskLevel,
    pub reason: Option<String>,
    /// Asset class the decision was made against; `None` when the event names no device
    pub asset_class: Option<AssetClass>,
}

fn has_threat_marker(value: Option<&str>) -> bool {
    let Some(v) = value else {
        return false;
    };
    let v = v.to_lowercase();
    THREAT_MARKERS.iter().any(|m| v.contains(m))
}

/// Map an event and its asset class to a risk level. First matching rule wins.
pub fn classify(event: &CanonicalEvent, asset_class: Option<AssetClass>) -> Classification {
    let decide = |level: RiskLevel, reason: Option<&str>| Classification {
        level,
        reason: reason.map(str::to_string),
        asset_class,
    };

    if has_threat_marker(event.event_type.as_deref())
        || has_threat_marker(event.detection_name.as_deref())
    {
        return decide(RiskLevel::Critical, Some(REASON_THREAT_CATEGORY));
    }

    let rank = severity_rank(event.vendor_severity.as_deref());
    match (asset_class, rank) {
        (Some(AssetClass::Server), r) if r >= 2 => {
            return decide(RiskLevel::High, Some(REASON_CRITICAL_ASSET))
        }
        (Some(AssetClass::Unclassified), r) if r >= 3 => {
            return decide(RiskLevel::High, Some(REASON_NEEDS_CLASSIFICATION))
        }
        (Some(AssetClass::Unclassified), 2) => {
            return decide(RiskLevel::High, Some(REASON_SOFT_ESCALATION))
        }
        _ => {}
    }

    let level = match rank {
        r if r >= 3 => RiskLevel::High,
        2 => RiskLevel::Medium,
        1 => RiskLevel::Low,
        _ => RiskLevel::Info,
    };
    let reason = (asset_class == Some(AssetClass::Unclassified)).then_some(REASON_NEEDS_CLASSIFICATION);
    decide(level, reason)
}
