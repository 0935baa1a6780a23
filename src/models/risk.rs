use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk level assigned to an event, totally ordered from INFO to CRITICAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Parse a stored or operator-supplied level; unknown strings yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Some(Self::Info),
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Critical | Self::High => "🔴",
            Self::Medium => "🟡",
            Self::Low | Self::Info => "🟢",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Default minimum level for recipient bindings
pub const DEFAULT_MIN_RISK: RiskLevel = RiskLevel::Medium;

/// Rank a vendor-reported severity string.
///
/// critical/high → 3, medium/moderate → 2, low → 1, anything else (including absent) → 0.
pub fn severity_rank(vendor_severity: Option<&str>) -> u8 {
    let Some(s) = vendor_severity else {
        return 0;
    };
    match s.trim().to_lowercase().as_str() {
        "critical" | "high" => 3,
        "medium" | "moderate" => 2,
        "low" => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_order_is_total() {
        let levels = RiskLevel::ALL;
        for pair in levels.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_roundtrip_and_unknown() {
        for level in RiskLevel::ALL {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(RiskLevel::parse(" high "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("severe"), None);
    }

    #[test]
    fn test_severity_rank_vocabulary() {
        assert_eq!(severity_rank(Some("Critical")), 3);
        assert_eq!(severity_rank(Some("HIGH")), 3);
        assert_eq!(severity_rank(Some("moderate")), 2);
        assert_eq!(severity_rank(Some("Medium")), 2);
        assert_eq!(severity_rank(Some("low")), 1);
        assert_eq!(severity_rank(Some("Warning")), 0);
        assert_eq!(severity_rank(None), 0);
    }
}
