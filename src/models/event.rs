use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One parsed detection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub vendor_severity: Option<String>,
    pub device: Option<String>,
    pub event_type: Option<String>,
    pub detection_name: Option<String>,
    pub object_path: Option<String>,
    pub process_name: Option<String>,
    pub sha256: Option<String>,
    pub user: Option<String>,
    pub result: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
}

impl CanonicalEvent {
    /// Stable dedup identity over device, event type, detection, object and result.
    ///
    /// Each part is trimmed and lower-cased; absent parts take part as empty strings.
    pub fn fingerprint(&self) -> String {
        let parts = [
            &self.device,
            &self.event_type,
            &self.detection_name,
            &self.object_path,
            &self.result,
        ]
        .map(|p| p.as_deref().unwrap_or("").trim().to_lowercase());

        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Device name with surrounding whitespace removed, `None` when blank
    pub fn device_name(&self) -> Option<&str> {
        self.device
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Lower-case a 64-char hex digest; other values are only trimmed
pub fn normalize_sha256(value: &str) -> String {
    let v = value.trim();
    if v.len() == 64 && v.chars().all(|c| c.is_ascii_hexdigit()) {
        v.to_ascii_lowercase()
    } else {
        v.to_string()
    }
}
