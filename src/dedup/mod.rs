//! Windowed deduplication and burst suppression per fingerprint

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::db::Database;
use crate::models::{DedupDecision, DedupRecord};

/// Advance one fingerprint's state for a sighting at `now`.
///
/// Episodes are bounded by gaps between sightings, not between alerts: a sighting after more
/// than `window` of silence always alerts. Inside an episode, at most one burst alert fires per
/// window once the running count reaches `threshold`.
pub fn advance(
    current: Option<DedupRecord>,
    fingerprint: &str,
    now: DateTime<Utc>,
    window: Duration,
    threshold: u64,
    message_ref: Option<i64>,
) -> (DedupRecord, DedupDecision) {
    let Some(mut record) = current else {
        let record = DedupRecord {
            fingerprint: fingerprint.to_string(),
            first_seen: now,
            last_seen: now,
            count: 1,
            last_alert_at: Some(now),
            last_message_ref: message_ref,
        };
        return (
            record,
            DedupDecision {
                should_alert: true,
                count: 1,
            },
        );
    };

    let gap = now - record.last_seen;
    record.last_seen = now;
    record.count += 1;
    if message_ref.is_some() {
        record.last_message_ref = message_ref;
    }

    let should_alert = if gap > window {
        true
    } else {
        record.count >= threshold
            && record
                .last_alert_at
                .map_or(true, |last| now - last > window)
    };
    if should_alert {
        record.last_alert_at = Some(now);
    }

    let decision = DedupDecision {
        should_alert,
        count: record.count,
    };
    (record, decision)
}

/// Dedup engine bound to the persistent store
#[derive(Clone)]
pub struct DedupEngine {
    db: Arc<Database>,
    window: Duration,
    threshold: u64,
}

impl DedupEngine {
    pub fn new(db: Arc<Database>, window_secs: u64, threshold: u64) -> Self {
        Self {
            db,
            window: Duration::seconds(window_secs as i64),
            threshold,
        }
    }

    /// Record a sighting and decide whether it alerts; stored on the event as well
    pub fn decide(
        &self,
        fingerprint: &str,
        message_ref: i64,
        event_ref: i64,
        now: DateTime<Utc>,
    ) -> Result<DedupDecision> {
        let (window, threshold) = (self.window, self.threshold);
        self.db.apply_dedup(fingerprint, event_ref, |current| {
            advance(current, fingerprint, now, window, threshold, Some(message_ref))
        })
    }
}
