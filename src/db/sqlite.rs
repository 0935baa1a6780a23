//! SQLite database implementation

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    Asset, AssetClass, CanonicalEvent, DedupDecision, DedupRecord, DeliveryReceipt,
    ExtractedMessage, HistoryEntry, IngestedEvent, IngestedMessage, InsertOutcome, Interaction,
    InteractionKind, NewReceipt, Recipient, RiskLevel, DEFAULT_MIN_RISK,
};

use super::{queries, schema};

/// Format a timestamp as fixed-width RFC 3339 so text comparison follows time order
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

fn risk_col(row: &Row, idx: usize) -> rusqlite::Result<RiskLevel> {
    let raw: String = row.get(idx)?;
    Ok(RiskLevel::parse(&raw).unwrap_or(DEFAULT_MIN_RISK))
}

fn clean(hostname: &str) -> Option<&str> {
    let h = hostname.trim();
    if h.is_empty() {
        None
    } else {
        Some(h)
    }
}

/// SQLite database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the specified path
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Create parent directory if needed
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        };

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        conn.execute_batch(schema::CREATE_TABLES)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![schema::SCHEMA_VERSION],
        )?;
        conn.execute_batch(schema::NORMALIZE_ASSETS)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    // ===== Messages & events =====

    /// Look up a stored message by its source UID
    pub fn find_message(&self, uid: &str) -> Result<Option<IngestedMessage>> {
        let conn = self.conn()?;
        let msg = conn
            .query_row(queries::SELECT_MESSAGE_BY_UID, params![uid], Self::row_to_message)
            .optional()?;
        Ok(msg)
    }

    pub fn get_message(&self, message_ref: i64) -> Result<Option<IngestedMessage>> {
        let conn = self.conn()?;
        let msg = conn
            .query_row(queries::SELECT_MESSAGE_BY_ID, params![message_ref], Self::row_to_message)
            .optional()?;
        Ok(msg)
    }

    /// Insert a message and its event in one transaction.
    ///
    /// A UID that already exists is left untouched and its stored ids are returned
    /// with `created = false`.
    pub fn insert_message_with_event(
        &self,
        extracted: &ExtractedMessage,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM messages WHERE uid = ?1",
                params![extracted.uid],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(message_ref) = existing {
            let event_ref: i64 = tx.query_row(
                "SELECT id FROM events WHERE message_ref = ?1",
                params![message_ref],
                |row| row.get(0),
            )?;
            return Ok(InsertOutcome {
                message_ref,
                event_ref,
                created: false,
            });
        }

        tx.execute(
            queries::INSERT_MESSAGE,
            params![
                extracted.uid,
                extracted.message_id,
                extracted.subject,
                extracted.sender,
                extracted.date.map(format_ts),
                extracted.raw_text,
                format_ts(now),
            ],
        )?;
        let message_ref = tx.last_insert_rowid();

        let ev = &extracted.event;
        tx.execute(
            queries::INSERT_EVENT,
            params![
                message_ref,
                ev.vendor_severity,
                ev.device,
                ev.event_type,
                ev.detection_name,
                ev.object_path,
                ev.process_name,
                ev.sha256,
                ev.user,
                ev.result,
                ev.event_time.map(format_ts),
                extracted.fingerprint,
                format_ts(now),
            ],
        )?;
        let event_ref = tx.last_insert_rowid();
        tx.commit()?;

        Ok(InsertOutcome {
            message_ref,
            event_ref,
            created: true,
        })
    }

    pub fn event_for_message(&self, message_ref: i64) -> Result<Option<IngestedEvent>> {
        let conn = self.conn()?;
        let ev = conn
            .query_row(
                queries::SELECT_EVENT_BY_MESSAGE,
                params![message_ref],
                Self::row_to_event,
            )
            .optional()?;
        Ok(ev)
    }

    /// Distinct devices that reported the same detection since `since`
    pub fn recent_devices_for_detection(
        &self,
        detection_name: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let Some(detection) = detection_name else {
            return Ok(Vec::new());
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_RECENT_DEVICES_FOR_DETECTION)?;
        let rows = stmt.query_map(params![detection, format_ts(since), limit], |row| {
            row.get::<_, String>(0)
        })?;

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for row in rows {
            let device = row?;
            if device.trim().is_empty() || !seen.insert(device.clone()) {
                continue;
            }
            devices.push(device);
        }
        Ok(devices)
    }

    // ===== Dedup =====

    /// Read-modify-write of one fingerprint's dedup state in a single transaction.
    ///
    /// `transition` receives the current record (if any) and returns the new record and
    /// the decision; the decision is also stored on the event row.
    pub fn apply_dedup<F>(
        &self,
        fingerprint: &str,
        event_ref: i64,
        transition: F,
    ) -> Result<DedupDecision>
    where
        F: FnOnce(Option<DedupRecord>) -> (DedupRecord, DedupDecision),
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(queries::SELECT_DEDUP, params![fingerprint], Self::row_to_dedup)
            .optional()?;
        let (record, decision) = transition(current);

        tx.execute(
            queries::UPSERT_DEDUP,
            params![
                record.fingerprint,
                format_ts(record.first_seen),
                format_ts(record.last_seen),
                record.count as i64,
                record.last_alert_at.map(format_ts),
                record.last_message_ref,
            ],
        )?;
        tx.execute(
            queries::UPDATE_EVENT_DECISION,
            params![event_ref, decision.should_alert, decision.count as i64],
        )?;
        tx.commit()?;

        Ok(decision)
    }

    pub fn dedup_record(&self, fingerprint: &str) -> Result<Option<DedupRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(queries::SELECT_DEDUP, params![fingerprint], Self::row_to_dedup)
            .optional()?;
        Ok(record)
    }

    // ===== Assets =====

    /// Make sure a host exists, creating it UNCLASSIFIED; returns its current class
    pub fn ensure_asset(&self, hostname: &str) -> Result<Option<AssetClass>> {
        let Some(hn) = clean(hostname) else {
            return Ok(None);
        };
        let conn = self.conn()?;
        conn.execute(queries::INSERT_ASSET_IF_MISSING, params![hn])?;
        let class: String =
            conn.query_row("SELECT class FROM assets WHERE hostname = ?1", params![hn], |row| {
                row.get(0)
            })?;
        Ok(Some(AssetClass::from(class.as_str())))
    }

    /// Create or reclassify a host
    pub fn upsert_asset(&self, hostname: &str, class: AssetClass) -> Result<Option<Asset>> {
        let Some(hn) = clean(hostname) else {
            return Ok(None);
        };
        let conn = self.conn()?;
        conn.execute(queries::UPSERT_ASSET, params![hn, class.as_str()])?;
        let asset = conn
            .query_row(queries::SELECT_ASSET_BY_HOSTNAME, params![hn], Self::row_to_asset)
            .optional()?;
        Ok(asset)
    }

    pub fn asset_by_hostname(&self, hostname: &str) -> Result<Option<Asset>> {
        let Some(hn) = clean(hostname) else {
            return Ok(None);
        };
        let conn = self.conn()?;
        let asset = conn
            .query_row(queries::SELECT_ASSET_BY_HOSTNAME, params![hn], Self::row_to_asset)
            .optional()?;
        Ok(asset)
    }

    pub fn asset_by_id(&self, asset_id: i64) -> Result<Option<Asset>> {
        let conn = self.conn()?;
        let asset = conn
            .query_row(queries::SELECT_ASSET_BY_ID, params![asset_id], Self::row_to_asset)
            .optional()?;
        Ok(asset)
    }

    pub fn asset_class(&self, hostname: Option<&str>) -> Result<Option<AssetClass>> {
        match hostname {
            Some(h) => Ok(self.asset_by_hostname(h)?.map(|a| a.class)),
            None => Ok(None),
        }
    }

    pub fn set_asset_class(&self, asset_id: i64, class: AssetClass) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(queries::UPDATE_ASSET_CLASS, params![asset_id, class.as_str()])?;
        Ok(n > 0)
    }

    /// All assets, unclassified first, then by hostname
    pub fn list_assets(&self) -> Result<Vec<Asset>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_ASSETS)?;
        let rows = stmt.query_map([], Self::row_to_asset)?;

        let mut assets = Vec::new();
        for row in rows {
            assets.push(row?);
        }
        assets.sort_by(|a, b| {
            a.class
                .listing_priority()
                .cmp(&b.class.listing_priority())
                .then_with(|| a.hostname.to_lowercase().cmp(&b.hostname.to_lowercase()))
        });
        Ok(assets)
    }

    pub fn list_servers(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_SERVERS)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut servers = Vec::new();
        for row in rows {
            servers.push(row?);
        }
        Ok(servers)
    }

    /// Delete an asset and its recipient bindings
    pub fn remove_asset(&self, asset_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(queries::DELETE_ASSET, params![asset_id])?;
        Ok(n > 0)
    }

    // ===== Recipients =====

    /// Create or update the single binding for (asset, address)
    pub fn upsert_recipient(
        &self,
        asset_id: i64,
        address: &str,
        operator_id: Option<&str>,
        min_risk: RiskLevel,
        enabled: bool,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            queries::UPSERT_RECIPIENT,
            params![
                asset_id,
                address.trim(),
                operator_id,
                min_risk.as_str(),
                enabled,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn recipients_for_asset(&self, asset_id: i64) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_RECIPIENTS_FOR_ASSET)?;
        let rows = stmt.query_map(params![asset_id], Self::row_to_recipient)?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }

    pub fn recipients_for_device(&self, device: Option<&str>) -> Result<Vec<Recipient>> {
        let Some(d) = device.and_then(clean) else {
            return Ok(Vec::new());
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_RECIPIENTS_FOR_DEVICE)?;
        let rows = stmt.query_map(params![d], Self::row_to_recipient)?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }

    pub fn delete_recipient(&self, recipient_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(queries::DELETE_RECIPIENT, params![recipient_id])?;
        Ok(n > 0)
    }

    pub fn unbind_recipient(&self, asset_id: i64, address: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            queries::DELETE_RECIPIENT_BY_ADDRESS,
            params![asset_id, address.trim()],
        )?;
        Ok(n > 0)
    }

    pub fn clear_recipients(&self, asset_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(queries::CLEAR_RECIPIENTS, params![asset_id])?;
        Ok(n)
    }

    // ===== Delivery receipts =====

    /// Store a receipt; returns false when one already exists for (message, address)
    pub fn insert_delivery(&self, receipt: &NewReceipt<'_>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            queries::INSERT_DELIVERY,
            params![
                receipt.message_ref,
                receipt.device.map(str::trim),
                receipt.address,
                receipt.handle,
                format_ts(receipt.sent_at),
                receipt.risk_level.as_str(),
                receipt.ai_enabled,
                receipt.model_used,
                receipt.fallback,
                receipt.text,
            ],
        )?;
        Ok(n > 0)
    }

    pub fn has_delivery(&self, message_ref: i64, address: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool =
            conn.query_row(queries::HAS_DELIVERY, params![message_ref, address], |row| {
                row.get(0)
            })?;
        Ok(exists)
    }

    /// Most recent receipt for a message, used by the replay path
    pub fn latest_delivery(&self, message_ref: i64) -> Result<Option<DeliveryReceipt>> {
        let conn = self.conn()?;
        let receipt = conn
            .query_row(
                queries::SELECT_LATEST_DELIVERY,
                params![message_ref],
                Self::row_to_receipt,
            )
            .optional()?;
        Ok(receipt)
    }

    pub fn delivery_by_id(&self, receipt_id: i64) -> Result<Option<DeliveryReceipt>> {
        let conn = self.conn()?;
        let receipt = conn
            .query_row(
                queries::SELECT_DELIVERY_BY_ID,
                params![receipt_id],
                Self::row_to_receipt,
            )
            .optional()?;
        Ok(receipt)
    }

    pub fn device_history(
        &self,
        device: &str,
        since: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HistoryEntry>> {
        let Some(d) = clean(device) else {
            return Ok(Vec::new());
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(queries::SELECT_DEVICE_HISTORY)?;
        let rows = stmt.query_map(params![d, format_ts(since), limit, offset], |row| {
            Ok(HistoryEntry {
                receipt_id: row.get(0)?,
                sent_at: ts_col(row, 1)?,
                risk_level: risk_col(row, 2)?,
                message_ref: row.get(3)?,
                model_used: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn count_device_history(&self, device: &str, since: DateTime<Utc>) -> Result<i64> {
        let Some(d) = clean(device) else {
            return Ok(0);
        };
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            queries::COUNT_DEVICE_HISTORY,
            params![d, format_ts(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ===== Operator interaction state =====

    /// Record a pending multi-step action for an operator, replacing any previous one
    pub fn begin_interaction(
        &self,
        operator_id: &str,
        kind: InteractionKind,
        asset_id: i64,
        min_risk: RiskLevel,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Interaction> {
        let interaction = Interaction {
            operator_id: operator_id.to_string(),
            kind,
            asset_id,
            min_risk,
            expires_at: now + ttl,
        };
        let conn = self.conn()?;
        conn.execute(
            queries::UPSERT_INTERACTION,
            params![
                interaction.operator_id,
                interaction.kind.to_string(),
                interaction.asset_id,
                interaction.min_risk.as_str(),
                format_ts(interaction.expires_at),
            ],
        )?;
        Ok(interaction)
    }

    /// Consume an operator's pending action; expired or unknown state yields `None`
    pub fn take_interaction(
        &self,
        operator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Interaction>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(queries::SELECT_INTERACTION, params![operator_id], |row| {
                let action: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    action,
                    row.get::<_, i64>(2)?,
                    risk_col(row, 3)?,
                    ts_col(row, 4)?,
                ))
            })
            .optional()?;
        tx.execute(queries::DELETE_INTERACTION, params![operator_id])?;
        tx.commit()?;

        let Some((operator_id, action, asset_id, min_risk, expires_at)) = row else {
            return Ok(None);
        };
        let Some(kind) = InteractionKind::parse(&action) else {
            return Ok(None);
        };
        let interaction = Interaction {
            operator_id,
            kind,
            asset_id,
            min_risk,
            expires_at,
        };
        if interaction.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(interaction))
    }

    // ===== Row mapping =====

    fn row_to_message(row: &Row) -> rusqlite::Result<IngestedMessage> {
        Ok(IngestedMessage {
            id: row.get(0)?,
            uid: row.get(1)?,
            message_id: row.get(2)?,
            subject: row.get(3)?,
            sender: row.get(4)?,
            received_at: opt_ts_col(row, 5)?,
            raw_text: row.get(6)?,
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<IngestedEvent> {
        let should_alert: Option<bool> = row.get(14)?;
        let repeat_count: Option<i64> = row.get(15)?;
        let decision = match (should_alert, repeat_count) {
            (Some(should_alert), Some(count)) => Some(DedupDecision {
                should_alert,
                count: count.max(0) as u64,
            }),
            _ => None,
        };

        Ok(IngestedEvent {
            id: row.get(0)?,
            message_ref: row.get(1)?,
            event: CanonicalEvent {
                vendor_severity: row.get(2)?,
                device: row.get(3)?,
                event_type: row.get(4)?,
                detection_name: row.get(5)?,
                object_path: row.get(6)?,
                process_name: row.get(7)?,
                sha256: row.get(8)?,
                user: row.get(9)?,
                result: row.get(10)?,
                event_time: opt_ts_col(row, 11)?,
            },
            fingerprint: row.get(12)?,
            created_at: ts_col(row, 13)?,
            decision,
        })
    }

    fn row_to_dedup(row: &Row) -> rusqlite::Result<DedupRecord> {
        let count: i64 = row.get(3)?;
        Ok(DedupRecord {
            fingerprint: row.get(0)?,
            first_seen: ts_col(row, 1)?,
            last_seen: ts_col(row, 2)?,
            count: count.max(0) as u64,
            last_alert_at: opt_ts_col(row, 4)?,
            last_message_ref: row.get(5)?,
        })
    }

    fn row_to_asset(row: &Row) -> rusqlite::Result<Asset> {
        let class: String = row.get(2)?;
        Ok(Asset {
            id: row.get(0)?,
            hostname: row.get(1)?,
            class: AssetClass::from(class.as_str()),
        })
    }

    fn row_to_recipient(row: &Row) -> rusqlite::Result<Recipient> {
        Ok(Recipient {
            id: row.get(0)?,
            asset_id: row.get(1)?,
            address: row.get(2)?,
            operator_id: row.get(3)?,
            min_risk: risk_col(row, 4)?,
            enabled: row.get(5)?,
            created_at: ts_col(row, 6)?,
        })
    }

    fn row_to_receipt(row: &Row) -> rusqlite::Result<DeliveryReceipt> {
        Ok(DeliveryReceipt {
            id: row.get(0)?,
            message_ref: row.get(1)?,
            device: row.get(2)?,
            address: row.get(3)?,
            handle: row.get(4)?,
            sent_at: ts_col(row, 5)?,
            risk_level: risk_col(row, 6)?,
            ai_enabled: row.get(7)?,
            model_used: row.get(8)?,
            fallback: row.get(9)?,
            text: row.get(10)?,
        })
    }
}
