//! Database query definitions

pub const SELECT_MESSAGE_BY_UID: &str = r#"
    SELECT id, uid, message_id, subject, sender, received_at, raw_text
    FROM messages
    WHERE uid = ?1
"#;

pub const SELECT_MESSAGE_BY_ID: &str = r#"
    SELECT id, uid, message_id, subject, sender, received_at, raw_text
    FROM messages
    WHERE id = ?1
"#;

pub const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (uid, message_id, subject, sender, received_at, raw_text, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

pub const INSERT_EVENT: &str = r#"
    INSERT INTO events (
        message_ref, vendor_severity, device, event_type, detection_name, object_path,
        process_name, sha256, user_name, result, event_time, fingerprint, created_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
"#;

pub const SELECT_EVENT_BY_MESSAGE: &str = r#"
    SELECT id, message_ref, vendor_severity, device, event_type, detection_name, object_path,
           process_name, sha256, user_name, result, event_time, fingerprint, created_at,
           should_alert, repeat_count
    FROM events
    WHERE message_ref = ?1
"#;

pub const UPDATE_EVENT_DECISION: &str = r#"
    UPDATE events SET should_alert = ?2, repeat_count = ?3 WHERE id = ?1
"#;

pub const SELECT_DEDUP: &str = r#"
    SELECT fingerprint, first_seen, last_seen, count, last_alert_at, last_message_ref
    FROM dedup
    WHERE fingerprint = ?1
"#;

pub const UPSERT_DEDUP: &str = r#"
    INSERT INTO dedup (fingerprint, first_seen, last_seen, count, last_alert_at, last_message_ref)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(fingerprint) DO UPDATE SET
        last_seen = excluded.last_seen,
        count = excluded.count,
        last_alert_at = excluded.last_alert_at,
        last_message_ref = excluded.last_message_ref
"#;

pub const INSERT_ASSET_IF_MISSING: &str = r#"
    INSERT OR IGNORE INTO assets (hostname, class) VALUES (?1, 'UNCLASSIFIED')
"#;

pub const UPSERT_ASSET: &str = r#"
    INSERT INTO assets (hostname, class) VALUES (?1, ?2)
    ON CONFLICT(hostname) DO UPDATE SET class = excluded.class
"#;

pub const SELECT_ASSET_BY_HOSTNAME: &str = r#"
    SELECT id, hostname, class FROM assets WHERE hostname = ?1
"#;

pub const SELECT_ASSET_BY_ID: &str = r#"
    SELECT id, hostname, class FROM assets WHERE id = ?1
"#;

pub const SELECT_ASSETS: &str = r#"
    SELECT id, hostname, class FROM assets
"#;

pub const SELECT_SERVERS: &str = r#"
    SELECT hostname FROM assets WHERE class = 'SERVER' ORDER BY hostname
"#;

pub const UPDATE_ASSET_CLASS: &str = r#"
    UPDATE assets SET class = ?2 WHERE id = ?1
"#;

pub const DELETE_ASSET: &str = r#"
    DELETE FROM assets WHERE id = ?1
"#;

pub const UPSERT_RECIPIENT: &str = r#"
    INSERT INTO recipients (asset_id, address, operator_id, min_risk, enabled, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(asset_id, address) DO UPDATE SET
        operator_id = excluded.operator_id,
        min_risk = excluded.min_risk,
        enabled = excluded.enabled
"#;

pub const SELECT_RECIPIENTS_FOR_ASSET: &str = r#"
    SELECT id, asset_id, address, operator_id, min_risk, enabled, created_at
    FROM recipients
    WHERE asset_id = ?1
    ORDER BY id
"#;

pub const SELECT_RECIPIENTS_FOR_DEVICE: &str = r#"
    SELECT r.id, r.asset_id, r.address, r.operator_id, r.min_risk, r.enabled, r.created_at
    FROM recipients r
    JOIN assets a ON a.id = r.asset_id
    WHERE a.hostname = ?1
    ORDER BY r.id
"#;

pub const DELETE_RECIPIENT: &str = r#"
    DELETE FROM recipients WHERE id = ?1
"#;

pub const DELETE_RECIPIENT_BY_ADDRESS: &str = r#"
    DELETE FROM recipients WHERE asset_id = ?1 AND address = ?2
"#;

pub const CLEAR_RECIPIENTS: &str = r#"
    DELETE FROM recipients WHERE asset_id = ?1
"#;

pub const INSERT_DELIVERY: &str = r#"
    INSERT OR IGNORE INTO deliveries (
        message_ref, device, address, handle, sent_at, risk_level,
        ai_enabled, model_used, fallback, text
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#;

pub const HAS_DELIVERY: &str = r#"
    SELECT EXISTS(SELECT 1 FROM deliveries WHERE message_ref = ?1 AND address = ?2)
"#;

pub const SELECT_LATEST_DELIVERY: &str = r#"
    SELECT id, message_ref, device, address, handle, sent_at, risk_level,
           ai_enabled, model_used, fallback, text
    FROM deliveries
    WHERE message_ref = ?1
    ORDER BY id DESC
    LIMIT 1
"#;

pub const SELECT_DELIVERY_BY_ID: &str = r#"
    SELECT id, message_ref, device, address, handle, sent_at, risk_level,
           ai_enabled, model_used, fallback, text
    FROM deliveries
    WHERE id = ?1
"#;

pub const SELECT_DEVICE_HISTORY: &str = r#"
    SELECT id, sent_at, risk_level, message_ref, model_used
    FROM deliveries
    WHERE device = ?1 AND sent_at >= ?2
    ORDER BY sent_at DESC, id DESC
    LIMIT ?3 OFFSET ?4
"#;

pub const COUNT_DEVICE_HISTORY: &str = r#"
    SELECT COUNT(*) FROM deliveries WHERE device = ?1 AND sent_at >= ?2
"#;

pub const SELECT_RECENT_DEVICES_FOR_DETECTION: &str = r#"
    SELECT device FROM events
    WHERE detection_name = ?1 AND created_at >= ?2 AND device IS NOT NULL
    ORDER BY id
    LIMIT ?3
"#;

pub const UPSERT_INTERACTION: &str = r#"
    INSERT INTO operator_sessions (operator_id, action, asset_id, min_risk, expires_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(operator_id) DO UPDATE SET
        action = excluded.action,
        asset_id = excluded.asset_id,
        min_risk = excluded.min_risk,
        expires_at = excluded.expires_at
"#;

pub const SELECT_INTERACTION: &str = r#"
    SELECT operator_id, action, asset_id, min_risk, expires_at
    FROM operator_sessions
    WHERE operator_id = ?1
"#;

pub const DELETE_INTERACTION: &str = r#"
    DELETE FROM operator_sessions WHERE operator_id = ?1
"#;
