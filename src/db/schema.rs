//! Database schema definitions

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL UNIQUE,
        message_id TEXT,
        subject TEXT,
        sender TEXT,
        received_at TEXT,
        raw_text TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_ref INTEGER NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
        vendor_severity TEXT,
        device TEXT,
        event_type TEXT,
        detection_name TEXT,
        object_path TEXT,
        process_name TEXT,
        sha256 TEXT,
        user_name TEXT,
        result TEXT,
        event_time TEXT,
        fingerprint TEXT NOT NULL,
        created_at TEXT NOT NULL,
        should_alert INTEGER,
        repeat_count INTEGER
    );

    CREATE TABLE IF NOT EXISTS dedup (
        fingerprint TEXT PRIMARY KEY,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        count INTEGER NOT NULL,
        last_alert_at TEXT,
        last_message_ref INTEGER
    );

    CREATE TABLE IF NOT EXISTS assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hostname TEXT NOT NULL UNIQUE,
        class TEXT NOT NULL DEFAULT 'UNCLASSIFIED'
    );

    CREATE TABLE IF NOT EXISTS recipients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
        address TEXT NOT NULL,
        operator_id TEXT,
        min_risk TEXT NOT NULL DEFAULT 'MEDIUM',
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        UNIQUE(asset_id, address)
    );

    CREATE TABLE IF NOT EXISTS deliveries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_ref INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        device TEXT,
        address TEXT NOT NULL,
        handle TEXT NOT NULL,
        sent_at TEXT NOT NULL,
        risk_level TEXT NOT NULL,
        ai_enabled INTEGER NOT NULL DEFAULT 0,
        model_used TEXT,
        fallback TEXT,
        text TEXT NOT NULL,
        UNIQUE(message_ref, address)
    );

    CREATE TABLE IF NOT EXISTS operator_sessions (
        operator_id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        asset_id INTEGER NOT NULL,
        min_risk TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );

    -- Indexes for faster queries
    CREATE INDEX IF NOT EXISTS idx_events_device ON events(device);
    CREATE INDEX IF NOT EXISTS idx_events_fingerprint ON events(fingerprint);
    CREATE INDEX IF NOT EXISTS idx_events_detection ON events(detection_name, created_at);
    CREATE INDEX IF NOT EXISTS idx_recipients_asset ON recipients(asset_id);
    CREATE INDEX IF NOT EXISTS idx_deliveries_device ON deliveries(device, sent_at);
"#;

/// Data hygiene applied on every open
pub const NORMALIZE_ASSETS: &str = r#"
    UPDATE assets SET class = 'UNCLASSIFIED'
    WHERE class IS NULL OR TRIM(class) = '' OR class NOT IN ('UNCLASSIFIED', 'SERVER', 'WORKSTATION');

    INSERT OR IGNORE INTO assets (hostname, class)
    SELECT DISTINCT TRIM(device), 'UNCLASSIFIED' FROM events
    WHERE device IS NOT NULL AND TRIM(device) != '';
"#;
