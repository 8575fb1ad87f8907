//! SQL schema.

/// Schema version recorded in `meta`.
pub const SCHEMA_VERSION: i32 = 1;

/// Idempotent schema creation script.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identity (
    uuid TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    secret_key BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contact (
    uuid TEXT PRIMARY KEY,
    identity_uuid TEXT NOT NULL,
    name TEXT NOT NULL,
    pubkey BLOB NOT NULL,
    onion_address TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (identity_uuid, pubkey)
);

CREATE TABLE IF NOT EXISTS conversation (
    uuid TEXT PRIMARY KEY,
    identity_uuid TEXT NOT NULL,
    participant_uuid TEXT NOT NULL,
    name TEXT NOT NULL,
    topic TEXT NOT NULL,
    last_activity INTEGER NOT NULL,
    hash BLOB NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS message (
    id INTEGER PRIMARY KEY,
    conversation_uuid TEXT NOT NULL,
    direction INTEGER NOT NULL,
    composed_time INTEGER NOT NULL,
    sent_received_time INTEGER,
    encoding TEXT NOT NULL,
    content TEXT NOT NULL,
    sender_hash BLOB NOT NULL,
    message_id BLOB NOT NULL UNIQUE,
    conversation_hash BLOB NOT NULL,
    signature BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_conversation
    ON message (conversation_uuid, composed_time);

CREATE TABLE IF NOT EXISTS file (
    id INTEGER PRIMARY KEY,
    file_id BLOB NOT NULL UNIQUE,
    state INTEGER NOT NULL,
    direction INTEGER NOT NULL,
    identity_uuid TEXT NOT NULL,
    conversation_uuid TEXT NOT NULL,
    contact_uuid TEXT NOT NULL,
    hash BLOB,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    file_time INTEGER NOT NULL,
    created_time INTEGER NOT NULL,
    ack_time INTEGER,
    bytes_transferred INTEGER NOT NULL DEFAULT 0
);
"#;
