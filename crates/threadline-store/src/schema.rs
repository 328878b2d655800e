/// SQL DDL for the threadline database.
/// Event logs, version metadata and shares are independent tables joined
/// only by session id.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(app_name, user_id, updated_at);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    author TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    partial INTEGER NOT NULL DEFAULT 0,
    turn_complete INTEGER NOT NULL DEFAULT 0,
    content TEXT,
    FOREIGN KEY (app_name, user_id, session_id)
        REFERENCES sessions(app_name, user_id, id) ON DELETE CASCADE,
    UNIQUE (app_name, user_id, session_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_events_session ON events(app_name, user_id, session_id, sequence);

CREATE TABLE IF NOT EXISTS session_meta (
    session_id TEXT PRIMARY KEY,
    thread_id TEXT,
    version INTEGER,
    parent_session_id TEXT NOT NULL DEFAULT '',
    edited_from_message_id TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_meta_thread ON session_meta(thread_id, version);

CREATE TABLE IF NOT EXISTS shares (
    share_id TEXT PRIMARY KEY,
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    accessed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shares_owner ON shares(user_id, created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
