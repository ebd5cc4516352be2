//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `contacts`, `groups`, `group_members` and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts (one row per unordered identity pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    peer_low      TEXT NOT NULL,              -- lexicographically smaller identity
    peer_high     TEXT NOT NULL,
    invite_code   TEXT NOT NULL,
    display_names TEXT NOT NULL,              -- JSON object: viewer -> name
    created_at    TEXT NOT NULL,              -- RFC-3339, microseconds

    UNIQUE (peer_low, peer_high)
);

CREATE INDEX IF NOT EXISTS idx_contacts_peer_high ON contacts(peer_high);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4, doubles as channel id
    name       TEXT NOT NULL,
    creator    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    member   TEXT NOT NULL,

    PRIMARY KEY (group_id, member),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_member ON group_members(member);

-- ----------------------------------------------------------------
-- Messages (direct and group)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    sender    TEXT NOT NULL,
    target    TEXT NOT NULL,                  -- peer identity or group id
    content   TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    is_group  INTEGER NOT NULL DEFAULT 0      -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(is_group, sender, target, timestamp);

CREATE INDEX IF NOT EXISTS idx_messages_target_ts
    ON messages(target, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
