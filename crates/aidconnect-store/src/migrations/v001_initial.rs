//! v001 -- Initial schema creation.
//!
//! Creates the directory mirror (`users`, `help_requests`), the unified
//! `chat_sessions` table, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirrored from the user directory)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID
    name            TEXT NOT NULL,
    role            TEXT NOT NULL,               -- requester | volunteer | admin
    profile_picture TEXT,
    created_at      TEXT NOT NULL                -- RFC-3339, microseconds
);

-- ----------------------------------------------------------------
-- Help requests (mirrored from the request workflow)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS help_requests (
    id           TEXT PRIMARY KEY NOT NULL,
    title        TEXT NOT NULL,
    status       TEXT NOT NULL,                  -- pending | in_progress | completed | cancelled
    requester_id TEXT NOT NULL,
    volunteer_id TEXT,
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chat sessions: peer conversations and request-scoped chat rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_sessions (
    id               TEXT PRIMARY KEY NOT NULL,
    scope            TEXT NOT NULL CHECK (scope IN ('peer', 'request')),
    participant_low  TEXT NOT NULL,              -- participants, sorted
    participant_high TEXT NOT NULL,
    request_id       TEXT,                       -- request scope only
    requester_id     TEXT,
    volunteer_id     TEXT,
    last_message_id  TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,

    CHECK (participant_low < participant_high),
    CHECK ((scope = 'peer') = (request_id IS NULL))
);

-- At most one peer conversation per unordered pair.
CREATE UNIQUE INDEX IF NOT EXISTS ux_chat_sessions_peer_pair
    ON chat_sessions(participant_low, participant_high)
    WHERE scope = 'peer';

-- At most one chat room per request.
CREATE UNIQUE INDEX IF NOT EXISTS ux_chat_sessions_request
    ON chat_sessions(request_id)
    WHERE request_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_chat_sessions_low
    ON chat_sessions(participant_low, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_chat_sessions_high
    ON chat_sessions(participant_high, updated_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,
    session_id  TEXT NOT NULL,                   -- FK -> chat_sessions(id)
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    body        TEXT NOT NULL,
    kind        TEXT NOT NULL,                   -- text | image | location
    metadata    TEXT,                            -- JSON, shape checked on write
    status      TEXT NOT NULL DEFAULT 'sent',    -- sent | delivered | read
    created_at  TEXT NOT NULL,
    read_at     TEXT,

    CHECK (sender_id <> receiver_id),
    FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session_ts
    ON messages(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(receiver_id, session_id, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
