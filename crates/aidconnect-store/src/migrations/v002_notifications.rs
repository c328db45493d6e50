use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id           TEXT PRIMARY KEY NOT NULL,
    recipient_id TEXT NOT NULL,
    sender_id    TEXT,
    request_id   TEXT,
    kind         TEXT NOT NULL,                  -- closed set, see NotificationType
    title        TEXT NOT NULL,
    message      TEXT NOT NULL,
    data         TEXT NOT NULL DEFAULT '{}',     -- opaque JSON for client routing
    read         INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    read_at      TEXT,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient_ts
    ON notifications(recipient_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_recipient_read
    ON notifications(recipient_id, read);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
