use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};

use aidconnect_shared::constants::MAX_MESSAGE_LENGTH;
use aidconnect_shared::types::{MessageId, SessionId, UserId};
use aidconnect_shared::{MessageContent, ValidationError};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{normalized_pair, Message};
use crate::row::{enum_col, json_col, opt_ts_col, ts, ts_col, uuid_col};

const MESSAGE_COLUMNS: &str =
    "m.id, m.session_id, m.sender_id, m.receiver_id, m.body, m.kind, m.metadata, m.status, m.created_at, m.read_at";

impl Database {
    /// Persist a new message. Rejects self-messages and bodies that do not
    /// fit the declared content before touching the table.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        check_message(message)?;

        let metadata = message
            .content
            .metadata()
            .map(|m| serde_json::to_string(&m))
            .transpose()?;

        self.conn()
            .execute(
                "INSERT INTO messages (id, session_id, sender_id, receiver_id, body, kind, metadata,
                     status, created_at, read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.id.to_string(),
                    message.session_id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.text,
                    message.content.kind(),
                    metadata,
                    message.status.as_str(),
                    ts(&message.created_at),
                    message.read_at.as_ref().map(ts),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// All messages of a session, oldest first.
    pub fn list_messages_for_session(&self, session_id: SessionId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.session_id = ?1
             ORDER BY m.created_at ASC, m.rowid ASC"
        ))?;

        let rows = stmt.query_map(params![session_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Peer messages exchanged between `a` and `b` in either direction,
    /// oldest first. Chat room traffic is not included.
    pub fn list_messages_between(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let [low, high] = normalized_pair(a, b);
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             JOIN chat_sessions s ON s.id = m.session_id
             WHERE s.scope = 'peer' AND s.participant_low = ?1 AND s.participant_high = ?2
             ORDER BY m.created_at ASC, m.rowid ASC"
        ))?;

        let rows = stmt.query_map(params![low.to_string(), high.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages in `session_id` addressed to `user` that are not read yet.
    pub fn count_unread(&self, user: UserId, session_id: SessionId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND session_id = ?2 AND status <> 'read'",
            params![user.to_string(), session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Flip the given messages to `read`.
    ///
    /// Only messages whose receiver is `user` are touched; ids that belong to
    /// someone else, or that do not exist, are skipped without error. Returns
    /// the number of rows that changed.
    pub fn mark_read(&self, ids: &[MessageId], user: UserId, at: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE messages SET status = 'read', read_at = ?1
             WHERE receiver_id = ?2 AND status <> 'read' AND id IN ({placeholders})"
        );

        let mut values = vec![ts(&at), user.to_string()];
        values.extend(ids.iter().map(|id| id.to_string()));

        let affected = self.conn().execute(&sql, params_from_iter(values))?;
        tracing::debug!(user = %user, requested = ids.len(), affected, "marked messages read");
        Ok(affected)
    }

    /// Mark everything `peer` sent to `user` in their peer conversation as read.
    pub fn mark_read_from_peer(&self, peer: UserId, user: UserId, at: DateTime<Utc>) -> Result<usize> {
        let [low, high] = normalized_pair(peer, user);
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'read', read_at = ?1
             WHERE sender_id = ?2 AND receiver_id = ?3 AND status <> 'read'
               AND session_id IN (
                   SELECT id FROM chat_sessions
                   WHERE scope = 'peer' AND participant_low = ?4 AND participant_high = ?5
               )",
            params![
                ts(&at),
                peer.to_string(),
                user.to_string(),
                low.to_string(),
                high.to_string()
            ],
        )?;
        Ok(affected)
    }
}

fn check_message(message: &Message) -> std::result::Result<(), ValidationError> {
    if message.sender_id == message.receiver_id {
        return Err(ValidationError::SelfMessage);
    }
    if message.text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::TextTooLong {
            max: MAX_MESSAGE_LENGTH,
        });
    }
    if matches!(message.content, MessageContent::Text) && message.text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(5)?;
    let metadata = json_col(row, 6)?;
    let content = MessageContent::from_parts(Some(&kind), metadata.as_ref()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: uuid_col(row, 0)?,
        session_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        receiver_id: uuid_col(row, 3)?,
        text: row.get(4)?,
        content,
        status: enum_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        read_at: opt_ts_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use aidconnect_shared::types::MessageStatus;

    use super::*;
    use crate::models::{ChatSession, SessionScope};
    use crate::row::now;

    fn peer_session(db: &Database, a: UserId, b: UserId) -> ChatSession {
        let session = ChatSession::new(SessionScope::Peer, a, b, now());
        db.insert_session(&session).unwrap();
        session
    }

    fn message(session: &ChatSession, from: UserId, to: UserId, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            session_id: session.id,
            sender_id: from,
            receiver_id: to,
            text: text.into(),
            content: MessageContent::Text,
            status: MessageStatus::Sent,
            created_at: now(),
            read_at: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);

        let mut msg = message(&session, a, b, "at the corner");
        msg.content = MessageContent::Location { lat: -6.2, lng: 106.8 };
        db.insert_message(&msg).unwrap();

        assert_eq!(db.get_message(msg.id).unwrap(), msg);
    }

    #[test]
    fn test_self_message_never_persisted() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);

        let msg = message(&session, a, a, "hello me");
        let err = db.insert_message(&msg).unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::SelfMessage)));
        assert!(matches!(db.get_message(msg.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_empty_text_rejected_but_image_may_be_blank() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);

        let err = db.insert_message(&message(&session, a, b, "   ")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::EmptyText)));

        let mut image = message(&session, a, b, "");
        image.content = MessageContent::Image {
            url: "/uploads/photo.jpg".into(),
        };
        db.insert_message(&image).unwrap();
    }

    #[test]
    fn test_list_orders_by_creation() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);

        let first = message(&session, a, b, "one");
        let mut second = message(&session, b, a, "two");
        second.created_at = first.created_at;
        let third = message(&session, a, b, "three");
        for m in [&first, &second, &third] {
            db.insert_message(m).unwrap();
        }

        let texts: Vec<_> = db
            .list_messages_for_session(session.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);

        let between = db.list_messages_between(b, a).unwrap();
        assert_eq!(between.len(), 3);
    }

    #[test]
    fn test_unread_count_and_scoped_mark_read() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);

        let to_b_1 = message(&session, a, b, "m1");
        let to_b_2 = message(&session, a, b, "m2");
        let to_a = message(&session, b, a, "m3");
        for m in [&to_b_1, &to_b_2, &to_a] {
            db.insert_message(m).unwrap();
        }
        assert_eq!(db.count_unread(b, session.id).unwrap(), 2);
        assert_eq!(db.count_unread(a, session.id).unwrap(), 1);

        // b tries to mark a message addressed to a as well; it is skipped.
        let at = now();
        let changed = db
            .mark_read(&[to_b_1.id, to_b_2.id, to_a.id, MessageId::new()], b, at)
            .unwrap();
        assert_eq!(changed, 2);

        let read = db.get_message(to_b_1.id).unwrap();
        assert_eq!(read.status, MessageStatus::Read);
        assert_eq!(read.read_at, Some(at));
        assert_eq!(db.get_message(to_a.id).unwrap().status, MessageStatus::Sent);
        assert_eq!(db.count_unread(b, session.id).unwrap(), 0);
    }

    #[test]
    fn test_mark_read_from_peer() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let session = peer_session(&db, a, b);
        db.insert_message(&message(&session, a, b, "hi")).unwrap();
        db.insert_message(&message(&session, b, a, "hey")).unwrap();

        assert_eq!(db.mark_read_from_peer(a, b, now()).unwrap(), 1);
        assert_eq!(db.count_unread(b, session.id).unwrap(), 0);
        assert_eq!(db.count_unread(a, session.id).unwrap(), 1);
    }

    #[test]
    fn test_mark_read_empty_is_noop() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.mark_read(&[], UserId::new(), now()).unwrap(), 0);
    }
}
