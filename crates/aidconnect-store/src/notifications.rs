//! Notification persistence. Every operation is scoped to the recipient.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};

use aidconnect_shared::types::{NotificationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewNotification, Notification};
use crate::row::{enum_col, json_col, now, opt_ts_col, opt_uuid_col, ts, ts_col, uuid_col};

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, request_id, kind, title, message, data, read, read_at, created_at";

impl Database {
    pub fn insert_notification(&self, new: NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: NotificationId::new(),
            recipient_id: new.recipient_id,
            sender_id: new.sender_id,
            request_id: new.request_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            data: new.data,
            read: false,
            read_at: None,
            created_at: now(),
        };

        self.conn()
            .execute(
                "INSERT INTO notifications (id, recipient_id, sender_id, request_id, kind, title,
                     message, data, read, read_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
                params![
                    notification.id.to_string(),
                    notification.recipient_id.to_string(),
                    notification.sender_id.map(|s| s.to_string()),
                    notification.request_id.map(|r| r.to_string()),
                    notification.kind.as_str(),
                    notification.title,
                    notification.message,
                    serde_json::to_string(&notification.data)?,
                    ts(&notification.created_at),
                ],
            )
            .map_err(StoreError::from_insert)?;

        Ok(notification)
    }

    /// Newest first, at most `limit` rows.
    pub fn list_notifications(&self, user: UserId, limit: u32) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![user.to_string(), limit], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn count_unread_notifications(&self, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
            params![user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Mark one notification read and return it.
    ///
    /// A notification that belongs to someone else is reported as
    /// [`StoreError::NotFound`], same as one that does not exist. Marking an
    /// already read notification keeps its original `read_at`.
    pub fn mark_notification_read(
        &self,
        id: NotificationId,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Notification> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1, read_at = COALESCE(read_at, ?3)
             WHERE id = ?1 AND recipient_id = ?2",
            params![id.to_string(), user.to_string(), ts(&at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        self.conn()
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(StoreError::from_query)
    }

    pub fn mark_all_notifications_read(&self, user: UserId, at: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1, read_at = ?2
             WHERE recipient_id = ?1 AND read = 0",
            params![user.to_string(), ts(&at)],
        )?;
        Ok(affected)
    }

    /// Delete the given notifications of `user`; other users' ids are ignored.
    pub fn delete_notifications(&self, ids: &[NotificationId], user: UserId) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM notifications WHERE recipient_id = ?1 AND id IN ({placeholders})"
        );

        let mut values = vec![user.to_string()];
        values.extend(ids.iter().map(|id| id.to_string()));

        Ok(self.conn().execute(&sql, params_from_iter(values))?)
    }

    pub fn delete_read_notifications(&self, user: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE recipient_id = ?1 AND read = 1",
            params![user.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_col(row, 0)?,
        recipient_id: uuid_col(row, 1)?,
        sender_id: opt_uuid_col(row, 2)?,
        request_id: opt_uuid_col(row, 3)?,
        kind: enum_col(row, 4)?,
        title: row.get(5)?,
        message: row.get(6)?,
        data: json_col(row, 7)?.unwrap_or_default(),
        read: row.get::<_, i64>(8)? != 0,
        read_at: opt_ts_col(row, 9)?,
        created_at: ts_col(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use aidconnect_shared::types::NotificationType;
    use serde_json::json;

    use super::*;

    fn new_message_for(user: UserId) -> NewNotification {
        NewNotification {
            recipient_id: user,
            sender_id: Some(UserId::new()),
            request_id: None,
            kind: NotificationType::NewMessage,
            title: "New Message".into(),
            message: "You have a new message".into(),
            data: json!({ "messageId": "m-1" }),
        }
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();
        let first = db.insert_notification(new_message_for(user)).unwrap();
        let second = db.insert_notification(new_message_for(user)).unwrap();
        db.insert_notification(new_message_for(UserId::new())).unwrap();

        let listed = db.list_notifications(user, 50).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1], first);
        assert_eq!(listed[1].data["messageId"], "m-1");

        assert_eq!(db.list_notifications(user, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_read_is_recipient_scoped() {
        let db = Database::open_in_memory().unwrap();
        let owner = UserId::new();
        let n = db.insert_notification(new_message_for(owner)).unwrap();

        let err = db.mark_notification_read(n.id, UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert_eq!(db.count_unread_notifications(owner).unwrap(), 1);

        let at = now();
        let read = db.mark_notification_read(n.id, owner, at).unwrap();
        assert!(read.read);
        assert_eq!(read.read_at, Some(at));
        assert_eq!(db.count_unread_notifications(owner).unwrap(), 0);
    }

    #[test]
    fn test_mark_all_then_delete_read() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();
        for _ in 0..3 {
            db.insert_notification(new_message_for(user)).unwrap();
        }

        assert_eq!(db.mark_all_notifications_read(user, now()).unwrap(), 3);
        db.insert_notification(new_message_for(user)).unwrap();

        assert_eq!(db.delete_read_notifications(user).unwrap(), 3);
        let left = db.list_notifications(user, 50).unwrap();
        assert_eq!(left.len(), 1);
        assert!(!left[0].read);
    }

    #[test]
    fn test_delete_ignores_foreign_ids() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();
        let other = UserId::new();
        let mine = db.insert_notification(new_message_for(user)).unwrap();
        let theirs = db.insert_notification(new_message_for(other)).unwrap();

        assert_eq!(db.delete_notifications(&[mine.id, theirs.id], user).unwrap(), 1);
        assert_eq!(db.list_notifications(other, 50).unwrap().len(), 1);
        assert_eq!(db.delete_notifications(&[], user).unwrap(), 0);
    }
}
