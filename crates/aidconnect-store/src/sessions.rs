//! CRUD operations for [`ChatSession`] records.
//!
//! Uniqueness is enforced by the schema, not by lookups: inserting a second
//! peer session for the same pair, or a second room for the same request,
//! fails with [`StoreError::DuplicateKey`].

use chrono::{DateTime, Utc};
use rusqlite::params;

use aidconnect_shared::types::{MessageId, RequestId, SessionId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{normalized_pair, ChatSession, SessionScope};
use crate::row::{opt_uuid_col, ts, ts_col, uuid_col};

const SESSION_COLUMNS: &str = "id, scope, participant_low, participant_high, request_id,
     requester_id, volunteer_id, last_message_id, created_at, updated_at";

/// Which kind of sessions a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Peer,
    Request,
}

impl ScopeFilter {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Request => "request",
        }
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_session(&self, session: &ChatSession) -> Result<()> {
        let [low, high] = normalized_pair(session.participants[0], session.participants[1]);
        if low == high {
            return Err(StoreError::Validation(aidconnect_shared::ValidationError::Other(
                "a chat session needs two distinct participants".into(),
            )));
        }

        let (request_id, requester_id, volunteer_id) = match &session.scope {
            SessionScope::Peer => (None, None, None),
            SessionScope::Request {
                request_id,
                requester_id,
                volunteer_id,
            } => (
                Some(request_id.to_string()),
                Some(requester_id.to_string()),
                Some(volunteer_id.to_string()),
            ),
        };

        self.conn()
            .execute(
                "INSERT INTO chat_sessions (id, scope, participant_low, participant_high, request_id,
                     requester_id, volunteer_id, last_message_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.id.to_string(),
                    session.scope.as_str(),
                    low.to_string(),
                    high.to_string(),
                    request_id,
                    requester_id,
                    volunteer_id,
                    session.last_message_id.map(|m| m.to_string()),
                    ts(&session.created_at),
                    ts(&session.updated_at),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_session(&self, id: SessionId) -> Result<ChatSession> {
        self.conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .map_err(StoreError::from_query)
    }

    /// The peer conversation between `a` and `b`, in either order.
    pub fn find_peer_session(&self, a: UserId, b: UserId) -> Result<Option<ChatSession>> {
        let [low, high] = normalized_pair(a, b);
        self.optional_session(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM chat_sessions
                 WHERE scope = 'peer' AND participant_low = ?1 AND participant_high = ?2"
            ),
            params![low.to_string(), high.to_string()],
        )
    }

    pub fn find_session_by_request(&self, request_id: RequestId) -> Result<Option<ChatSession>> {
        self.optional_session(
            &format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE request_id = ?1"),
            params![request_id.to_string()],
        )
    }

    /// Sessions `user` takes part in, most recently active first.
    pub fn list_sessions_for_user(
        &self,
        user: UserId,
        filter: Option<ScopeFilter>,
    ) -> Result<Vec<ChatSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions
             WHERE (participant_low = ?1 OR participant_high = ?1)
               AND (?2 IS NULL OR scope = ?2)
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(
            params![user.to_string(), filter.map(|f| f.as_str())],
            row_to_session,
        )?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Point the session at its newest message and bump `updated_at`.
    pub fn touch_session(
        &self,
        id: SessionId,
        last_message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chat_sessions SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), last_message_id.to_string(), ts(&at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn optional_session(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<ChatSession>> {
        match self.conn().query_row(sql, params, row_to_session) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
    let scope_str: String = row.get(1)?;
    let request_id: Option<RequestId> = opt_uuid_col(row, 4)?;
    let requester_id: Option<UserId> = opt_uuid_col(row, 5)?;
    let volunteer_id: Option<UserId> = opt_uuid_col(row, 6)?;

    let scope = match (scope_str.as_str(), request_id, requester_id, volunteer_id) {
        ("peer", ..) => SessionScope::Peer,
        ("request", Some(request_id), Some(requester_id), Some(volunteer_id)) => {
            SessionScope::Request {
                request_id,
                requester_id,
                volunteer_id,
            }
        }
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                format!("scope={scope_str}"),
                rusqlite::types::Type::Text,
            ))
        }
    };

    Ok(ChatSession {
        id: uuid_col(row, 0)?,
        scope,
        participants: [uuid_col(row, 2)?, uuid_col(row, 3)?],
        last_message_id: opt_uuid_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}
