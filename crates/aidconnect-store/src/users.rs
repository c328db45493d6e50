//! Local mirror of the user directory and of help requests.
//!
//! Both are owned by external collaborators; this service only reads them to
//! validate receivers, participants and request state.

use rusqlite::params;

use aidconnect_shared::types::{RequestId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{HelpRequest, User};
use crate::row::{enum_col, opt_uuid_col, ts, ts_col, uuid_col};

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a user or refresh its profile fields.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, role, profile_picture, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                profile_picture = excluded.profile_picture",
            params![
                user.id.to_string(),
                user.name,
                user.role.as_str(),
                user.profile_picture,
                ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, role, profile_picture, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    // ------------------------------------------------------------------
    // Help requests
    // ------------------------------------------------------------------

    pub fn upsert_request(&self, request: &HelpRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO help_requests (id, title, status, requester_id, volunteer_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                requester_id = excluded.requester_id,
                volunteer_id = excluded.volunteer_id,
                updated_at = excluded.updated_at",
            params![
                request.id.to_string(),
                request.title,
                request.status.as_str(),
                request.requester_id.to_string(),
                request.volunteer_id.map(|v| v.to_string()),
                ts(&request.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_request(&self, id: RequestId) -> Result<HelpRequest> {
        self.conn()
            .query_row(
                "SELECT id, title, status, requester_id, volunteer_id, updated_at
                 FROM help_requests WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(HelpRequest {
                        id: uuid_col(row, 0)?,
                        title: row.get(1)?,
                        status: enum_col(row, 2)?,
                        requester_id: uuid_col(row, 3)?,
                        volunteer_id: opt_uuid_col(row, 4)?,
                        updated_at: ts_col(row, 5)?,
                    })
                },
            )
            .map_err(StoreError::from_query)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        role: enum_col(row, 2)?,
        profile_picture: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}
