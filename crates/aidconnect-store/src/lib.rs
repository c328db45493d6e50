//! # aidconnect-store
//!
//! Durable storage for the AidConnect realtime layer, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users, help
//! requests, chat sessions, messages and notifications. It never pushes
//! events; fan-out belongs to the server.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod sessions;
pub mod users;

mod error;
mod row;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use row::now;
pub use sessions::ScopeFilter;
