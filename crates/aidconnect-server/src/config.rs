//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use aidconnect_shared::constants::{
    DEFAULT_CLIENT_URL, DEFAULT_CONNECTION_BUFFER, DEFAULT_HTTP_PORT, DEFAULT_NOTIFICATION_LIMIT,
};

/// Signing secret used when `JWT_SECRET` is not set. Development only.
pub const DEV_JWT_SECRET: &str = "aidconnect-dev-secret";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (see `Database::default_path`).
    pub database_path: Option<PathBuf>,

    /// HS256 secret the identity service signs access tokens with.
    /// Env: `JWT_SECRET`
    pub jwt_secret: String,

    /// Origin allowed by CORS.
    /// Env: `CLIENT_URL`
    /// Default: `http://localhost:5173`
    pub client_url: String,

    /// Bearer token for the `/internal/*` collaborator endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (internal API disabled).
    pub admin_token: Option<String>,

    /// Maximum number of notifications returned by a listing.
    /// Env: `NOTIFICATION_LIMIT`
    /// Default: `50`
    pub notification_limit: u32,

    /// Outbound events queued per live connection before new ones are dropped.
    /// Env: `CONNECTION_BUFFER`
    /// Default: `64`
    pub connection_buffer: usize,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"<redacted>")
            .field("client_url", &self.client_url)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("notification_limit", &self.notification_limit)
            .field("connection_buffer", &self.connection_buffer)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            client_url: DEFAULT_CLIENT_URL.to_string(),
            admin_token: None,
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            instance_name: "AidConnect".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        match var("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using the development secret"),
        }

        if let Some(url) = var("CLIENT_URL") {
            config.client_url = url;
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = var("NOTIFICATION_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.notification_limit = n,
                _ => tracing::warn!(value = %val, "Invalid NOTIFICATION_LIMIT, using default"),
            }
        }

        if let Some(val) = var("CONNECTION_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.connection_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid CONNECTION_BUFFER, using default"),
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
