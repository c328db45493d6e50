//! # aidconnect-server
//!
//! Realtime messaging and presence for the AidConnect platform.
//!
//! This binary provides:
//! - **WebSocket channel** (`/ws`) carrying chat, typing, read receipts,
//!   presence and notification events
//! - **REST API** (axum) for conversations, request chat rooms, message
//!   history and notifications
//! - **Internal endpoints** through which the identity and request services
//!   mirror users, help requests and request workflow events
//! - **SQLite persistence** for sessions, messages and notifications

mod api;
mod auth;
mod config;
mod dispatcher;
mod error;
mod events;
mod notifications;
mod presence;
mod registry;
mod resolver;
mod store;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use aidconnect_store::Database;

use crate::api::AppState;
use crate::auth::{JwtVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aidconnect_server=debug")),
        )
        .init();

    info!("Starting AidConnect realtime server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        internal_api = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db_path = match config.database_path.clone() {
        Some(path) => path,
        None => Database::default_path()?,
    };
    let store = Store::new(Database::open_at(&db_path)?);

    let registry = Arc::new(ConnectionRegistry::new());
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret));
    let dispatcher = Dispatcher::new(
        store.clone(),
        registry,
        verifier,
        config.connection_buffer,
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        dispatcher,
        store,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
