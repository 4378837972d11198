//! Backend of an educational quiz battle platform.
//!
//! Students and teachers answer multiple choice questions, alone or in live
//! battles, and earn experience, levels, achievements and professor cards.
//!
//!
//!
//! # General Infrastructure
//! - One axum server under `/api`, stateless bearer tokens for auth
//! - Postgres when `DATABASE_URL` is set, otherwise an in-memory store
//! - Migrations are embedded and run on startup
//! - The `seed` binary fills a fresh database, the `tester` binary drives a
//!   battle round trip against a running server
//!
//!
//!
//! # Battles
//!
//! **Goal**: Many players racing through one code without ever overbooking a room.
//!
//! - A teacher or student creates a battle and gets a 6 character code plus join URL
//! - Players join with the code while the battle is `waiting`
//! - The host starts it once at least 2 players joined, then ends it with results
//! - Winners get 50 XP and a win, everyone else 25 XP and a loss
//! - Finished battles never come back
//!
//!
//!
//! # Progression
//!
//! Every 100 XP is one level, starting at level 1. Experience comes from teachers,
//! achievements and battles. Professor cards unlock from level 5.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run against Postgres.
//! ```sh
//! DATABASE_URL=postgres://localhost/edubattle JWT_SECRET=change-me cargo run --bin edubattle
//! ```
//!
//! Seed it.
//! ```sh
//! cargo run --bin seed -- --database-url postgres://localhost/edubattle
//! ```
//!
//!
//!
//! # Configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `RUST_PORT` | `3001` |
//! | `DATABASE_URL` | unset, in-memory store |
//! | `MAX_DB_CONNECTIONS` | `5` |
//! | `JWT_SECRET` | required, `/run/secrets/JWT_SECRET` or env |
//! | `TOKEN_TTL_HOURS` | `24` |
//! | `CORS_ORIGIN` | `http://localhost:3000,http://localhost:5173` |
//! | `PUBLIC_URL` | `http://localhost:<port>` |
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use thiserror::Error;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod battle;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod payloads;
pub mod policy;
pub mod progression;
pub mod routes;
pub mod state;
pub mod utils;

use config::{Config, ConfigError};
use database::{MemoryStore, PgStore, Store, StoreError};
use state::AppState;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full API with CORS and request tracing.
pub fn app<S: Store>(state: Arc<AppState<S>>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin}");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    routes::api::<S>()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), StartupError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    match config.database_url.clone() {
        Some(url) => {
            info!("Connecting to Postgres...");
            let store = PgStore::connect(&url, config.max_db_connections).await?;
            store.migrate().await?;

            serve(AppState::new(config, store)).await
        }
        None => {
            warn!("DATABASE_URL not set, data lives in memory and is lost on shutdown");

            serve(AppState::new(config, MemoryStore::new())).await
        }
    }
}

async fn serve<S: Store>(state: Arc<AppState<S>>) -> Result<(), StartupError> {
    let address = format!("0.0.0.0:{}", state.config.port);
    let app = app(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
