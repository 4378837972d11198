//! HTTP surface. One sub-router per resource, nested under `/api`.
use std::sync::Arc;

use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::{database::Store, state::AppState};

pub mod achievements;
pub mod auth;
pub mod battles;
pub mod health;
pub mod modules;
pub mod professors;
pub mod questions;
pub mod users;

pub type Shared<S> = Arc<AppState<S>>;

pub fn api<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/api/health", get(health::check::<S>))
        .nest("/api/auth", auth::router())
        .nest("/api/users", users::router())
        .nest("/api/questions", questions::router())
        .nest("/api/battles", battles::router())
        .nest("/api/professors", professors::router())
        .nest("/api/achievements", achievements::router())
        .nest("/api/modules", modules::router())
        .fallback(not_found)
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "Endpoint not found",
            "path": uri.path(),
        })),
    )
        .into_response()
}
