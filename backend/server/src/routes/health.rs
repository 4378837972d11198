use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use super::Shared;
use crate::database::Store;

pub async fn check<S: Store>(State(state): State<Shared<S>>) -> Response {
    let timestamp = Utc::now();
    let version = env!("CARGO_PKG_VERSION");

    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "OK",
            "timestamp": timestamp,
            "database": "Connected",
            "version": version,
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "ERROR",
                    "timestamp": timestamp,
                    "database": "Disconnected",
                    "version": version,
                })),
            )
                .into_response()
        }
    }
}
