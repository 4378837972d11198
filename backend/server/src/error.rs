use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

use crate::database::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Battle is full")]
    Full,

    #[error("Need at least {required} players to start the battle")]
    InsufficientPlayers { required: i32 },

    #[error("Insufficient level: level {required} required, currently {current}")]
    InsufficientLevel { required: i64, current: i64 },

    #[error("User already has this achievement")]
    AlreadyAwarded,

    #[error("You are already the host of this battle")]
    AlreadyHost,

    #[error("You have already joined this battle")]
    AlreadyJoined,

    #[error("{0}")]
    Conflict(String),

    #[error("Failed to generate a unique battle code after {0} attempts")]
    ExhaustedRetries(usize),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AppError::InternalError(Box::new(error))
    }

    /// Machine-readable kind sent as `error` in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Full => "FULL",
            AppError::InsufficientPlayers { .. } => "INSUFFICIENT_PLAYERS",
            AppError::InsufficientLevel { .. } => "INSUFFICIENT_LEVEL",
            AppError::AlreadyAwarded => "ALREADY_AWARDED",
            AppError::AlreadyHost => "ALREADY_HOST",
            AppError::AlreadyJoined => "ALREADY_JOINED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::ExhaustedRetries(_) => "EXHAUSTED_RETRIES",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::InternalError(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidState(_)
            | AppError::InvalidInput(_)
            | AppError::Full
            | AppError::InsufficientPlayers { .. }
            | AppError::InsufficientLevel { .. }
            | AppError::AlreadyAwarded
            | AppError::AlreadyHost
            | AppError::AlreadyJoined => StatusCode::BAD_REQUEST,
            AppError::ExhaustedRetries(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(message) => AppError::Conflict(message),
            StoreError::Missing(entity) => AppError::NotFound(entity),
            StoreError::OutOfRange => AppError::invalid("Total is out of range"),
            StoreError::Database(e) => AppError::internal(e),
            StoreError::Migration(e) => AppError::internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::InternalError(e) => {
                error!("Internal error: {e}");
                "Internal server error".to_string()
            }
            AppError::ExhaustedRetries(_) => {
                error!("{self}");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "success": false,
            "message": message,
            "error": self.kind(),
        });

        if let (AppError::InsufficientLevel { required, current }, Value::Object(map)) =
            (&self, &mut body)
        {
            map.insert("requiredLevel".into(), json!(required));
            map.insert("currentLevel".into(), json!(current));
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotFound("Battle").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Full.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::forbidden("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::ExhaustedRetries(10).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let error: AppError = StoreError::Conflict("email taken".into()).into();
        assert_eq!(error.kind(), "CONFLICT");
        assert_eq!(error.status(), StatusCode::CONFLICT);
    }
}
