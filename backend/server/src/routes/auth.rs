use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use serde_json::json;
use tracing::info;

use super::Shared;
use crate::{
    auth::{self, Caller, Registration},
    database::Store,
    error::AppError,
    models::Role,
    payloads::{LoginRequest, RegisterRequest},
    utils::{Valid, data, message, with_message},
};

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/register", post(register::<S>))
        .route("/login", post(login::<S>))
        .route("/profile", get(profile))
        .route("/refresh", post(refresh::<S>))
        .route("/logout", post(logout))
}

async fn register<S: Store>(
    State(state): State<Shared<S>>,
    Valid(body): Valid<RegisterRequest>,
) -> Result<Response, AppError> {
    let session = auth::register(
        &state.store,
        &state.keys,
        state.config.token_ttl_hours,
        Registration {
            email: body.email,
            name: body.name,
            password: body.password,
            role: body.role.unwrap_or(Role::Student),
            image_url: body.image_url.unwrap_or_default(),
        },
    )
    .await?;

    Ok(with_message(
        StatusCode::CREATED,
        "User registered successfully",
        session,
    ))
}

async fn login<S: Store>(
    State(state): State<Shared<S>>,
    Valid(body): Valid<LoginRequest>,
) -> Result<Response, AppError> {
    let session = auth::login(
        &state.store,
        &state.keys,
        state.config.token_ttl_hours,
        &body.email,
        body.password,
    )
    .await?;

    Ok(with_message(StatusCode::OK, "Login successful", session))
}

async fn profile(Caller(user): Caller) -> Response {
    data(user)
}

async fn refresh<S: Store>(
    State(state): State<Shared<S>>,
    Caller(user): Caller,
) -> Result<Response, AppError> {
    let token = state.keys.issue(&user, state.config.token_ttl_hours)?;

    Ok(with_message(
        StatusCode::OK,
        "Token refreshed successfully",
        json!({ "token": token }),
    ))
}

async fn logout(Caller(user): Caller) -> Response {
    info!("User {} logged out", user.id);

    message("Logout successful")
}
