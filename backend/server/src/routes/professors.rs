use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, put},
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::Shared;
use crate::{
    auth::Caller,
    database::{ProfessorChanges, Store},
    error::AppError,
    models::{ProfessorCard, User},
    payloads::{AvailableQuery, ProfessorQuery, ProfessorRequest, ProfessorUpdate, UnlockRequest},
    policy::{Capability, require},
    utils::{Id, Params, Valid, data, with_message},
};

/// Level a user needs before any professor card can be unlocked.
pub const UNLOCK_LEVEL: i64 = 5;

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/available/unlocked", get(available::<S>))
        .route(
            "/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
        .route("/{id}/unlock", put(unlock::<S>))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnlockRequirement {
    r#type: &'static str,
    value: i64,
    user_level: i64,
    is_unlocked: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Available {
    professors: Vec<ProfessorCard>,
    unlock_requirement: UnlockRequirement,
}

/// The user named in the request, or the caller.
async fn target<S: Store>(store: &S, caller: User, id: Option<Uuid>) -> Result<User, AppError> {
    match id {
        Some(id) if id != caller.id => {
            store.find_user(id).await?.ok_or(AppError::NotFound("User"))
        }
        _ => Ok(caller),
    }
}

async fn list<S: Store>(
    State(state): State<Shared<S>>,
    Params(query): Params<ProfessorQuery>,
) -> Result<Response, AppError> {
    Ok(data(state.store.list_professors(query.locked).await?))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Id(id): Id<i32>,
) -> Result<Response, AppError> {
    let professor = state
        .store
        .find_professor(id)
        .await?
        .ok_or(AppError::NotFound("Professor"))?;

    Ok(data(professor))
}

async fn create<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<ProfessorRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let professor = state.store.insert_professor(&body.into()).await?;

    info!("Admin {} created professor card {}", caller.id, professor.id);

    Ok(with_message(
        StatusCode::CREATED,
        "Professor created successfully",
        professor,
    ))
}

async fn update<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<i32>,
    Valid(body): Valid<ProfessorUpdate>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let professor = state
        .store
        .update_professor(id, &body.into())
        .await?
        .ok_or(AppError::NotFound("Professor"))?;

    Ok(with_message(
        StatusCode::OK,
        "Professor updated successfully",
        professor,
    ))
}

async fn remove<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<i32>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    state
        .store
        .delete_professor(id)
        .await?
        .ok_or(AppError::NotFound("Professor"))?;

    Ok(with_message(
        StatusCode::OK,
        "Professor deleted successfully",
        json!({ "id": id }),
    ))
}

/// Unlocks the card globally once the target user has reached [`UNLOCK_LEVEL`].
async fn unlock<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<i32>,
    body: Option<Valid<UnlockRequest>>,
) -> Result<Response, AppError> {
    let requested = body.and_then(|Valid(body)| body.user_id);
    let user = target(&state.store, caller, requested).await?;

    if state.store.find_professor(id).await?.is_none() {
        return Err(AppError::NotFound("Professor"));
    }

    if user.level < UNLOCK_LEVEL {
        return Err(AppError::InsufficientLevel {
            required: UNLOCK_LEVEL,
            current: user.level,
        });
    }

    let changes = ProfessorChanges {
        locked: Some(false),
        ..Default::default()
    };
    let professor = state
        .store
        .update_professor(id, &changes)
        .await?
        .ok_or(AppError::NotFound("Professor"))?;

    info!("User {} unlocked professor card {id}", user.id);

    Ok(with_message(
        StatusCode::OK,
        "Professor unlocked successfully",
        professor,
    ))
}

async fn available<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Params(query): Params<AvailableQuery>,
) -> Result<Response, AppError> {
    let user = target(&state.store, caller, query.user_id).await?;
    let professors = state.store.list_professors(Some(false)).await?;

    Ok(data(Available {
        professors,
        unlock_requirement: UnlockRequirement {
            r#type: "level",
            value: UNLOCK_LEVEL,
            user_level: user.level,
            is_unlocked: user.level >= UNLOCK_LEVEL,
        },
    }))
}
