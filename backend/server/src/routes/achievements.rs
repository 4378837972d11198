use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::Shared;
use crate::{
    auth::Caller,
    database::{AchievementContent, Store},
    error::AppError,
    payloads::{AchievementRequest, AchievementUpdate, AwardRequest, BulkAchievements},
    policy::{Capability, require},
    progression,
    utils::{Id, Valid, data, with_message},
};

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/bulk", post(bulk::<S>))
        .route("/user/{user_id}", get(for_user::<S>))
        .route(
            "/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
        .route("/{id}/award", post(award::<S>))
}

async fn list<S: Store>(State(state): State<Shared<S>>) -> Result<Response, AppError> {
    Ok(data(state.store.list_achievements().await?))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Id(id): Id<i32>,
) -> Result<Response, AppError> {
    let achievement = state
        .store
        .find_achievement(id)
        .await?
        .ok_or(AppError::NotFound("Achievement"))?;

    Ok(data(achievement))
}

async fn create<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<AchievementRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let achievement = state.store.insert_achievement(&body.into()).await?;

    info!("Admin {} created achievement {}", caller.id, achievement.id);

    Ok(with_message(
        StatusCode::CREATED,
        "Achievement created successfully",
        achievement,
    ))
}

async fn update<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<i32>,
    Valid(body): Valid<AchievementUpdate>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let achievement = state
        .store
        .update_achievement(id, &body.into())
        .await?
        .ok_or(AppError::NotFound("Achievement"))?;

    Ok(with_message(
        StatusCode::OK,
        "Achievement updated successfully",
        achievement,
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
        .delete_achievement(id)
        .await?
        .ok_or(AppError::NotFound("Achievement"))?;

    Ok(with_message(
        StatusCode::OK,
        "Achievement deleted successfully",
        json!({ "id": id }),
    ))
}

async fn for_user<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(user_id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::SelfOrStaff(user_id))?;

    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let achievements = state.store.user_achievements(user_id).await?;

    Ok(data(json!({
        "user": { "id": user.id, "name": user.name, "level": user.level },
        "totalAchievements": achievements.len(),
        "achievements": achievements,
    })))
}

async fn award<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<i32>,
    Valid(body): Valid<AwardRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let (user, achievement) = progression::award_achievement(&state.store, body.user_id, id).await?;

    Ok(with_message(
        StatusCode::OK,
        "Achievement awarded successfully",
        json!({
            "user": user,
            "achievement": achievement,
            "experienceGained": achievement.points,
        }),
    ))
}

async fn bulk<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<BulkAchievements>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let contents: Vec<AchievementContent> =
        body.achievements.into_iter().map(Into::into).collect();
    let achievements = state.store.insert_achievements(&contents).await?;

    Ok(with_message(
        StatusCode::CREATED,
        &format!("{} achievements created successfully", achievements.len()),
        achievements,
    ))
}
