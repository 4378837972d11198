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
    database::{Store, UserChanges, UserFilter},
    error::AppError,
    models::{Achievement, Pagination, User, UserBattleStats},
    payloads::{ExperienceRequest, GrantRequest, RoleRequest, UpdateUserRequest, UserQuery},
    policy::{Capability, require},
    progression,
    utils::{Id, Params, Valid, data, paged, with_message},
};

const PAGE_SIZE: i64 = 10;

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>))
        .route(
            "/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
        .route("/{id}/role", put(change_role::<S>))
        .route(
            "/{id}/achievements",
            get(achievements::<S>).post(grant::<S>),
        )
        .route("/{id}/stats", get(stats::<S>))
        .route("/{id}/experience", put(experience::<S>))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    #[serde(flatten)]
    user: User,
    achievements: Vec<Achievement>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    user: User,
    battle_stats: UserBattleStats,
}

async fn load<S: Store>(store: &S, id: Uuid) -> Result<User, AppError> {
    store.find_user(id).await?.ok_or(AppError::NotFound("User"))
}

async fn list<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Params(query): Params<UserQuery>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(PAGE_SIZE);

    let (users, total) = state
        .store
        .list_users(&UserFilter {
            role: query.role,
            page,
            limit,
        })
        .await?;

    Ok(paged(users, Pagination::new(page, limit, total)))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::SelfOrAdmin(id))?;

    let user = load(&state.store, id).await?;
    let achievements = state.store.user_achievements(id).await?;

    Ok(data(Profile { user, achievements }))
}

async fn update<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<UpdateUserRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::SelfOrAdmin(id))?;

    let changes = UserChanges {
        name: body.name.map(|n| n.trim().to_string()),
        image_url: body.image_url,
    };

    let user = state
        .store
        .update_user(id, &changes)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    Ok(with_message(StatusCode::OK, "User updated successfully", user))
}

async fn change_role<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<RoleRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let user = state
        .store
        .set_role(id, body.role)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!("Admin {} set role of {} to {:?}", caller.id, user.id, user.role);

    Ok(with_message(
        StatusCode::OK,
        "User role updated successfully",
        user,
    ))
}

async fn remove<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;
    require(&caller, Capability::NotSelf(id))?;

    let user = state
        .store
        .delete_user(id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!("Admin {} deleted user {}", caller.id, user.id);

    Ok(with_message(
        StatusCode::OK,
        "User deleted successfully",
        json!({ "id": user.id }),
    ))
}

async fn achievements<S: Store>(
    State(state): State<Shared<S>>,
    Caller(_): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    let user = load(&state.store, id).await?;
    let achievements = state.store.user_achievements(id).await?;

    Ok(data(json!({
        "user": { "id": user.id, "name": user.name, "level": user.level },
        "achievements": achievements,
    })))
}

async fn grant<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<GrantRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let (user, achievement) =
        progression::award_achievement(&state.store, id, body.achievement_id).await?;

    Ok(with_message(
        StatusCode::CREATED,
        "Achievement added successfully",
        json!({ "user": user, "achievement": achievement }),
    ))
}

async fn stats<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::SelfOrStaff(id))?;

    let user = load(&state.store, id).await?;
    let battle_stats = state
        .store
        .find_stats(id)
        .await?
        .unwrap_or_else(|| UserBattleStats {
            user_id: id,
            ..Default::default()
        });

    Ok(data(StatsView { user, battle_stats }))
}

async fn experience<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<ExperienceRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::TeacherOrAdmin)?;

    let user = progression::award_experience(&state.store, id, body.experience_gained).await?;

    Ok(with_message(
        StatusCode::OK,
        "Experience updated successfully",
        user,
    ))
}
