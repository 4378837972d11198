use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::Shared;
use crate::{
    auth::Caller,
    database::{ModuleContent, ModuleFilter, Store},
    error::AppError,
    models::ModuleRole,
    payloads::{BulkModules, ModuleQuery, ModuleRequest, ModuleUpdate},
    policy::{Capability, require},
    utils::{Id, Params, Valid, data, with_message},
};

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/bulk", post(bulk::<S>))
        .route("/enabled/{role}", get(enabled::<S>))
        .route(
            "/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
        .route("/{id}/toggle", put(toggle::<S>))
}

fn parse_role(role: &str) -> Result<ModuleRole, AppError> {
    match role {
        "STUDENT" => Ok(ModuleRole::Student),
        "TEACHER" => Ok(ModuleRole::Teacher),
        _ => Err(AppError::invalid("Role must be STUDENT or TEACHER")),
    }
}

async fn list<S: Store>(
    State(state): State<Shared<S>>,
    Params(query): Params<ModuleQuery>,
) -> Result<Response, AppError> {
    let modules = state
        .store
        .list_modules(&ModuleFilter {
            role: query.role,
            enabled: query.enabled,
        })
        .await?;

    Ok(data(modules))
}

async fn enabled<S: Store>(
    State(state): State<Shared<S>>,
    Id(role): Id<String>,
) -> Result<Response, AppError> {
    let role = parse_role(&role)?;

    Ok(data(state.store.enabled_modules(role).await?))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    let module = state
        .store
        .find_module(id)
        .await?
        .ok_or(AppError::NotFound("Module"))?;

    Ok(data(module))
}

async fn create<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<ModuleRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let module = state.store.insert_module(&body.into()).await?;

    info!("Admin {} created module {}", caller.id, module.id);

    Ok(with_message(
        StatusCode::CREATED,
        "Module created successfully",
        module,
    ))
}

async fn update<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<ModuleUpdate>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let module = state
        .store
        .update_module(id, &body.into())
        .await?
        .ok_or(AppError::NotFound("Module"))?;

    Ok(with_message(
        StatusCode::OK,
        "Module updated successfully",
        module,
    ))
}

async fn remove<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    state
        .store
        .delete_module(id)
        .await?
        .ok_or(AppError::NotFound("Module"))?;

    Ok(with_message(
        StatusCode::OK,
        "Module deleted successfully",
        json!({ "id": id }),
    ))
}

async fn toggle<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let module = state
        .store
        .toggle_module(id)
        .await?
        .ok_or(AppError::NotFound("Module"))?;

    let message = if module.enabled {
        "Module enabled successfully"
    } else {
        "Module disabled successfully"
    };

    Ok(with_message(StatusCode::OK, message, module))
}

async fn bulk<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<BulkModules>,
) -> Result<Response, AppError> {
    require(&caller, Capability::Admin)?;

    let contents: Vec<ModuleContent> = body.modules.into_iter().map(Into::into).collect();
    let modules = state.store.insert_modules(&contents).await?;

    Ok(with_message(
        StatusCode::CREATED,
        &format!("{} modules created successfully", modules.len()),
        modules,
    ))
}
