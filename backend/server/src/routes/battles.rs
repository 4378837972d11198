use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
};
use serde_json::json;
use uuid::Uuid;

use super::Shared;
use crate::{
    auth::Caller,
    battle::{self, CreateBattle, EndBattle, PlayerResult},
    database::Store,
    error::AppError,
    payloads::{BattleQuery, CreateBattleRequest, DEFAULT_MAX_PLAYERS, EndBattleRequest},
    utils::{Id, Params, Valid, data, with_message},
};

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>))
        .route("/create", post(create::<S>))
        .route("/join/{code}", post(join::<S>))
        .route("/{id}", get(fetch::<S>).delete(cancel::<S>))
        .route("/{id}/start", put(start::<S>))
        .route("/{id}/end", put(end::<S>))
}

async fn create<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<CreateBattleRequest>,
) -> Result<Response, AppError> {
    let battle = battle::create(
        &state.store,
        &caller,
        CreateBattle {
            name: body.name,
            max_players: body.max_players.unwrap_or(DEFAULT_MAX_PLAYERS),
            questions: body.questions.unwrap_or_default(),
        },
    )
    .await?;

    let join_url = state.join_url(&battle.code);

    Ok(with_message(
        StatusCode::CREATED,
        "Battle created successfully",
        json!({ "battle": battle, "joinUrl": join_url }),
    ))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Caller(_): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    Ok(data(battle::get(&state.store, id).await?))
}

async fn join<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(code): Id<String>,
) -> Result<Response, AppError> {
    let battle = battle::join(&state.store, &caller, &code).await?;

    Ok(with_message(
        StatusCode::OK,
        "Successfully joined the battle",
        battle,
    ))
}

async fn start<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    let battle = battle::start(&state.store, &caller, id).await?;

    Ok(with_message(
        StatusCode::OK,
        "Battle started successfully",
        battle,
    ))
}

async fn end<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
    body: Option<Valid<EndBattleRequest>>,
) -> Result<Response, AppError> {
    let input = match body {
        Some(Valid(body)) => EndBattle {
            winner_id: body.winner_id,
            results: body
                .results
                .unwrap_or_default()
                .into_iter()
                .map(|r| PlayerResult {
                    user_id: r.user_id,
                    total_questions: r.total_questions.unwrap_or(0),
                    correct_answers: r.correct_answers.unwrap_or(0),
                })
                .collect(),
        },
        None => EndBattle::default(),
    };

    let ended = battle::end(&state.store, &caller, id, input).await?;

    let message = if ended.failed.is_empty() {
        "Battle ended successfully"
    } else {
        "Battle ended, some results could not be recorded"
    };

    Ok(with_message(StatusCode::OK, message, ended))
}

async fn list<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Params(query): Params<BattleQuery>,
) -> Result<Response, AppError> {
    let battles = battle::list(&state.store, &caller, query.status, query.role).await?;

    Ok(data(battles))
}

async fn cancel<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    let battle = battle::cancel(&state.store, &caller, id).await?;

    Ok(with_message(
        StatusCode::OK,
        "Battle cancelled successfully",
        json!({ "id": battle.id }),
    ))
}
