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
    database::{QuestionContent, QuestionFilter, Store},
    error::AppError,
    models::{Pagination, Question},
    payloads::{BulkQuestions, QuestionQuery, QuestionRequest},
    policy::{Capability, require},
    utils::{Id, Params, Valid, data, paged, with_message},
};

const PAGE_SIZE: i64 = 20;

pub fn router<S: Store>() -> Router<Shared<S>> {
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/categories/list", get(categories::<S>))
        .route("/bulk", post(bulk::<S>))
        .route(
            "/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
}

async fn owned<S: Store>(store: &S, caller: &Caller, id: Uuid) -> Result<Question, AppError> {
    let question = store
        .find_question(id)
        .await?
        .ok_or(AppError::NotFound("Question"))?;

    require(&caller.0, Capability::AuthorOf(&question))?;

    Ok(question)
}

async fn list<S: Store>(
    State(state): State<Shared<S>>,
    Params(query): Params<QuestionQuery>,
) -> Result<Response, AppError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(PAGE_SIZE);

    let (questions, total) = state
        .store
        .list_questions(&QuestionFilter {
            category: query.category,
            difficulty: query.difficulty,
            author_id: query.author_id,
            page,
            limit,
        })
        .await?;

    Ok(paged(questions, Pagination::new(page, limit, total)))
}

async fn fetch<S: Store>(
    State(state): State<Shared<S>>,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    let question = state
        .store
        .find_question(id)
        .await?
        .ok_or(AppError::NotFound("Question"))?;

    Ok(data(question))
}

async fn create<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<QuestionRequest>,
) -> Result<Response, AppError> {
    require(&caller, Capability::TeacherOrAdmin)?;

    let question = state
        .store
        .insert_question(caller.id, &body.into_content()?)
        .await?;

    info!("User {} created question {}", caller.id, question.id);

    Ok(with_message(
        StatusCode::CREATED,
        "Question created successfully",
        question,
    ))
}

async fn update<S: Store>(
    State(state): State<Shared<S>>,
    caller: Caller,
    Id(id): Id<Uuid>,
    Valid(body): Valid<QuestionRequest>,
) -> Result<Response, AppError> {
    owned(&state.store, &caller, id).await?;

    let question = state
        .store
        .update_question(id, &body.into_content()?)
        .await?
        .ok_or(AppError::NotFound("Question"))?;

    Ok(with_message(
        StatusCode::OK,
        "Question updated successfully",
        question,
    ))
}

async fn remove<S: Store>(
    State(state): State<Shared<S>>,
    caller: Caller,
    Id(id): Id<Uuid>,
) -> Result<Response, AppError> {
    owned(&state.store, &caller, id).await?;

    state
        .store
        .delete_question(id)
        .await?
        .ok_or(AppError::NotFound("Question"))?;

    info!("User {} deleted question {id}", caller.0.id);

    Ok(with_message(
        StatusCode::OK,
        "Question deleted successfully",
        json!({ "id": id }),
    ))
}

async fn categories<S: Store>(State(state): State<Shared<S>>) -> Result<Response, AppError> {
    Ok(data(state.store.categories().await?))
}

async fn bulk<S: Store>(
    State(state): State<Shared<S>>,
    Caller(caller): Caller,
    Valid(body): Valid<BulkQuestions>,
) -> Result<Response, AppError> {
    require(&caller, Capability::TeacherOrAdmin)?;

    let contents = body
        .questions
        .into_iter()
        .map(QuestionRequest::into_content)
        .collect::<Result<Vec<QuestionContent>, _>>()?;

    let questions = state.store.insert_questions(caller.id, &contents).await?;

    info!("User {} created {} questions", caller.id, questions.len());

    Ok(with_message(
        StatusCode::CREATED,
        &format!("{} questions created successfully", questions.len()),
        questions,
    ))
}
