use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use edubattle::{
    app,
    config::Config,
    database::{MemoryStore, UserRepository},
    models::{Role, User},
    state::AppState,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct Harness {
    app: Router,
    state: Arc<AppState<MemoryStore>>,
}

impl Harness {
    fn new() -> Self {
        let state = AppState::new(Config::new("test-secret"), MemoryStore::new());

        Self {
            app: app(state.clone()),
            state,
        }
    }

    async fn user(&self, email: &str, role: Role) -> (User, String) {
        let user = self.state.store.seed_user(email, role, 0).await;
        let token = self.state.keys.issue(&user, 1).unwrap();

        (user, token)
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }
}

fn question_body() -> Value {
    json!({
        "text": "Which planet is the largest?",
        "answers": ["Mars", "Jupiter", "Venus"],
        "correctAnswerIndex": 1,
        "category": "Science",
    })
}

#[tokio::test]
async fn test_register_then_login() {
    let h = Harness::new();
    let credentials = json!({ "email": "ada@example.com", "password": "Secret123" });

    let (status, body) = h
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "Ada@Example.com", "name": "Ada", "password": "Secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user"]["role"], "STUDENT");
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let (status, body) = h
        .send("POST", "/api/auth/login", None, Some(credentials))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = h.send("GET", "/api/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "ada@example.com");

    let (status, body) = h
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "Wrong123" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, body) = h
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "ada@example.com", "name": "Ada", "password": "Secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
}

#[tokio::test]
async fn test_register_validates_body() {
    let h = Harness::new();

    let (status, body) = h
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "ada@example.com", "name": "Ada", "password": "weakpass" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");

    let (status, _) = h
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "name": "Ada",
                "password": "Secret123",
                "level": 50,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_requires_token() {
    let h = Harness::new();

    let (status, body) = h.send("GET", "/api/auth/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Access token required");

    let (status, _) = h
        .send("GET", "/api/auth/profile", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_student_cannot_create_question() {
    let h = Harness::new();
    let (_, student) = h.user("student@example.com", Role::Student).await;

    let (status, body) = h
        .send("POST", "/api/questions", Some(&student), Some(question_body()))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");
}

#[tokio::test]
async fn test_only_author_or_admin_edits_question() {
    let h = Harness::new();
    let (_, author) = h.user("author@example.com", Role::Teacher).await;
    let (_, other) = h.user("other@example.com", Role::Teacher).await;
    let (_, admin) = h.user("admin@example.com", Role::Admin).await;

    let (status, body) = h
        .send("POST", "/api/questions", Some(&author), Some(question_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/questions/{id}");

    let (status, _) = h.send("PUT", &uri, Some(&other), Some(question_body())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h.send("DELETE", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut edited = question_body();
    edited["category"] = json!("Astronomy");
    let (status, body) = h.send("PUT", &uri, Some(&admin), Some(edited)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["category"], "Astronomy");

    let (status, _) = h.send("DELETE", &uri, Some(&author), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.send("GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_questions_list_is_public_and_paged() {
    let h = Harness::new();
    let (_, teacher) = h.user("teacher@example.com", Role::Teacher).await;

    let questions: Vec<Value> = (0..3).map(|_| question_body()).collect();
    let (status, body) = h
        .send(
            "POST",
            "/api/questions/bulk",
            Some(&teacher),
            Some(json!({ "questions": questions })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = h.send("GET", "/api/questions?limit=2", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["totalPages"], 2);

    let (status, body) = h.send("GET", "/api/questions/categories/list", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(["Science"]));
}

#[tokio::test]
async fn test_admin_cannot_delete_self() {
    let h = Harness::new();
    let (admin, token) = h.user("admin@example.com", Role::Admin).await;
    let (student, _) = h.user("student@example.com", Role::Student).await;

    let (status, _) = h
        .send("DELETE", &format!("/api/users/{}", admin.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send("DELETE", &format!("/api/users/{}", student.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .send("GET", &format!("/api/users/{}", student.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleted_user_token_stops_working() {
    let h = Harness::new();
    let (_, admin) = h.user("admin@example.com", Role::Admin).await;
    let (student, token) = h.user("student@example.com", Role::Student).await;

    h.send("DELETE", &format!("/api/users/{}", student.id), Some(&admin), None)
        .await;

    let (status, body) = h.send("GET", "/api/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "User no longer exists");
}

#[tokio::test]
async fn test_battle_round_trip() {
    let h = Harness::new();
    let (_, host) = h.user("host@example.com", Role::Teacher).await;
    let (alice, alice_token) = h.user("alice@example.com", Role::Student).await;
    let (bob, bob_token) = h.user("bob@example.com", Role::Student).await;
    let (_, carol_token) = h.user("carol@example.com", Role::Student).await;

    let (status, body) = h
        .send(
            "POST",
            "/api/battles/create",
            Some(&host),
            Some(json!({ "name": "Friday quiz", "maxPlayers": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["battle"]["id"].as_str().unwrap().to_string();
    let code = body["data"]["battle"]["code"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["battle"]["status"], "waiting");
    assert!(body["data"]["joinUrl"].as_str().unwrap().ends_with(&code));

    let (status, body) = h
        .send("PUT", &format!("/api/battles/{id}/start"), Some(&host), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INSUFFICIENT_PLAYERS");

    let join = format!("/api/battles/join/{}", code.to_lowercase());
    for token in [&alice_token, &bob_token] {
        let (status, _) = h.send("POST", &join, Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = h.send("POST", &join, Some(&carol_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "FULL");

    let (status, _) = h
        .send("PUT", &format!("/api/battles/{id}/start"), Some(&alice_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .send("PUT", &format!("/api/battles/{id}/start"), Some(&host), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = h
        .send(
            "PUT",
            &format!("/api/battles/{id}/end"),
            Some(&host),
            Some(json!({
                "winnerId": alice.id,
                "results": [
                    { "userId": alice.id, "totalQuestions": 10, "correctAnswers": 8 },
                    { "userId": bob.id, "totalQuestions": 10, "correctAnswers": 5 },
                ],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["battle"]["status"], "finished");
    assert_eq!(body["data"]["failed"], json!([]));

    let (status, body) = h
        .send("GET", &format!("/api/users/{}/stats", alice.id), Some(&alice_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["battleStats"]["wins"], 1);
    assert_eq!(body["data"]["battleStats"]["experience"], 50);

    let (status, body) = h
        .send("GET", &format!("/api/users/{}/stats", bob.id), Some(&bob_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["battleStats"]["losses"], 1);
    assert_eq!(body["data"]["battleStats"]["experience"], 25);

    let (status, _) = h
        .send("PUT", &format!("/api/battles/{id}/start"), Some(&host), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h.send("GET", "/api/battles?role=host", Some(&host), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["participants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_teacher_awards_experience() {
    let h = Harness::new();
    let (_, teacher) = h.user("teacher@example.com", Role::Teacher).await;
    let (student, student_token) = h.user("student@example.com", Role::Student).await;
    let uri = format!("/api/users/{}/experience", student.id);

    let (status, _) = h
        .send("PUT", &uri, Some(&student_token), Some(json!({ "experienceGained": 100 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .send("PUT", &uri, Some(&teacher), Some(json!({ "experienceGained": 250 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["experience"], 250);
    assert_eq!(body["data"]["level"], 3);

    let (status, body) = h
        .send("PUT", &uri, Some(&teacher), Some(json!({ "experienceGained": i64::MAX })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");

    let student = h.state.store.find_user(student.id).await.unwrap().unwrap();
    assert_eq!(student.experience, 250);
}

#[tokio::test]
async fn test_deleted_participant_frees_seat() {
    let h = Harness::new();
    let (_, admin) = h.user("admin@example.com", Role::Admin).await;
    let (_, host) = h.user("host@example.com", Role::Teacher).await;
    let (_, alice_token) = h.user("alice@example.com", Role::Student).await;
    let (bob, bob_token) = h.user("bob@example.com", Role::Student).await;
    let (_, carol_token) = h.user("carol@example.com", Role::Student).await;

    let (_, body) = h
        .send(
            "POST",
            "/api/battles/create",
            Some(&host),
            Some(json!({ "name": "Two seats", "maxPlayers": 2 })),
        )
        .await;
    let id = body["data"]["battle"]["id"].as_str().unwrap().to_string();
    let join = format!("/api/battles/join/{}", body["data"]["battle"]["code"].as_str().unwrap());

    for token in [&alice_token, &bob_token] {
        let (status, _) = h.send("POST", &join, Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = h
        .send("DELETE", &format!("/api/users/{}", bob.id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.send("GET", &format!("/api/battles/{id}"), Some(&host), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["currentPlayers"], 1);

    let (status, _) = h.send("POST", &join, Some(&carol_token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_professor_unlock_needs_level() {
    let h = Harness::new();
    let (_, admin) = h.user("admin@example.com", Role::Admin).await;
    let (_, student) = h.user("student@example.com", Role::Student).await;

    let (status, body) = h
        .send(
            "POST",
            "/api/professors",
            Some(&admin),
            Some(json!({
                "name": "Dr. Ada Lovelace",
                "title": "Algorithms",
                "imageUrl": "https://example.com/ada.png",
                "skills": [{ "name": "Logic", "score": 95 }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["locked"], true);
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = h
        .send("PUT", &format!("/api/professors/{id}/unlock"), Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INSUFFICIENT_LEVEL");
    assert_eq!(body["requiredLevel"], 5);
    assert_eq!(body["currentLevel"], 1);

    let (status, body) = h
        .send("PUT", &format!("/api/professors/{id}/unlock"), Some(&admin), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["currentLevel"], 1);
}

#[tokio::test]
async fn test_unknown_route() {
    let h = Harness::new();

    let (status, body) = h.send("GET", "/api/nowhere", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["path"], "/api/nowhere");
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();

    let (status, body) = h.send("GET", "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
}
