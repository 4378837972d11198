//! # Auth
//!
//! Passwords are argon2 hashes with a random 16-byte salt. Sessions are stateless
//! HS256 bearer tokens carrying the user id and role.
//!
//! ## Notes
//!
//! - The token only identifies the caller, [`Caller`] reloads the user on every
//!   request so deletes and role changes apply immediately
//! - Logout is acknowledged but nothing is revoked
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    database::{NewUser, Store, UserRepository},
    error::AppError,
    models::{Role, User},
    state::AppState,
};

pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user: &User, ttl_hours: i64) -> Result<String, AppError> {
        let claims = Claims {
            sub: user.id,
            role: user.role,
            exp: (Utc::now() + Duration::hours(ttl_hours)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(AppError::internal)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("Rejected token: {e}");
                AppError::Unauthorized("Invalid or expired token".into())
            })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
}

pub async fn hash_password(password: String) -> Result<String, AppError> {
    spawn_blocking(move || {
        let salt: [u8; 16] = rand::random();
        argon2::hash_encoded(password.as_bytes(), &salt, &argon2::Config::default())
    })
    .await
    .map_err(AppError::internal)?
    .map_err(AppError::internal)
}

/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    spawn_blocking(move || {
        argon2::verify_encoded(&hash, password.as_bytes()).unwrap_or_else(|e| {
            warn!("Unreadable password hash: {e}");
            false
        })
    })
    .await
    .map_err(AppError::internal)
}

/// The authenticated user behind the bearer token.
pub struct Caller(pub User);

impl<S: Store> FromRequestParts<Arc<AppState<S>>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("Access token required".into()))?;

        let claims = state.keys.verify(token)?;

        let user = state
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;

        Ok(Caller(user))
    }
}

#[derive(Debug, Serialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

pub struct Registration {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub image_url: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn register<R: UserRepository>(
    repo: &R,
    keys: &Keys,
    ttl_hours: i64,
    registration: Registration,
) -> Result<Session, AppError> {
    if registration.role == Role::Admin {
        return Err(AppError::forbidden("Admin accounts cannot be self-registered"));
    }

    let email = normalize_email(&registration.email);
    if repo.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("User with this email already exists".into()));
    }

    let new = NewUser {
        email,
        name: registration.name.trim().to_string(),
        role: registration.role,
        image_url: registration.image_url,
        password_hash: hash_password(registration.password).await?,
    };

    // A racing registration with the same email still trips the unique constraint.
    let user = repo.insert_user(&new).await?;
    let token = keys.issue(&user, ttl_hours)?;

    info!("Registered {} as {:?}", user.email, user.role);

    Ok(Session { user, token })
}

pub async fn login<R: UserRepository>(
    repo: &R,
    keys: &Keys,
    ttl_hours: i64,
    email: &str,
    password: String,
) -> Result<Session, AppError> {
    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = repo
        .find_user_by_email(&normalize_email(email))
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = keys.issue(&user, ttl_hours)?;

    info!("User {} logged in", user.id);

    Ok(Session { user, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;

    fn registration(email: &str, role: Role) -> Registration {
        Registration {
            email: email.into(),
            name: "Grace Hopper".into(),
            password: "Secret123".into(),
            role,
            image_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let hash = hash_password("Secret123".into()).await.unwrap();

        assert!(verify_password("Secret123".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("secret123".into(), hash).await.unwrap());
        assert!(!verify_password("Secret123".into(), String::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let store = MemoryStore::new();
        let keys = Keys::new("test-secret");

        let session = register(&store, &keys, 1, registration("Grace@Example.com", Role::Teacher))
            .await
            .unwrap();
        assert_eq!(session.user.email, "grace@example.com");
        assert_eq!(keys.verify(&session.token).unwrap().sub, session.user.id);

        let again = login(&store, &keys, 1, "grace@example.com", "Secret123".into())
            .await
            .unwrap();
        assert_eq!(again.user.id, session.user.id);

        let error = login(&store, &keys, 1, "grace@example.com", "Wrong123".into())
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_admins() {
        let store = MemoryStore::new();
        let keys = Keys::new("test-secret");

        register(&store, &keys, 1, registration("ada@example.com", Role::Student))
            .await
            .unwrap();

        let duplicate = register(&store, &keys, 1, registration("ada@example.com", Role::Student))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, AppError::Conflict(_)));

        let admin = register(&store, &keys, 1, registration("root@example.com", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(admin, AppError::Forbidden(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = Keys::new("test-secret");
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "old@example.com".into(),
            name: "Old".into(),
            role: Role::Student,
            experience: 0,
            level: 1,
            image_url: String::new(),
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        };

        let token = keys.issue(&user, -2).unwrap();

        assert!(matches!(keys.verify(&token), Err(AppError::Unauthorized(_))));
    }
}
