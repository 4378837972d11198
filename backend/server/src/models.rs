//! # Models
//!
//! Rows as they come out of the store, serialized straight into responses.
//!
//! - Ids: UUIDs for users, questions, battles and modules; serial integers for
//!   achievements and professor cards
//! - Enums map onto Postgres enum types of the same name in the migrations
//! - Password hashes never leave the server (`#[serde(skip)]`)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type, types::Json};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub experience: i64,
    pub level: i64,
    pub image_url: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public face of a user embedded in other payloads.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub level: i64,
    pub image_url: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            level: user.level,
            image_url: user.image_url.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "question_difficulty", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub answers: Vec<String>,
    pub correct_answer_index: i32,
    pub difficulty: Difficulty,
    pub category: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "battle_status", rename_all = "lowercase")]
pub enum BattleStatus {
    Waiting,
    Active,
    Finished,
}

impl BattleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BattleStatus::Waiting => "waiting",
            BattleStatus::Active => "active",
            BattleStatus::Finished => "finished",
        }
    }
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BattleSession {
    pub id: Uuid,
    pub code: String,
    pub host_id: Uuid,
    pub name: String,
    pub max_players: i32,
    /// Joined players, host excluded.
    pub current_players: i32,
    pub questions: Vec<Uuid>,
    pub status: BattleStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BattleSession {
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserBattleStats {
    pub user_id: Uuid,
    pub total_games: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_questions: i64,
    pub correct_answers: i64,
    pub experience: i64,
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: i32,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub points: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub score: i32,
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfessorCard {
    pub id: i32,
    pub name: String,
    pub title: String,
    pub image_url: String,
    pub skills: Json<Vec<Skill>>,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "module_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleRole {
    Student,
    Teacher,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "game_mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Individual,
    Group,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "access_method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMethod {
    Code,
    Qr,
    Both,
}

#[derive(Clone, Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomModule {
    pub id: Uuid,
    pub name: String,
    pub icon: String,
    pub role: ModuleRole,
    pub game_mode: GameMode,
    pub access_method: AccessMethod,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_rounds_up() {
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
        assert_eq!(Pagination::new(2, 10, 11).total_pages, 2);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&BattleStatus::Waiting).unwrap(), "\"waiting\"");
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"TEACHER\"");
        assert_eq!(serde_json::to_string(&AccessMethod::Qr).unwrap(), "\"QR\"");
    }
}
