//! # Store
//!
//! Persistence behind one repository trait per entity.
//!
//! ## Requirements
//!
//! - Battle joins must never overbook: the capacity check and the increment
//!   happen in one statement (Postgres) or under one lock (memory)
//! - Battle codes are unique at the storage layer, the generation loop only probes
//! - Experience and level are written together, never in two steps
//! - Status transitions are compare-and-set on the current status
//!
//! ## Implementation
//!
//! - [`PgStore`]: Postgres through `sqlx`, migrations embedded from `migrations/`
//! - [`MemoryStore`]: one `tokio` mutex over plain maps, used by tests and when
//!   no `DATABASE_URL` is configured
//! - Both are cheap to clone and handed to services through `AppState`
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AccessMethod, Achievement, BattleSession, BattleStatus, CustomModule, Difficulty, GameMode,
    ModuleRole, ProfessorCard, Question, Role, Skill, User, UserBattleStats,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0} does not exist")]
    Missing(&'static str),

    #[error("Total is out of range")]
    OutOfRange,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub image_url: String,
    pub password_hash: String,
}

#[derive(Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub image_url: Option<String>,
}

pub struct UserFilter {
    pub role: Option<Role>,
    pub page: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct QuestionContent {
    pub text: String,
    pub answers: Vec<String>,
    pub correct_answer_index: i32,
    pub difficulty: Difficulty,
    pub category: String,
}

#[derive(Default)]
pub struct QuestionFilter {
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub author_id: Option<Uuid>,
    pub page: i64,
    pub limit: i64,
}

pub struct NewBattle {
    pub code: String,
    pub host_id: Uuid,
    pub name: String,
    pub max_players: i32,
    pub questions: Vec<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleRole {
    Host,
    Participant,
}

pub struct BattleFilter {
    pub user_id: Uuid,
    pub status: Option<BattleStatus>,
    /// `None` matches both hosted and joined battles.
    pub role: Option<BattleRole>,
    pub limit: i64,
}

#[derive(Debug)]
pub enum JoinOutcome {
    Joined(BattleSession),
    Missing,
    NotWaiting,
    Full,
    AlreadyJoined,
}

/// One participant's result, applied as increments.
#[derive(Clone, Copy, Debug)]
pub struct BattleOutcome {
    pub won: bool,
    pub total_questions: i64,
    pub correct_answers: i64,
    pub experience: i64,
}

pub struct AchievementContent {
    pub name: String,
    pub icon: String,
    pub description: String,
    pub points: i32,
}

#[derive(Default)]
pub struct AchievementChanges {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub points: Option<i32>,
}

#[derive(Debug)]
pub enum Grant {
    Granted(User),
    AlreadyHeld,
    MissingUser,
    MissingAchievement,
}

pub struct ProfessorContent {
    pub name: String,
    pub title: String,
    pub image_url: String,
    pub skills: Vec<Skill>,
    pub locked: bool,
}

#[derive(Default)]
pub struct ProfessorChanges {
    pub name: Option<String>,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub skills: Option<Vec<Skill>>,
    pub locked: Option<bool>,
}

pub struct ModuleContent {
    pub name: String,
    pub icon: String,
    pub role: ModuleRole,
    pub game_mode: GameMode,
    pub access_method: AccessMethod,
    pub enabled: bool,
}

#[derive(Default)]
pub struct ModuleChanges {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub role: Option<ModuleRole>,
    pub game_mode: Option<GameMode>,
    pub access_method: Option<AccessMethod>,
    pub enabled: Option<bool>,
}

#[derive(Default)]
pub struct ModuleFilter {
    pub role: Option<ModuleRole>,
    pub enabled: Option<bool>,
}

pub trait UserRepository: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    fn insert_user(&self, new: &NewUser) -> impl Future<Output = StoreResult<User>> + Send;

    fn find_user(&self, id: Uuid) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    fn find_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    /// Newest first, with the unpaged total.
    fn list_users(
        &self,
        filter: &UserFilter,
    ) -> impl Future<Output = StoreResult<(Vec<User>, i64)>> + Send;

    fn update_user(
        &self,
        id: Uuid,
        changes: &UserChanges,
    ) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    fn set_role(&self, id: Uuid, role: Role)
    -> impl Future<Output = StoreResult<Option<User>>> + Send;

    /// Also frees the seat in every waiting battle the user had joined.
    fn delete_user(&self, id: Uuid) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    /// Adds `gained` and recomputes the level from the new total in the same write.
    /// A total past `i64::MAX` is [`StoreError::OutOfRange`] and changes nothing.
    fn add_experience(
        &self,
        id: Uuid,
        gained: i64,
    ) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    fn user_achievements(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Vec<Achievement>>> + Send;
}

pub trait QuestionRepository: Send + Sync {
    fn insert_question(
        &self,
        author_id: Uuid,
        content: &QuestionContent,
    ) -> impl Future<Output = StoreResult<Question>> + Send;

    /// All or nothing.
    fn insert_questions(
        &self,
        author_id: Uuid,
        contents: &[QuestionContent],
    ) -> impl Future<Output = StoreResult<Vec<Question>>> + Send;

    fn find_question(&self, id: Uuid)
    -> impl Future<Output = StoreResult<Option<Question>>> + Send;

    /// How many of the given (distinct) ids exist.
    fn count_existing_questions(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = StoreResult<i64>> + Send;

    fn list_questions(
        &self,
        filter: &QuestionFilter,
    ) -> impl Future<Output = StoreResult<(Vec<Question>, i64)>> + Send;

    fn update_question(
        &self,
        id: Uuid,
        content: &QuestionContent,
    ) -> impl Future<Output = StoreResult<Option<Question>>> + Send;

    fn delete_question(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<Question>>> + Send;

    fn categories(&self) -> impl Future<Output = StoreResult<Vec<String>>> + Send;
}

pub trait BattleRepository: Send + Sync {
    fn code_exists(&self, code: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Fails with [`StoreError::Conflict`] when the code is taken.
    fn insert_battle(
        &self,
        new: &NewBattle,
    ) -> impl Future<Output = StoreResult<BattleSession>> + Send;

    fn find_battle(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<BattleSession>>> + Send;

    fn find_battle_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = StoreResult<Option<BattleSession>>> + Send;

    /// Checks status, capacity and membership and increments the player count
    /// as one atomic step.
    fn join_battle(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = StoreResult<JoinOutcome>> + Send;

    /// Moves to `to` only if the current status is one of `from`, stamping
    /// `started_at` or `finished_at` with `at`.
    fn transition_battle(
        &self,
        id: Uuid,
        from: &[BattleStatus],
        to: BattleStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Option<BattleSession>>> + Send;

    /// Deletes unless the battle is active.
    fn delete_battle(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<BattleSession>>> + Send;

    fn list_battles(
        &self,
        filter: &BattleFilter,
    ) -> impl Future<Output = StoreResult<Vec<BattleSession>>> + Send;

    fn participants(&self, id: Uuid) -> impl Future<Output = StoreResult<Vec<Uuid>>> + Send;
}

pub trait StatsRepository: Send + Sync {
    fn ensure_stats(&self, user_id: Uuid) -> impl Future<Output = StoreResult<()>> + Send;

    /// Upserts the row and applies the outcome as increments.
    fn record_result(
        &self,
        user_id: Uuid,
        outcome: &BattleOutcome,
    ) -> impl Future<Output = StoreResult<UserBattleStats>> + Send;

    fn find_stats(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<UserBattleStats>>> + Send;
}

pub trait AchievementRepository: Send + Sync {
    fn list_achievements(&self) -> impl Future<Output = StoreResult<Vec<Achievement>>> + Send;

    fn find_achievement(
        &self,
        id: i32,
    ) -> impl Future<Output = StoreResult<Option<Achievement>>> + Send;

    fn insert_achievement(
        &self,
        content: &AchievementContent,
    ) -> impl Future<Output = StoreResult<Achievement>> + Send;

    /// All or nothing.
    fn insert_achievements(
        &self,
        contents: &[AchievementContent],
    ) -> impl Future<Output = StoreResult<Vec<Achievement>>> + Send;

    fn update_achievement(
        &self,
        id: i32,
        changes: &AchievementChanges,
    ) -> impl Future<Output = StoreResult<Option<Achievement>>> + Send;

    fn delete_achievement(
        &self,
        id: i32,
    ) -> impl Future<Output = StoreResult<Option<Achievement>>> + Send;

    fn has_achievement(
        &self,
        user_id: Uuid,
        achievement_id: i32,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Links the achievement and adds its points, raising the stored level by
    /// the number of level thresholds crossed.
    fn grant_achievement(
        &self,
        user_id: Uuid,
        achievement: &Achievement,
    ) -> impl Future<Output = StoreResult<Grant>> + Send;
}

pub trait ProfessorRepository: Send + Sync {
    fn list_professors(
        &self,
        locked: Option<bool>,
    ) -> impl Future<Output = StoreResult<Vec<ProfessorCard>>> + Send;

    fn find_professor(
        &self,
        id: i32,
    ) -> impl Future<Output = StoreResult<Option<ProfessorCard>>> + Send;

    fn insert_professor(
        &self,
        content: &ProfessorContent,
    ) -> impl Future<Output = StoreResult<ProfessorCard>> + Send;

    fn update_professor(
        &self,
        id: i32,
        changes: &ProfessorChanges,
    ) -> impl Future<Output = StoreResult<Option<ProfessorCard>>> + Send;

    fn delete_professor(
        &self,
        id: i32,
    ) -> impl Future<Output = StoreResult<Option<ProfessorCard>>> + Send;
}

pub trait ModuleRepository: Send + Sync {
    /// Newest first.
    fn list_modules(
        &self,
        filter: &ModuleFilter,
    ) -> impl Future<Output = StoreResult<Vec<CustomModule>>> + Send;

    /// Enabled modules for one role, by name.
    fn enabled_modules(
        &self,
        role: ModuleRole,
    ) -> impl Future<Output = StoreResult<Vec<CustomModule>>> + Send;

    fn find_module(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<CustomModule>>> + Send;

    fn insert_module(
        &self,
        content: &ModuleContent,
    ) -> impl Future<Output = StoreResult<CustomModule>> + Send;

    /// All or nothing.
    fn insert_modules(
        &self,
        contents: &[ModuleContent],
    ) -> impl Future<Output = StoreResult<Vec<CustomModule>>> + Send;

    fn update_module(
        &self,
        id: Uuid,
        changes: &ModuleChanges,
    ) -> impl Future<Output = StoreResult<Option<CustomModule>>> + Send;

    fn delete_module(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<CustomModule>>> + Send;

    /// Flips `enabled` in place.
    fn toggle_module(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<CustomModule>>> + Send;
}

/// Everything the server needs from persistence.
pub trait Store:
    UserRepository
    + QuestionRepository
    + BattleRepository
    + StatsRepository
    + AchievementRepository
    + ProfessorRepository
    + ModuleRepository
    + Clone
    + 'static
{
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;
}

/// 1-based page to row offset.
pub(crate) fn offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1) * limit
}
