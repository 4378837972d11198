//! Request bodies and query strings.
//!
//! Bodies reject unknown fields. Every struct is checked with `validator` by the
//! [`Valid`](crate::utils::Valid) and [`Params`](crate::utils::Params) extractors
//! before a handler runs.
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    database::{
        AchievementChanges, AchievementContent, BattleRole, ModuleChanges, ModuleContent,
        ProfessorChanges, ProfessorContent, QuestionContent,
    },
    error::AppError,
    models::{AccessMethod, BattleStatus, Difficulty, GameMode, ModuleRole, Role, Skill},
};

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_POINTS: i32 = 10;
pub const DEFAULT_MAX_PLAYERS: i32 = 4;

fn strong_password(password: &str) -> Result<(), ValidationError> {
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());

    if lower && upper && digit {
        Ok(())
    } else {
        Err(ValidationError::new("weak_password").with_message(
            "Password must contain at least one lowercase letter, one uppercase letter, and one number"
                .into(),
        ))
    }
}

fn answers_fit(answers: &[String]) -> Result<(), ValidationError> {
    if answers.iter().all(|a| (1..=200).contains(&a.trim().chars().count())) {
        Ok(())
    } else {
        Err(ValidationError::new("answer_length")
            .with_message("Each answer must be between 1 and 200 characters".into()))
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new("blank").with_message("Battle name is required".into()))
    } else {
        Ok(())
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(email(message = "Must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: String,
    #[validate(
        length(min = 6, message = "Password must be at least 6 characters long"),
        custom(function = "strong_password")
    )]
    pub password: String,
    pub role: Option<Role>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(email(message = "Must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: Option<String>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExperienceRequest {
    #[validate(range(
        min = 0,
        max = 1_000_000,
        message = "Experience gained must be between 0 and 1000000"
    ))]
    pub experience_gained: i64,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrantRequest {
    pub achievement_id: i32,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AwardRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    #[validate(range(min = 1, message = "Page must be a positive integer"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub role: Option<Role>,
}

#[derive(Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuestionRequest {
    #[validate(length(
        min = 10,
        max = 500,
        message = "Question text must be between 10 and 500 characters"
    ))]
    pub text: String,
    #[validate(
        length(min = 2, max = 6, message = "Must have between 2 and 6 answers"),
        custom(function = "answers_fit")
    )]
    pub answers: Vec<String>,
    #[validate(range(min = 0, message = "Correct answer index must be a non-negative integer"))]
    pub correct_answer_index: i32,
    pub difficulty: Option<Difficulty>,
    #[validate(length(min = 1, max = 50, message = "Category must be between 1 and 50 characters"))]
    pub category: Option<String>,
}

impl QuestionRequest {
    /// Trims the text and checks the answer index against the answers given.
    pub fn into_content(self) -> Result<QuestionContent, AppError> {
        if self.correct_answer_index as usize >= self.answers.len() {
            return Err(AppError::invalid("Correct answer index is out of bounds"));
        }

        Ok(QuestionContent {
            text: self.text.trim().to_string(),
            answers: self.answers.iter().map(|a| a.trim().to_string()).collect(),
            correct_answer_index: self.correct_answer_index,
            difficulty: self.difficulty.unwrap_or_default(),
            category: self
                .category
                .map(|c| c.trim().to_string())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        })
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkQuestions {
    #[validate(
        length(min = 1, max = 50, message = "Between 1 and 50 questions can be created at once"),
        nested
    )]
    pub questions: Vec<QuestionRequest>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionQuery {
    #[validate(range(min = 1, message = "Page must be a positive integer"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub author_id: Option<Uuid>,
}

#[derive(Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkillInput {
    #[validate(length(min = 1, max = 50, message = "Skill name must be between 1 and 50 characters"))]
    pub name: String,
    #[validate(range(min = 0, max = 100, message = "Skill score must be between 0 and 100"))]
    pub score: i32,
}

impl From<SkillInput> for Skill {
    fn from(input: SkillInput) -> Self {
        Skill {
            name: input.name.trim().to_string(),
            score: input.score,
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfessorRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 2, max = 100, message = "Title must be between 2 and 100 characters"))]
    pub title: String,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: String,
    #[validate(nested)]
    pub skills: Vec<SkillInput>,
    pub locked: Option<bool>,
}

impl From<ProfessorRequest> for ProfessorContent {
    fn from(request: ProfessorRequest) -> Self {
        ProfessorContent {
            name: request.name.trim().to_string(),
            title: request.title.trim().to_string(),
            image_url: request.image_url,
            skills: request.skills.into_iter().map(Skill::from).collect(),
            locked: request.locked.unwrap_or(true),
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfessorUpdate {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 2, max = 100, message = "Title must be between 2 and 100 characters"))]
    pub title: Option<String>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
    #[validate(nested)]
    pub skills: Option<Vec<SkillInput>>,
    pub locked: Option<bool>,
}

impl From<ProfessorUpdate> for ProfessorChanges {
    fn from(update: ProfessorUpdate) -> Self {
        ProfessorChanges {
            name: update.name.map(|n| n.trim().to_string()),
            title: update.title.map(|t| t.trim().to_string()),
            image_url: update.image_url,
            skills: update
                .skills
                .map(|skills| skills.into_iter().map(Skill::from).collect()),
            locked: update.locked,
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnlockRequest {
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfessorQuery {
    pub locked: Option<bool>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AvailableQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AchievementRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "Icon must be between 1 and 50 characters"))]
    pub icon: String,
    #[validate(length(
        min = 10,
        max = 200,
        message = "Description must be between 10 and 200 characters"
    ))]
    pub description: String,
    #[validate(range(min = 1, max = 1000, message = "Points must be between 1 and 1000"))]
    pub points: Option<i32>,
}

impl From<AchievementRequest> for AchievementContent {
    fn from(request: AchievementRequest) -> Self {
        AchievementContent {
            name: request.name.trim().to_string(),
            icon: request.icon.trim().to_string(),
            description: request.description.trim().to_string(),
            points: request.points.unwrap_or(DEFAULT_POINTS),
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AchievementUpdate {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Icon must be between 1 and 50 characters"))]
    pub icon: Option<String>,
    #[validate(length(
        min = 10,
        max = 200,
        message = "Description must be between 10 and 200 characters"
    ))]
    pub description: Option<String>,
    #[validate(range(min = 1, max = 1000, message = "Points must be between 1 and 1000"))]
    pub points: Option<i32>,
}

impl From<AchievementUpdate> for AchievementChanges {
    fn from(update: AchievementUpdate) -> Self {
        AchievementChanges {
            name: update.name.map(|n| n.trim().to_string()),
            icon: update.icon.map(|i| i.trim().to_string()),
            description: update.description.map(|d| d.trim().to_string()),
            points: update.points,
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkAchievements {
    #[validate(
        length(min = 1, max = 20, message = "Between 1 and 20 achievements can be created at once"),
        nested
    )]
    pub achievements: Vec<AchievementRequest>,
}

#[derive(Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "Icon must be between 1 and 50 characters"))]
    pub icon: String,
    pub role: ModuleRole,
    pub game_mode: GameMode,
    pub access_method: AccessMethod,
    pub enabled: Option<bool>,
}

impl From<ModuleRequest> for ModuleContent {
    fn from(request: ModuleRequest) -> Self {
        ModuleContent {
            name: request.name.trim().to_string(),
            icon: request.icon.trim().to_string(),
            role: request.role,
            game_mode: request.game_mode,
            access_method: request.access_method,
            enabled: request.enabled.unwrap_or(true),
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleUpdate {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Icon must be between 1 and 50 characters"))]
    pub icon: Option<String>,
    pub role: Option<ModuleRole>,
    pub game_mode: Option<GameMode>,
    pub access_method: Option<AccessMethod>,
    pub enabled: Option<bool>,
}

impl From<ModuleUpdate> for ModuleChanges {
    fn from(update: ModuleUpdate) -> Self {
        ModuleChanges {
            name: update.name.map(|n| n.trim().to_string()),
            icon: update.icon.map(|i| i.trim().to_string()),
            role: update.role,
            game_mode: update.game_mode,
            access_method: update.access_method,
            enabled: update.enabled,
        }
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkModules {
    #[validate(
        length(min = 1, max = 10, message = "Between 1 and 10 modules can be created at once"),
        nested
    )]
    pub modules: Vec<ModuleRequest>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModuleQuery {
    pub role: Option<ModuleRole>,
    pub enabled: Option<bool>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateBattleRequest {
    #[validate(
        length(max = 100, message = "Battle name must be at most 100 characters"),
        custom(function = "not_blank")
    )]
    pub name: String,
    #[validate(range(min = 2, max = 8, message = "Max players must be between 2 and 8"))]
    pub max_players: Option<i32>,
    pub questions: Option<Vec<Uuid>>,
}

#[derive(Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultInput {
    pub user_id: Uuid,
    #[validate(range(
        min = 0,
        max = 10_000,
        message = "Total questions must be between 0 and 10000"
    ))]
    pub total_questions: Option<i64>,
    #[validate(range(
        min = 0,
        max = 10_000,
        message = "Correct answers must be between 0 and 10000"
    ))]
    pub correct_answers: Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EndBattleRequest {
    pub winner_id: Option<Uuid>,
    #[validate(nested)]
    pub results: Option<Vec<ResultInput>>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BattleQuery {
    pub status: Option<BattleStatus>,
    pub role: Option<BattleRole>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn question(index: i32) -> QuestionRequest {
        QuestionRequest {
            text: "  Which planet is the largest?  ".into(),
            answers: vec!["Mars".into(), " Jupiter ".into(), "Venus".into()],
            correct_answer_index: index,
            difficulty: None,
            category: None,
        }
    }

    #[test]
    fn test_question_defaults_and_trimming() {
        let content = question(1).into_content().unwrap();

        assert_eq!(content.text, "Which planet is the largest?");
        assert_eq!(content.answers[1], "Jupiter");
        assert_eq!(content.difficulty, Difficulty::Medium);
        assert_eq!(content.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_answer_index_out_of_bounds() {
        assert!(question(2).validate().is_ok());
        assert!(matches!(
            question(3).into_content(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_answer_count_limits() {
        let mut request = question(0);
        request.answers = vec!["Only one".into()];
        assert!(request.validate().is_err());

        request.answers = vec!["a".into(), "".into()];
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_password_strength() {
        let register = |password: &str| RegisterRequest {
            email: "ada@example.com".into(),
            name: "Ada".into(),
            password: password.into(),
            role: None,
            image_url: None,
        };

        assert!(register("Secret1").validate().is_ok());
        assert!(register("secret1").validate().is_err());
        assert!(register("Sec1").validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let body = json!({ "name": "Ada", "level": 99 });

        assert!(serde_json::from_value::<UpdateUserRequest>(body).is_err());
    }

    #[test]
    fn test_battle_name_must_not_be_blank() {
        let request = CreateBattleRequest {
            name: "   ".into(),
            max_players: Some(4),
            questions: None,
        };

        assert!(request.validate().is_err());
    }

    #[test]
    fn test_bulk_caps() {
        let bulk = BulkQuestions {
            questions: vec![question(0); 51],
        };

        assert!(bulk.validate().is_err());
    }

    #[test]
    fn test_experience_award_is_bounded() {
        let award = |amount: i64| ExperienceRequest {
            experience_gained: amount,
        };

        assert!(award(0).validate().is_ok());
        assert!(award(1_000_000).validate().is_ok());
        assert!(award(-1).validate().is_err());
        assert!(award(i64::MAX).validate().is_err());
    }
}
