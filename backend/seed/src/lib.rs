//! # Seeding
//!
//! Fills a fresh store with the starter accounts, professor cards, achievements,
//! questions and modules from `data/seed.json`.
//!
//! ## Rules
//! - Users are matched by email and never overwritten
//! - Cards, achievements and modules are matched by name
//! - Questions are only inserted when the store has none, all in one batch by the
//!   first teacher
//! - Awards that were already given are skipped
//!
//! Running it twice leaves the store as it was after the first run.
use std::{collections::HashSet, fs::read_to_string, path::Path};

use anyhow::{Context, Result, bail};
use edubattle::{
    auth::hash_password,
    database::{
        AchievementContent, ModuleContent, ModuleFilter, NewUser, ProfessorContent,
        QuestionContent, QuestionFilter, Store,
    },
    error::AppError,
    models::{Role, User},
    payloads::{AchievementRequest, ModuleRequest, ProfessorRequest, QuestionRequest},
    progression,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use validator::Validate;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub experience: i64,
    pub image_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedAward {
    pub email: String,
    pub achievement: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedData {
    pub users: Vec<SeedUser>,
    pub professors: Vec<ProfessorRequest>,
    pub achievements: Vec<AchievementRequest>,
    pub questions: Vec<QuestionRequest>,
    pub modules: Vec<ModuleRequest>,
    #[serde(default)]
    pub awards: Vec<SeedAward>,
}

impl SeedData {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)
            .with_context(|| format!("Failed to read seed data from {}", path.display()))?;

        let data: SeedData = serde_json::from_str(&raw).context("Malformed seed data")?;
        data.check()?;

        Ok(data)
    }

    /// Same rules the HTTP layer applies to each record.
    pub fn check(&self) -> Result<()> {
        for professor in &self.professors {
            professor
                .validate()
                .with_context(|| format!("Invalid professor card {}", professor.name))?;
        }
        for achievement in &self.achievements {
            achievement
                .validate()
                .with_context(|| format!("Invalid achievement {}", achievement.name))?;
        }
        for question in &self.questions {
            question
                .validate()
                .with_context(|| format!("Invalid question {}", question.text))?;
        }
        for module in &self.modules {
            module
                .validate()
                .with_context(|| format!("Invalid module {}", module.name))?;
        }

        Ok(())
    }

    fn steps(&self) -> u64 {
        (self.users.len()
            + self.professors.len()
            + self.achievements.len()
            + self.modules.len()
            + self.awards.len()
            + 1) as u64
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub users: usize,
    pub professors: usize,
    pub achievements: usize,
    pub questions: usize,
    pub modules: usize,
    pub awards: usize,
}

pub async fn seed<S: Store>(store: &S, data: SeedData, password: &str) -> Result<Summary> {
    let mut summary = Summary::default();

    let pb = ProgressBar::new(data.steps());
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );

    pb.set_message("users");
    let mut users = Vec::with_capacity(data.users.len());
    for seed_user in data.users {
        let (user, created) = ensure_user(store, seed_user, password).await?;
        if created {
            summary.users += 1;
        }
        users.push(user);
        pb.inc(1);
    }

    pb.set_message("professors");
    let existing: HashSet<String> = store
        .list_professors(None)
        .await?
        .into_iter()
        .map(|card| card.name)
        .collect();
    for professor in data.professors {
        if !existing.contains(professor.name.trim()) {
            store.insert_professor(&ProfessorContent::from(professor)).await?;
            summary.professors += 1;
        }
        pb.inc(1);
    }

    pb.set_message("achievements");
    let existing: HashSet<String> = store
        .list_achievements()
        .await?
        .into_iter()
        .map(|achievement| achievement.name)
        .collect();
    for achievement in data.achievements {
        if !existing.contains(achievement.name.trim()) {
            store
                .insert_achievement(&AchievementContent::from(achievement))
                .await?;
            summary.achievements += 1;
        }
        pb.inc(1);
    }

    pb.set_message("questions");
    summary.questions = seed_questions(store, &users, data.questions).await?;
    pb.inc(1);

    pb.set_message("modules");
    let existing: HashSet<String> = store
        .list_modules(&ModuleFilter::default())
        .await?
        .into_iter()
        .map(|module| module.name)
        .collect();
    for module in data.modules {
        if !existing.contains(module.name.trim()) {
            store.insert_module(&ModuleContent::from(module)).await?;
            summary.modules += 1;
        }
        pb.inc(1);
    }

    pb.set_message("awards");
    let achievements = store.list_achievements().await?;
    for award in data.awards {
        let user = users
            .iter()
            .find(|user| user.email == award.email)
            .with_context(|| format!("Award for unknown user {}", award.email))?;
        let achievement = achievements
            .iter()
            .find(|achievement| achievement.name == award.achievement)
            .with_context(|| format!("Award of unknown achievement {}", award.achievement))?;

        match progression::award_achievement(store, user.id, achievement.id).await {
            Ok(_) => summary.awards += 1,
            Err(AppError::AlreadyAwarded) => {}
            Err(e) => return Err(e.into()),
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");

    Ok(summary)
}

async fn ensure_user<S: Store>(store: &S, seed: SeedUser, password: &str) -> Result<(User, bool)> {
    let email = seed.email.trim().to_lowercase();

    if let Some(user) = store.find_user_by_email(&email).await? {
        return Ok((user, false));
    }

    let user = store
        .insert_user(&NewUser {
            email,
            name: seed.name,
            role: seed.role,
            image_url: seed.image_url,
            password_hash: hash_password(password.to_string()).await?,
        })
        .await?;
    store.ensure_stats(user.id).await?;

    let user = progression::award_experience(store, user.id, seed.experience).await?;

    Ok((user, true))
}

async fn seed_questions<S: Store>(
    store: &S,
    users: &[User],
    questions: Vec<QuestionRequest>,
) -> Result<usize> {
    let (_, total) = store
        .list_questions(&QuestionFilter {
            page: 1,
            limit: 1,
            ..Default::default()
        })
        .await?;
    if total > 0 || questions.is_empty() {
        return Ok(0);
    }

    let Some(author) = users.iter().find(|user| user.role == Role::Teacher) else {
        bail!("Seeding questions needs at least one teacher");
    };

    let contents = questions
        .into_iter()
        .map(QuestionRequest::into_content)
        .collect::<Result<Vec<QuestionContent>, _>>()?;

    Ok(store.insert_questions(author.id, &contents).await?.len())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use edubattle::database::{
        AchievementRepository, MemoryStore, ProfessorRepository, UserRepository,
    };

    use super::*;

    fn bundled() -> SeedData {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/seed.json");
        SeedData::load(&path).unwrap()
    }

    #[tokio::test]
    async fn test_seed_bundled_data() {
        let store = MemoryStore::new();

        let summary = seed(&store, bundled(), "Password123").await.unwrap();

        assert_eq!(summary.users, 3);
        assert_eq!(summary.professors, 4);
        assert_eq!(summary.achievements, 6);
        assert_eq!(summary.questions, 8);
        assert_eq!(summary.modules, 4);
        assert_eq!(summary.awards, 1);

        let student = store
            .find_user_by_email("student@edubattle.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(student.experience, 1250);
        assert_eq!(student.level, 13);
        assert_eq!(store.user_achievements(student.id).await.unwrap().len(), 1);

        let unlocked = store.list_professors(Some(false)).await.unwrap();
        assert_eq!(unlocked.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_twice_changes_nothing() {
        let store = MemoryStore::new();

        seed(&store, bundled(), "Password123").await.unwrap();
        let again = seed(&store, bundled(), "Password123").await.unwrap();

        assert_eq!(again, Summary::default());
        assert_eq!(store.list_achievements().await.unwrap().len(), 6);
    }
}
