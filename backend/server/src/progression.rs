//! # Progression
//!
//! Experience only ever goes up. Every 100 points is one level, starting at 1.
//!
//! Two writers:
//! - Direct awards recompute the level from the new total
//! - Achievement awards add the number of thresholds crossed to the stored level
//!
//! Both land on [`level_for`] of the final total.
use tracing::info;
use uuid::Uuid;

use crate::{
    database::{AchievementRepository, Grant, UserRepository},
    error::AppError,
    models::{Achievement, User},
};

pub const XP_PER_LEVEL: i64 = 100;

pub fn level_for(experience: i64) -> i64 {
    experience.max(0) / XP_PER_LEVEL + 1
}

/// Levels gained by moving from `experience` to `experience + gained`.
pub fn level_delta(experience: i64, gained: i64) -> i64 {
    (experience + gained) / XP_PER_LEVEL - experience / XP_PER_LEVEL
}

pub async fn award_experience<R>(repo: &R, user_id: Uuid, gained: i64) -> Result<User, AppError>
where
    R: UserRepository,
{
    if gained < 0 {
        return Err(AppError::invalid("Experience gained must be a positive number"));
    }

    let user = repo
        .add_experience(user_id, gained)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!(
        "User {} gained {gained} XP, now {} XP at level {}",
        user.id, user.experience, user.level
    );

    Ok(user)
}

pub async fn award_achievement<R>(
    repo: &R,
    user_id: Uuid,
    achievement_id: i32,
) -> Result<(User, Achievement), AppError>
where
    R: UserRepository + AchievementRepository,
{
    let achievement = repo
        .find_achievement(achievement_id)
        .await?
        .ok_or(AppError::NotFound("Achievement"))?;

    if repo.find_user(user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }

    if repo.has_achievement(user_id, achievement_id).await? {
        return Err(AppError::AlreadyAwarded);
    }

    let user = match repo.grant_achievement(user_id, &achievement).await? {
        Grant::Granted(user) => user,
        Grant::AlreadyHeld => return Err(AppError::AlreadyAwarded),
        Grant::MissingUser => return Err(AppError::NotFound("User")),
        Grant::MissingAchievement => return Err(AppError::NotFound("Achievement")),
    };

    info!(
        "Awarded achievement {} to user {}, now {} XP at level {}",
        achievement.name, user.id, user.experience, user.level
    );

    Ok((user, achievement))
}
