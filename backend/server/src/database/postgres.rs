use chrono::{DateTime, Utc};
use sqlx::{
    PgPool,
    postgres::{PgPoolOptions, PgQueryResult},
    types::Json,
};
use tracing::info;
use uuid::Uuid;

use super::{
    AchievementChanges, AchievementContent, AchievementRepository, BattleFilter, BattleOutcome,
    BattleRepository, BattleRole, Grant, JoinOutcome, ModuleChanges, ModuleContent, ModuleFilter,
    ModuleRepository, NewBattle, NewUser, ProfessorChanges, ProfessorContent, ProfessorRepository,
    QuestionContent, QuestionFilter, QuestionRepository, StatsRepository, Store, StoreError,
    StoreResult, UserChanges, UserFilter, UserRepository, offset,
};
use crate::{
    models::{
        Achievement, BattleSession, BattleStatus, CustomModule, ModuleRole, ProfessorCard,
        Question, Role, User, UserBattleStats,
    },
    progression::XP_PER_LEVEL,
};

/// SQLSTATE for `bigint` arithmetic past its range.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn out_of_range(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == NUMERIC_OUT_OF_RANGE)
}

/// Maps constraint violations onto store errors, everything else stays a database error.
fn classify(error: sqlx::Error, conflict: &str, missing: &'static str) -> StoreError {
    if out_of_range(&error) {
        return StoreError::OutOfRange;
    }
    match error.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(conflict.to_string()),
        Some(db) if db.is_foreign_key_violation() => StoreError::Missing(missing),
        _ => StoreError::Database(error),
    }
}

fn checked(error: sqlx::Error) -> StoreError {
    if out_of_range(&error) {
        StoreError::OutOfRange
    } else {
        StoreError::Database(error)
    }
}

fn inserted(result: &PgQueryResult) -> bool {
    result.rows_affected() > 0
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to Postgres with up to {max_connections} connections");

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Migrations applied");

        Ok(())
    }
}

impl UserRepository for PgStore {
    async fn insert_user(&self, new: &NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (email, name, role, image_url, password_hash)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(&new.email)
        .bind(&new.name)
        .bind(new.role)
        .bind(&new.image_url)
        .bind(&new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "User with this email already exists", "User"))
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<(Vec<User>, i64)> {
        let users: Vec<User> = sqlx::query_as(
            "SELECT * FROM users
             WHERE ($1::user_role IS NULL OR role = $1)
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3",
        )
        .bind(filter.role)
        .bind(filter.limit)
        .bind(offset(filter.page, filter.limit))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE ($1::user_role IS NULL OR role = $1)")
                .bind(filter.role)
                .fetch_one(&self.pool)
                .await?;

        Ok((users, total))
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as(
            "UPDATE users
             SET name = COALESCE($2, name),
                 image_url = COALESCE($3, image_url),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.image_url)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut tx = self.pool.begin().await?;

        // Seats are released before the participant rows cascade away.
        sqlx::query(
            "UPDATE battle_sessions
             SET current_players = current_players - 1
             WHERE status = 'waiting'
               AND id IN (SELECT battle_id FROM battle_participants WHERE user_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let user = sqlx::query_as("DELETE FROM users WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user)
    }

    async fn add_experience(&self, id: Uuid, gained: i64) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as(
            "UPDATE users
             SET experience = experience + $2,
                 level = (experience + $2) / $3 + 1,
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(gained)
        .bind(XP_PER_LEVEL)
        .fetch_optional(&self.pool)
        .await
        .map_err(checked)?)
    }

    async fn user_achievements(&self, id: Uuid) -> StoreResult<Vec<Achievement>> {
        Ok(sqlx::query_as(
            "SELECT a.* FROM achievements a
             JOIN user_achievements ua ON ua.achievement_id = a.id
             WHERE ua.user_id = $1
             ORDER BY a.id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }
}

const INSERT_QUESTION: &str = "INSERT INTO questions
    (text, answers, correct_answer_index, difficulty, category, author_id)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING *";

impl QuestionRepository for PgStore {
    async fn insert_question(
        &self,
        author_id: Uuid,
        content: &QuestionContent,
    ) -> StoreResult<Question> {
        sqlx::query_as(INSERT_QUESTION)
            .bind(&content.text)
            .bind(&content.answers)
            .bind(content.correct_answer_index)
            .bind(content.difficulty)
            .bind(&content.category)
            .bind(author_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "Question already exists", "Author"))
    }

    async fn insert_questions(
        &self,
        author_id: Uuid,
        contents: &[QuestionContent],
    ) -> StoreResult<Vec<Question>> {
        let mut tx = self.pool.begin().await?;
        let mut questions = Vec::with_capacity(contents.len());

        for content in contents {
            let question: Question = sqlx::query_as(INSERT_QUESTION)
                .bind(&content.text)
                .bind(&content.answers)
                .bind(content.correct_answer_index)
                .bind(content.difficulty)
                .bind(&content.category)
                .bind(author_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify(e, "Question already exists", "Author"))?;
            questions.push(question);
        }

        tx.commit().await?;

        Ok(questions)
    }

    async fn find_question(&self, id: Uuid) -> StoreResult<Option<Question>> {
        Ok(sqlx::query_as("SELECT * FROM questions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn count_existing_questions(&self, ids: &[Uuid]) -> StoreResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_questions(&self, filter: &QuestionFilter) -> StoreResult<(Vec<Question>, i64)> {
        const WHERE: &str = "WHERE ($1::text IS NULL OR category = $1)
              AND ($2::question_difficulty IS NULL OR difficulty = $2)
              AND ($3::uuid IS NULL OR author_id = $3)";

        let questions: Vec<Question> = sqlx::query_as(&format!(
            "SELECT * FROM questions {WHERE} ORDER BY created_at DESC, id LIMIT $4 OFFSET $5"
        ))
        .bind(&filter.category)
        .bind(filter.difficulty)
        .bind(filter.author_id)
        .bind(filter.limit)
        .bind(offset(filter.page, filter.limit))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM questions {WHERE}"))
            .bind(&filter.category)
            .bind(filter.difficulty)
            .bind(filter.author_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((questions, total))
    }

    async fn update_question(
        &self,
        id: Uuid,
        content: &QuestionContent,
    ) -> StoreResult<Option<Question>> {
        Ok(sqlx::query_as(
            "UPDATE questions
             SET text = $2, answers = $3, correct_answer_index = $4,
                 difficulty = $5, category = $6, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&content.text)
        .bind(&content.answers)
        .bind(content.correct_answer_index)
        .bind(content.difficulty)
        .bind(&content.category)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_question(&self, id: Uuid) -> StoreResult<Option<Question>> {
        Ok(sqlx::query_as("DELETE FROM questions WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn categories(&self) -> StoreResult<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT DISTINCT category FROM questions ORDER BY category")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

impl BattleRepository for PgStore {
    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM battle_sessions WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn insert_battle(&self, new: &NewBattle) -> StoreResult<BattleSession> {
        sqlx::query_as(
            "INSERT INTO battle_sessions (code, host_id, name, max_players, questions)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(&new.code)
        .bind(new.host_id)
        .bind(&new.name)
        .bind(new.max_players)
        .bind(&new.questions)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, &format!("Battle code {} is taken", new.code), "Host"))
    }

    async fn find_battle(&self, id: Uuid) -> StoreResult<Option<BattleSession>> {
        Ok(sqlx::query_as("SELECT * FROM battle_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_battle_by_code(&self, code: &str) -> StoreResult<Option<BattleSession>> {
        Ok(sqlx::query_as("SELECT * FROM battle_sessions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn join_battle(&self, id: Uuid, user_id: Uuid) -> StoreResult<JoinOutcome> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here serializes joins on the same battle.
        let claimed: Option<BattleSession> = sqlx::query_as(
            "UPDATE battle_sessions
             SET current_players = current_players + 1
             WHERE id = $1 AND status = 'waiting' AND current_players < max_players
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(battle) = claimed else {
            tx.rollback().await?;

            return Ok(match self.find_battle(id).await? {
                None => JoinOutcome::Missing,
                Some(battle) if battle.status != BattleStatus::Waiting => JoinOutcome::NotWaiting,
                Some(_) => JoinOutcome::Full,
            });
        };

        let result = sqlx::query(
            "INSERT INTO battle_participants (battle_id, user_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, "Already joined", "User"))?;

        if !inserted(&result) {
            tx.rollback().await?;
            return Ok(JoinOutcome::AlreadyJoined);
        }

        tx.commit().await?;

        Ok(JoinOutcome::Joined(battle))
    }

    async fn transition_battle(
        &self,
        id: Uuid,
        from: &[BattleStatus],
        to: BattleStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<BattleSession>> {
        let from: Vec<&str> = from.iter().map(|status| status.as_str()).collect();

        Ok(sqlx::query_as(
            "UPDATE battle_sessions
             SET status = $3,
                 started_at = CASE WHEN $3 = 'active'::battle_status THEN $4 ELSE started_at END,
                 finished_at = CASE WHEN $3 = 'finished'::battle_status THEN $4 ELSE finished_at END
             WHERE id = $1 AND status::text = ANY($2)
             RETURNING *",
        )
        .bind(id)
        .bind(&from)
        .bind(to)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_battle(&self, id: Uuid) -> StoreResult<Option<BattleSession>> {
        Ok(sqlx::query_as(
            "DELETE FROM battle_sessions WHERE id = $1 AND status <> 'active' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_battles(&self, filter: &BattleFilter) -> StoreResult<Vec<BattleSession>> {
        let role = filter.role.map(|role| match role {
            BattleRole::Host => "host",
            BattleRole::Participant => "participant",
        });

        Ok(sqlx::query_as(
            "SELECT b.* FROM battle_sessions b
             WHERE ($2::battle_status IS NULL OR b.status = $2)
               AND CASE $3::text
                   WHEN 'host' THEN b.host_id = $1
                   WHEN 'participant' THEN EXISTS (
                       SELECT 1 FROM battle_participants p
                       WHERE p.battle_id = b.id AND p.user_id = $1)
                   ELSE b.host_id = $1 OR EXISTS (
                       SELECT 1 FROM battle_participants p
                       WHERE p.battle_id = b.id AND p.user_id = $1)
                   END
             ORDER BY b.created_at DESC
             LIMIT $4",
        )
        .bind(filter.user_id)
        .bind(filter.status)
        .bind(role)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn participants(&self, id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar(
            "SELECT user_id FROM battle_participants WHERE battle_id = $1 ORDER BY user_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }
}

impl StatsRepository for PgStore {
    async fn ensure_stats(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_battle_stats (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "Stats already exist", "User"))?;

        Ok(())
    }

    async fn record_result(
        &self,
        user_id: Uuid,
        outcome: &BattleOutcome,
    ) -> StoreResult<UserBattleStats> {
        sqlx::query_as(
            "INSERT INTO user_battle_stats AS s
                 (user_id, total_games, wins, losses, total_questions, correct_answers, experience)
             VALUES ($1, 1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id) DO UPDATE SET
                 total_games = s.total_games + 1,
                 wins = s.wins + EXCLUDED.wins,
                 losses = s.losses + EXCLUDED.losses,
                 total_questions = s.total_questions + EXCLUDED.total_questions,
                 correct_answers = s.correct_answers + EXCLUDED.correct_answers,
                 experience = s.experience + EXCLUDED.experience
             RETURNING *",
        )
        .bind(user_id)
        .bind(i64::from(outcome.won))
        .bind(i64::from(!outcome.won))
        .bind(outcome.total_questions)
        .bind(outcome.correct_answers)
        .bind(outcome.experience)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "Stats already exist", "User"))
    }

    async fn find_stats(&self, user_id: Uuid) -> StoreResult<Option<UserBattleStats>> {
        Ok(sqlx::query_as("SELECT * FROM user_battle_stats WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

const USER_FK: &str = "user_achievements_user_id_fkey";
const ACHIEVEMENT_FK: &str = "user_achievements_achievement_id_fkey";

const INSERT_ACHIEVEMENT: &str = "INSERT INTO achievements (name, icon, description, points)
    VALUES ($1, $2, $3, $4)
    RETURNING *";

impl AchievementRepository for PgStore {
    async fn list_achievements(&self) -> StoreResult<Vec<Achievement>> {
        Ok(sqlx::query_as("SELECT * FROM achievements ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_achievement(&self, id: i32) -> StoreResult<Option<Achievement>> {
        Ok(sqlx::query_as("SELECT * FROM achievements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_achievement(&self, content: &AchievementContent) -> StoreResult<Achievement> {
        Ok(sqlx::query_as(INSERT_ACHIEVEMENT)
            .bind(&content.name)
            .bind(&content.icon)
            .bind(&content.description)
            .bind(content.points)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn insert_achievements(
        &self,
        contents: &[AchievementContent],
    ) -> StoreResult<Vec<Achievement>> {
        let mut tx = self.pool.begin().await?;
        let mut achievements = Vec::with_capacity(contents.len());

        for content in contents {
            let achievement: Achievement = sqlx::query_as(INSERT_ACHIEVEMENT)
                .bind(&content.name)
                .bind(&content.icon)
                .bind(&content.description)
                .bind(content.points)
                .fetch_one(&mut *tx)
                .await?;
            achievements.push(achievement);
        }

        tx.commit().await?;

        Ok(achievements)
    }

    async fn update_achievement(
        &self,
        id: i32,
        changes: &AchievementChanges,
    ) -> StoreResult<Option<Achievement>> {
        Ok(sqlx::query_as(
            "UPDATE achievements
             SET name = COALESCE($2, name),
                 icon = COALESCE($3, icon),
                 description = COALESCE($4, description),
                 points = COALESCE($5, points),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.icon)
        .bind(&changes.description)
        .bind(changes.points)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_achievement(&self, id: i32) -> StoreResult<Option<Achievement>> {
        Ok(sqlx::query_as("DELETE FROM achievements WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn has_achievement(&self, user_id: Uuid, achievement_id: i32) -> StoreResult<bool> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM user_achievements WHERE user_id = $1 AND achievement_id = $2)",
        )
        .bind(user_id)
        .bind(achievement_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn grant_achievement(
        &self,
        user_id: Uuid,
        achievement: &Achievement,
    ) -> StoreResult<Grant> {
        let mut tx = self.pool.begin().await?;

        let linked = sqlx::query(
            "INSERT INTO user_achievements (user_id, achievement_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(achievement.id)
        .execute(&mut *tx)
        .await;

        let result = match linked {
            Ok(result) => result,
            Err(e) => {
                let constraint = e.as_database_error().and_then(|db| db.constraint());
                return match constraint {
                    Some(USER_FK) => Ok(Grant::MissingUser),
                    Some(ACHIEVEMENT_FK) => Ok(Grant::MissingAchievement),
                    _ => Err(StoreError::Database(e)),
                };
            }
        };
        if !inserted(&result) {
            return Ok(Grant::AlreadyHeld);
        }

        // SET expressions all see the row as it was before the update.
        let user: User = sqlx::query_as(
            "UPDATE users
             SET level = level + (experience + $2) / $3 - experience / $3,
                 experience = experience + $2,
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(user_id)
        .bind(i64::from(achievement.points))
        .bind(XP_PER_LEVEL)
        .fetch_one(&mut *tx)
        .await
        .map_err(checked)?;

        tx.commit().await?;

        Ok(Grant::Granted(user))
    }
}

impl ProfessorRepository for PgStore {
    async fn list_professors(&self, locked: Option<bool>) -> StoreResult<Vec<ProfessorCard>> {
        Ok(sqlx::query_as(
            "SELECT * FROM professor_cards
             WHERE ($1::boolean IS NULL OR locked = $1)
             ORDER BY id",
        )
        .bind(locked)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_professor(&self, id: i32) -> StoreResult<Option<ProfessorCard>> {
        Ok(sqlx::query_as("SELECT * FROM professor_cards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_professor(&self, content: &ProfessorContent) -> StoreResult<ProfessorCard> {
        Ok(sqlx::query_as(
            "INSERT INTO professor_cards (name, title, image_url, skills, locked)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(&content.name)
        .bind(&content.title)
        .bind(&content.image_url)
        .bind(Json(&content.skills))
        .bind(content.locked)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_professor(
        &self,
        id: i32,
        changes: &ProfessorChanges,
    ) -> StoreResult<Option<ProfessorCard>> {
        Ok(sqlx::query_as(
            "UPDATE professor_cards
             SET name = COALESCE($2, name),
                 title = COALESCE($3, title),
                 image_url = COALESCE($4, image_url),
                 skills = COALESCE($5, skills),
                 locked = COALESCE($6, locked),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.title)
        .bind(&changes.image_url)
        .bind(changes.skills.as_ref().map(Json))
        .bind(changes.locked)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_professor(&self, id: i32) -> StoreResult<Option<ProfessorCard>> {
        Ok(sqlx::query_as("DELETE FROM professor_cards WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

const INSERT_MODULE: &str = "INSERT INTO custom_modules
    (name, icon, role, game_mode, access_method, enabled)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING *";

impl ModuleRepository for PgStore {
    async fn list_modules(&self, filter: &ModuleFilter) -> StoreResult<Vec<CustomModule>> {
        Ok(sqlx::query_as(
            "SELECT * FROM custom_modules
             WHERE ($1::module_role IS NULL OR role = $1)
               AND ($2::boolean IS NULL OR enabled = $2)
             ORDER BY created_at DESC",
        )
        .bind(filter.role)
        .bind(filter.enabled)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn enabled_modules(&self, role: ModuleRole) -> StoreResult<Vec<CustomModule>> {
        Ok(sqlx::query_as(
            "SELECT * FROM custom_modules WHERE role = $1 AND enabled ORDER BY name",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        Ok(sqlx::query_as("SELECT * FROM custom_modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_module(&self, content: &ModuleContent) -> StoreResult<CustomModule> {
        Ok(sqlx::query_as(INSERT_MODULE)
            .bind(&content.name)
            .bind(&content.icon)
            .bind(content.role)
            .bind(content.game_mode)
            .bind(content.access_method)
            .bind(content.enabled)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn insert_modules(&self, contents: &[ModuleContent]) -> StoreResult<Vec<CustomModule>> {
        let mut tx = self.pool.begin().await?;
        let mut modules = Vec::with_capacity(contents.len());

        for content in contents {
            let module: CustomModule = sqlx::query_as(INSERT_MODULE)
                .bind(&content.name)
                .bind(&content.icon)
                .bind(content.role)
                .bind(content.game_mode)
                .bind(content.access_method)
                .bind(content.enabled)
                .fetch_one(&mut *tx)
                .await?;
            modules.push(module);
        }

        tx.commit().await?;

        Ok(modules)
    }

    async fn update_module(
        &self,
        id: Uuid,
        changes: &ModuleChanges,
    ) -> StoreResult<Option<CustomModule>> {
        Ok(sqlx::query_as(
            "UPDATE custom_modules
             SET name = COALESCE($2, name),
                 icon = COALESCE($3, icon),
                 role = COALESCE($4, role),
                 game_mode = COALESCE($5, game_mode),
                 access_method = COALESCE($6, access_method),
                 enabled = COALESCE($7, enabled),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.icon)
        .bind(changes.role)
        .bind(changes.game_mode)
        .bind(changes.access_method)
        .bind(changes.enabled)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        Ok(sqlx::query_as("DELETE FROM custom_modules WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn toggle_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        Ok(sqlx::query_as(
            "UPDATE custom_modules
             SET enabled = NOT enabled, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }
}

/// These run against `DATABASE_URL` and are skipped when it is unset.
#[cfg(test)]
mod tests {
    use std::env;

    use super::*;
    use crate::battle::random_code;

    async fn store() -> Option<PgStore> {
        let Ok(url) = env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping");
            return None;
        };

        let store = PgStore::connect(&url, 8).await.unwrap();
        store.migrate().await.unwrap();

        Some(store)
    }

    async fn user(store: &PgStore, experience: i64) -> User {
        let user = store
            .insert_user(&NewUser {
                email: format!("{}@pg.test", Uuid::new_v4()),
                name: "Pg Tester".into(),
                role: Role::Student,
                image_url: String::new(),
                password_hash: String::new(),
            })
            .await
            .unwrap();

        if experience > 0 {
            return store.add_experience(user.id, experience).await.unwrap().unwrap();
        }
        user
    }

    async fn battle(store: &PgStore, max_players: i32) -> BattleSession {
        let host = user(store, 0).await;

        store
            .insert_battle(&NewBattle {
                code: random_code(),
                host_id: host.id,
                name: "Pg battle".into(),
                max_players,
                questions: vec![],
            })
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_never_overbook() {
        let Some(store) = store().await else { return };
        let battle_id = battle(&store, 2).await.id;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let joiner = user(&store, 0).await;
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.join_battle(battle_id, joiner.id).await.unwrap()
            }));
        }

        let mut joined = 0;
        for handle in handles {
            match handle.await.unwrap() {
                JoinOutcome::Joined(_) => joined += 1,
                JoinOutcome::Full => {}
                other => panic!("unexpected join outcome {other:?}"),
            }
        }

        let battle = store.find_battle(battle_id).await.unwrap().unwrap();
        assert_eq!(joined, 2);
        assert_eq!(battle.current_players, 2);
        assert_eq!(store.participants(battle_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_and_deleted_participant() {
        let Some(store) = store().await else { return };
        let battle = battle(&store, 2).await;
        let leaving = user(&store, 0).await;
        let staying = user(&store, 0).await;

        store.join_battle(battle.id, leaving.id).await.unwrap();
        assert!(matches!(
            store.join_battle(battle.id, leaving.id).await.unwrap(),
            JoinOutcome::AlreadyJoined
        ));
        store.join_battle(battle.id, staying.id).await.unwrap();

        store.delete_user(leaving.id).await.unwrap();

        let after = store.find_battle(battle.id).await.unwrap().unwrap();
        assert_eq!(after.current_players, 1);
        let late = user(&store, 0).await;
        assert!(matches!(
            store.join_battle(battle.id, late.id).await.unwrap(),
            JoinOutcome::Joined(_)
        ));
    }

    #[tokio::test]
    async fn test_grant_achievement_outcomes() {
        let Some(store) = store().await else { return };
        let learner = user(&store, 90).await;
        let achievement = store
            .insert_achievement(&AchievementContent {
                name: "Pg badge".into(),
                icon: "*".into(),
                description: "Granted by the Postgres tests".into(),
                points: 25,
            })
            .await
            .unwrap();

        let grant = store.grant_achievement(learner.id, &achievement).await.unwrap();
        let Grant::Granted(granted) = grant else {
            panic!("first grant was not applied");
        };
        assert_eq!((granted.experience, granted.level), (115, 2));

        assert!(matches!(
            store.grant_achievement(learner.id, &achievement).await.unwrap(),
            Grant::AlreadyHeld
        ));
        assert!(matches!(
            store.grant_achievement(Uuid::new_v4(), &achievement).await.unwrap(),
            Grant::MissingUser
        ));

        store.delete_achievement(achievement.id).await.unwrap();
        let other = user(&store, 0).await;
        assert!(matches!(
            store.grant_achievement(other.id, &achievement).await.unwrap(),
            Grant::MissingAchievement
        ));
    }

    #[tokio::test]
    async fn test_experience_overflow_is_out_of_range() {
        let Some(store) = store().await else { return };
        let learner = user(&store, 90).await;

        let error = store.add_experience(learner.id, i64::MAX).await.unwrap_err();

        assert!(matches!(error, StoreError::OutOfRange));
        let after = store.find_user(learner.id).await.unwrap().unwrap();
        assert_eq!(after.experience, 90);
    }
}
