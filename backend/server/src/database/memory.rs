use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;
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
    progression::{level_delta, level_for},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    questions: HashMap<Uuid, Question>,
    battles: HashMap<Uuid, BattleSession>,
    participants: HashMap<Uuid, HashSet<Uuid>>,
    stats: HashMap<Uuid, UserBattleStats>,
    achievements: BTreeMap<i32, Achievement>,
    earned: HashSet<(Uuid, i32)>,
    professors: BTreeMap<i32, ProfessorCard>,
    modules: HashMap<Uuid, CustomModule>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing timestamps so "newest first" never ties.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn next_achievement_id(&self) -> i32 {
        self.achievements.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_professor_id(&self) -> i32 {
        self.professors.keys().next_back().map_or(1, |id| id + 1)
    }

    fn new_question(&mut self, author_id: Uuid, content: &QuestionContent) -> Question {
        let now = self.stamp();
        let question = Question {
            id: Uuid::new_v4(),
            text: content.text.clone(),
            answers: content.answers.clone(),
            correct_answer_index: content.correct_answer_index,
            difficulty: content.difficulty,
            category: content.category.clone(),
            author_id,
            created_at: now,
            updated_at: now,
        };
        self.questions.insert(question.id, question.clone());
        question
    }

    fn new_achievement(&mut self, content: &AchievementContent) -> Achievement {
        let now = self.stamp();
        let achievement = Achievement {
            id: self.next_achievement_id(),
            name: content.name.clone(),
            icon: content.icon.clone(),
            description: content.description.clone(),
            points: content.points,
            created_at: now,
            updated_at: now,
        };
        self.achievements.insert(achievement.id, achievement.clone());
        achievement
    }

    fn new_module(&mut self, content: &ModuleContent) -> CustomModule {
        let now = self.stamp();
        let module = CustomModule {
            id: Uuid::new_v4(),
            name: content.name.clone(),
            icon: content.icon.clone(),
            role: content.role,
            game_mode: content.game_mode,
            access_method: content.access_method,
            enabled: content.enabled,
            created_at: now,
            updated_at: now,
        };
        self.modules.insert(module.id, module.clone());
        module
    }
}

fn page<T>(rows: Vec<T>, page: i64, limit: i64) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let rows = rows
        .into_iter()
        .skip(offset(page, limit) as usize)
        .take(limit.max(0) as usize)
        .collect();

    (rows, total)
}

/// In-process store. Every operation takes the single lock, so each one is atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user directly, bypassing registration. Level follows `experience`.
    pub async fn seed_user(&self, email: &str, role: Role, experience: i64) -> User {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            role,
            experience,
            level: level_for(experience),
            image_url: String::new(),
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        user
    }
}

impl UserRepository for MemoryStore {
    async fn insert_user(&self, new: &NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;

        if tables.users.values().any(|user| user.email == new.email) {
            return Err(StoreError::Conflict("User with this email already exists".into()));
        }

        let now = tables.stamp();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            name: new.name.clone(),
            role: new.role,
            experience: 0,
            level: level_for(0),
            image_url: new.image_url.clone(),
            password_hash: new.password_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;

        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<(Vec<User>, i64)> {
        let tables = self.tables.lock().await;

        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|user| filter.role.is_none_or(|role| user.role == role))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(page(users, filter.page, filter.limit))
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.users.get_mut(&id).map(|user| {
            if let Some(name) = &changes.name {
                user.name = name.clone();
            }
            if let Some(image_url) = &changes.image_url {
                user.image_url = image_url.clone();
            }
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let Some(user) = tables.users.remove(&id) else {
            return Ok(None);
        };

        tables.stats.remove(&id);
        tables.earned.retain(|(user_id, _)| *user_id != id);
        tables.questions.retain(|_, question| question.author_id != id);

        let hosted: Vec<Uuid> = tables
            .battles
            .values()
            .filter(|battle| battle.host_id == id)
            .map(|battle| battle.id)
            .collect();
        for battle_id in hosted {
            tables.battles.remove(&battle_id);
            tables.participants.remove(&battle_id);
        }
        for (battle_id, members) in tables.participants.iter_mut() {
            if !members.remove(&id) {
                continue;
            }
            if let Some(battle) = tables.battles.get_mut(battle_id) {
                if battle.status == BattleStatus::Waiting {
                    battle.current_players -= 1;
                }
            }
        }

        Ok(Some(user))
    }

    async fn add_experience(&self, id: Uuid, gained: i64) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        user.experience = user.experience.checked_add(gained).ok_or(StoreError::OutOfRange)?;
        user.level = level_for(user.experience);
        user.updated_at = now;

        Ok(Some(user.clone()))
    }

    async fn user_achievements(&self, id: Uuid) -> StoreResult<Vec<Achievement>> {
        let tables = self.tables.lock().await;

        Ok(tables
            .achievements
            .values()
            .filter(|achievement| tables.earned.contains(&(id, achievement.id)))
            .cloned()
            .collect())
    }
}

impl QuestionRepository for MemoryStore {
    async fn insert_question(
        &self,
        author_id: Uuid,
        content: &QuestionContent,
    ) -> StoreResult<Question> {
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&author_id) {
            return Err(StoreError::Missing("Author"));
        }

        Ok(tables.new_question(author_id, content))
    }

    async fn insert_questions(
        &self,
        author_id: Uuid,
        contents: &[QuestionContent],
    ) -> StoreResult<Vec<Question>> {
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&author_id) {
            return Err(StoreError::Missing("Author"));
        }

        Ok(contents
            .iter()
            .map(|content| tables.new_question(author_id, content))
            .collect())
    }

    async fn find_question(&self, id: Uuid) -> StoreResult<Option<Question>> {
        Ok(self.tables.lock().await.questions.get(&id).cloned())
    }

    async fn count_existing_questions(&self, ids: &[Uuid]) -> StoreResult<i64> {
        let tables = self.tables.lock().await;

        Ok(ids.iter().filter(|id| tables.questions.contains_key(id)).count() as i64)
    }

    async fn list_questions(&self, filter: &QuestionFilter) -> StoreResult<(Vec<Question>, i64)> {
        let tables = self.tables.lock().await;

        let mut questions: Vec<Question> = tables
            .questions
            .values()
            .filter(|q| filter.category.as_ref().is_none_or(|c| &q.category == c))
            .filter(|q| filter.difficulty.is_none_or(|d| q.difficulty == d))
            .filter(|q| filter.author_id.is_none_or(|a| q.author_id == a))
            .cloned()
            .collect();
        questions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(page(questions, filter.page, filter.limit))
    }

    async fn update_question(
        &self,
        id: Uuid,
        content: &QuestionContent,
    ) -> StoreResult<Option<Question>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.questions.get_mut(&id).map(|question| {
            question.text = content.text.clone();
            question.answers = content.answers.clone();
            question.correct_answer_index = content.correct_answer_index;
            question.difficulty = content.difficulty;
            question.category = content.category.clone();
            question.updated_at = now;
            question.clone()
        }))
    }

    async fn delete_question(&self, id: Uuid) -> StoreResult<Option<Question>> {
        Ok(self.tables.lock().await.questions.remove(&id))
    }

    async fn categories(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;

        let mut categories: Vec<String> = tables
            .questions
            .values()
            .map(|question| question.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();

        Ok(categories)
    }
}

impl BattleRepository for MemoryStore {
    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().await;

        Ok(tables.battles.values().any(|battle| battle.code == code))
    }

    async fn insert_battle(&self, new: &NewBattle) -> StoreResult<BattleSession> {
        let mut tables = self.tables.lock().await;

        if tables.battles.values().any(|battle| battle.code == new.code) {
            return Err(StoreError::Conflict(format!("Battle code {} is taken", new.code)));
        }
        if !tables.users.contains_key(&new.host_id) {
            return Err(StoreError::Missing("Host"));
        }

        let battle = BattleSession {
            id: Uuid::new_v4(),
            code: new.code.clone(),
            host_id: new.host_id,
            name: new.name.clone(),
            max_players: new.max_players,
            current_players: 0,
            questions: new.questions.clone(),
            status: BattleStatus::Waiting,
            created_at: tables.stamp(),
            started_at: None,
            finished_at: None,
        };
        tables.battles.insert(battle.id, battle.clone());

        Ok(battle)
    }

    async fn find_battle(&self, id: Uuid) -> StoreResult<Option<BattleSession>> {
        Ok(self.tables.lock().await.battles.get(&id).cloned())
    }

    async fn find_battle_by_code(&self, code: &str) -> StoreResult<Option<BattleSession>> {
        let tables = self.tables.lock().await;

        Ok(tables.battles.values().find(|battle| battle.code == code).cloned())
    }

    async fn join_battle(&self, id: Uuid, user_id: Uuid) -> StoreResult<JoinOutcome> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let Some(battle) = tables.battles.get_mut(&id) else {
            return Ok(JoinOutcome::Missing);
        };
        if battle.status != BattleStatus::Waiting {
            return Ok(JoinOutcome::NotWaiting);
        }
        if battle.is_full() {
            return Ok(JoinOutcome::Full);
        }
        if !tables.participants.entry(id).or_default().insert(user_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        battle.current_players += 1;

        Ok(JoinOutcome::Joined(battle.clone()))
    }

    async fn transition_battle(
        &self,
        id: Uuid,
        from: &[BattleStatus],
        to: BattleStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<BattleSession>> {
        let mut tables = self.tables.lock().await;

        Ok(tables
            .battles
            .get_mut(&id)
            .filter(|battle| from.contains(&battle.status))
            .map(|battle| {
                battle.status = to;
                match to {
                    BattleStatus::Active => battle.started_at = Some(at),
                    BattleStatus::Finished => battle.finished_at = Some(at),
                    BattleStatus::Waiting => {}
                }
                battle.clone()
            }))
    }

    async fn delete_battle(&self, id: Uuid) -> StoreResult<Option<BattleSession>> {
        let mut tables = self.tables.lock().await;

        let deletable = tables
            .battles
            .get(&id)
            .is_some_and(|battle| battle.status != BattleStatus::Active);
        if !deletable {
            return Ok(None);
        }

        tables.participants.remove(&id);

        Ok(tables.battles.remove(&id))
    }

    async fn list_battles(&self, filter: &BattleFilter) -> StoreResult<Vec<BattleSession>> {
        let tables = self.tables.lock().await;

        let joined = |battle: &BattleSession| {
            tables
                .participants
                .get(&battle.id)
                .is_some_and(|members| members.contains(&filter.user_id))
        };

        let mut battles: Vec<BattleSession> = tables
            .battles
            .values()
            .filter(|battle| filter.status.is_none_or(|status| battle.status == status))
            .filter(|battle| match filter.role {
                Some(BattleRole::Host) => battle.host_id == filter.user_id,
                Some(BattleRole::Participant) => joined(battle),
                None => battle.host_id == filter.user_id || joined(battle),
            })
            .cloned()
            .collect();
        battles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        battles.truncate(filter.limit.max(0) as usize);

        Ok(battles)
    }

    async fn participants(&self, id: Uuid) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.lock().await;

        let mut members: Vec<Uuid> = tables
            .participants
            .get(&id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort();

        Ok(members)
    }
}

impl StatsRepository for MemoryStore {
    async fn ensure_stats(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::Missing("User"));
        }
        tables.stats.entry(user_id).or_insert_with(|| UserBattleStats {
            user_id,
            ..Default::default()
        });

        Ok(())
    }

    async fn record_result(
        &self,
        user_id: Uuid,
        outcome: &BattleOutcome,
    ) -> StoreResult<UserBattleStats> {
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::Missing("User"));
        }

        let stats = tables.stats.entry(user_id).or_insert_with(|| UserBattleStats {
            user_id,
            ..Default::default()
        });

        let add = |total: i64, delta: i64| total.checked_add(delta).ok_or(StoreError::OutOfRange);
        let next = UserBattleStats {
            user_id,
            total_games: add(stats.total_games, 1)?,
            wins: add(stats.wins, i64::from(outcome.won))?,
            losses: add(stats.losses, i64::from(!outcome.won))?,
            total_questions: add(stats.total_questions, outcome.total_questions)?,
            correct_answers: add(stats.correct_answers, outcome.correct_answers)?,
            experience: add(stats.experience, outcome.experience)?,
        };
        *stats = next.clone();

        Ok(next)
    }

    async fn find_stats(&self, user_id: Uuid) -> StoreResult<Option<UserBattleStats>> {
        Ok(self.tables.lock().await.stats.get(&user_id).cloned())
    }
}

impl AchievementRepository for MemoryStore {
    async fn list_achievements(&self) -> StoreResult<Vec<Achievement>> {
        Ok(self.tables.lock().await.achievements.values().cloned().collect())
    }

    async fn find_achievement(&self, id: i32) -> StoreResult<Option<Achievement>> {
        Ok(self.tables.lock().await.achievements.get(&id).cloned())
    }

    async fn insert_achievement(&self, content: &AchievementContent) -> StoreResult<Achievement> {
        Ok(self.tables.lock().await.new_achievement(content))
    }

    async fn insert_achievements(
        &self,
        contents: &[AchievementContent],
    ) -> StoreResult<Vec<Achievement>> {
        let mut tables = self.tables.lock().await;

        Ok(contents.iter().map(|content| tables.new_achievement(content)).collect())
    }

    async fn update_achievement(
        &self,
        id: i32,
        changes: &AchievementChanges,
    ) -> StoreResult<Option<Achievement>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.achievements.get_mut(&id).map(|achievement| {
            if let Some(name) = &changes.name {
                achievement.name = name.clone();
            }
            if let Some(icon) = &changes.icon {
                achievement.icon = icon.clone();
            }
            if let Some(description) = &changes.description {
                achievement.description = description.clone();
            }
            if let Some(points) = changes.points {
                achievement.points = points;
            }
            achievement.updated_at = now;
            achievement.clone()
        }))
    }

    async fn delete_achievement(&self, id: i32) -> StoreResult<Option<Achievement>> {
        let mut tables = self.tables.lock().await;

        tables.earned.retain(|(_, achievement_id)| *achievement_id != id);

        Ok(tables.achievements.remove(&id))
    }

    async fn has_achievement(&self, user_id: Uuid, achievement_id: i32) -> StoreResult<bool> {
        Ok(self.tables.lock().await.earned.contains(&(user_id, achievement_id)))
    }

    async fn grant_achievement(
        &self,
        user_id: Uuid,
        achievement: &Achievement,
    ) -> StoreResult<Grant> {
        let mut guard = self.tables.lock().await;
        let now = guard.stamp();
        let tables = &mut *guard;

        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(Grant::MissingUser);
        };
        if !tables.achievements.contains_key(&achievement.id) {
            return Ok(Grant::MissingAchievement);
        }
        if tables.earned.contains(&(user_id, achievement.id)) {
            return Ok(Grant::AlreadyHeld);
        }

        let points = i64::from(achievement.points);
        let experience = user.experience.checked_add(points).ok_or(StoreError::OutOfRange)?;
        tables.earned.insert((user_id, achievement.id));
        user.level += level_delta(user.experience, points);
        user.experience = experience;
        user.updated_at = now;

        Ok(Grant::Granted(user.clone()))
    }
}

impl ProfessorRepository for MemoryStore {
    async fn list_professors(&self, locked: Option<bool>) -> StoreResult<Vec<ProfessorCard>> {
        let tables = self.tables.lock().await;

        Ok(tables
            .professors
            .values()
            .filter(|card| locked.is_none_or(|locked| card.locked == locked))
            .cloned()
            .collect())
    }

    async fn find_professor(&self, id: i32) -> StoreResult<Option<ProfessorCard>> {
        Ok(self.tables.lock().await.professors.get(&id).cloned())
    }

    async fn insert_professor(&self, content: &ProfessorContent) -> StoreResult<ProfessorCard> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        let card = ProfessorCard {
            id: tables.next_professor_id(),
            name: content.name.clone(),
            title: content.title.clone(),
            image_url: content.image_url.clone(),
            skills: Json(content.skills.clone()),
            locked: content.locked,
            created_at: now,
            updated_at: now,
        };
        tables.professors.insert(card.id, card.clone());

        Ok(card)
    }

    async fn update_professor(
        &self,
        id: i32,
        changes: &ProfessorChanges,
    ) -> StoreResult<Option<ProfessorCard>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.professors.get_mut(&id).map(|card| {
            if let Some(name) = &changes.name {
                card.name = name.clone();
            }
            if let Some(title) = &changes.title {
                card.title = title.clone();
            }
            if let Some(image_url) = &changes.image_url {
                card.image_url = image_url.clone();
            }
            if let Some(skills) = &changes.skills {
                card.skills = Json(skills.clone());
            }
            if let Some(locked) = changes.locked {
                card.locked = locked;
            }
            card.updated_at = now;
            card.clone()
        }))
    }

    async fn delete_professor(&self, id: i32) -> StoreResult<Option<ProfessorCard>> {
        Ok(self.tables.lock().await.professors.remove(&id))
    }
}

impl ModuleRepository for MemoryStore {
    async fn list_modules(&self, filter: &ModuleFilter) -> StoreResult<Vec<CustomModule>> {
        let tables = self.tables.lock().await;

        let mut modules: Vec<CustomModule> = tables
            .modules
            .values()
            .filter(|module| filter.role.is_none_or(|role| module.role == role))
            .filter(|module| filter.enabled.is_none_or(|enabled| module.enabled == enabled))
            .cloned()
            .collect();
        modules.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(modules)
    }

    async fn enabled_modules(&self, role: ModuleRole) -> StoreResult<Vec<CustomModule>> {
        let tables = self.tables.lock().await;

        let mut modules: Vec<CustomModule> = tables
            .modules
            .values()
            .filter(|module| module.role == role && module.enabled)
            .cloned()
            .collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(modules)
    }

    async fn find_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        Ok(self.tables.lock().await.modules.get(&id).cloned())
    }

    async fn insert_module(&self, content: &ModuleContent) -> StoreResult<CustomModule> {
        Ok(self.tables.lock().await.new_module(content))
    }

    async fn insert_modules(&self, contents: &[ModuleContent]) -> StoreResult<Vec<CustomModule>> {
        let mut tables = self.tables.lock().await;

        Ok(contents.iter().map(|content| tables.new_module(content)).collect())
    }

    async fn update_module(
        &self,
        id: Uuid,
        changes: &ModuleChanges,
    ) -> StoreResult<Option<CustomModule>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.modules.get_mut(&id).map(|module| {
            if let Some(name) = &changes.name {
                module.name = name.clone();
            }
            if let Some(icon) = &changes.icon {
                module.icon = icon.clone();
            }
            if let Some(role) = changes.role {
                module.role = role;
            }
            if let Some(game_mode) = changes.game_mode {
                module.game_mode = game_mode;
            }
            if let Some(access_method) = changes.access_method {
                module.access_method = access_method;
            }
            if let Some(enabled) = changes.enabled {
                module.enabled = enabled;
            }
            module.updated_at = now;
            module.clone()
        }))
    }

    async fn delete_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        Ok(self.tables.lock().await.modules.remove(&id))
    }

    async fn toggle_module(&self, id: Uuid) -> StoreResult<Option<CustomModule>> {
        let mut tables = self.tables.lock().await;
        let now = tables.stamp();

        Ok(tables.modules.get_mut(&id).map(|module| {
            module.enabled = !module.enabled;
            module.updated_at = now;
            module.clone()
        }))
    }
}

impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stamps_strictly_increase() {
        let mut tables = Tables::default();
        let first = tables.stamp();
        let second = tables.stamp();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let store = MemoryStore::new();
        let host = store.seed_user("host@example.com", Role::Teacher, 0).await;
        let battle = store
            .insert_battle(&NewBattle {
                code: "ABC123".into(),
                host_id: host.id,
                name: "Friday quiz".into(),
                max_players: 4,
                questions: vec![],
            })
            .await
            .unwrap();
        store.ensure_stats(host.id).await.unwrap();

        store.delete_user(host.id).await.unwrap();

        assert!(store.find_battle(battle.id).await.unwrap().is_none());
        assert!(store.find_stats(host.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_participant_frees_seat() {
        let store = MemoryStore::new();
        let host = store.seed_user("host@example.com", Role::Teacher, 0).await;
        let battle = store
            .insert_battle(&NewBattle {
                code: "SEAT01".into(),
                host_id: host.id,
                name: "Two seats".into(),
                max_players: 2,
                questions: vec![],
            })
            .await
            .unwrap();

        let leaving = store.seed_user("leaving@example.com", Role::Student, 0).await;
        let staying = store.seed_user("staying@example.com", Role::Student, 0).await;
        let late = store.seed_user("late@example.com", Role::Student, 0).await;
        store.join_battle(battle.id, leaving.id).await.unwrap();
        store.join_battle(battle.id, staying.id).await.unwrap();

        store.delete_user(leaving.id).await.unwrap();

        let battle = store.find_battle(battle.id).await.unwrap().unwrap();
        assert_eq!(battle.current_players, 1);
        assert_eq!(store.participants(battle.id).await.unwrap(), vec![staying.id]);
        assert!(matches!(
            store.join_battle(battle.id, late.id).await.unwrap(),
            JoinOutcome::Joined(_)
        ));
    }

    #[tokio::test]
    async fn test_experience_overflow_changes_nothing() {
        let store = MemoryStore::new();
        let user = store.seed_user("rich@example.com", Role::Student, 90).await;

        let error = store.add_experience(user.id, i64::MAX).await.unwrap_err();
        assert!(matches!(error, StoreError::OutOfRange));

        let user = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!((user.experience, user.level), (90, 1));
    }

    #[tokio::test]
    async fn test_stats_overflow_changes_nothing() {
        let store = MemoryStore::new();
        let user = store.seed_user("busy@example.com", Role::Student, 0).await;
        let outcome = BattleOutcome {
            won: true,
            total_questions: i64::MAX,
            correct_answers: 1,
            experience: 50,
        };

        store.record_result(user.id, &outcome).await.unwrap();
        let error = store.record_result(user.id, &outcome).await.unwrap_err();
        assert!(matches!(error, StoreError::OutOfRange));

        let stats = store.find_stats(user.id).await.unwrap().unwrap();
        assert_eq!((stats.total_games, stats.wins, stats.experience), (1, 1, 50));
    }

    #[tokio::test]
    async fn test_grant_of_deleted_achievement() {
        let store = MemoryStore::new();
        let user = store.seed_user("late@example.com", Role::Student, 0).await;
        let achievement = store
            .insert_achievement(&AchievementContent {
                name: "Gone".into(),
                icon: "x".into(),
                description: "Deleted before it was granted".into(),
                points: 10,
            })
            .await
            .unwrap();
        store.delete_achievement(achievement.id).await.unwrap();

        let grant = store.grant_achievement(user.id, &achievement).await.unwrap();

        assert!(matches!(grant, Grant::MissingAchievement));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().experience, 0);
    }

    #[tokio::test]
    async fn test_duplicate_code_conflicts() {
        let store = MemoryStore::new();
        let host = store.seed_user("host@example.com", Role::Teacher, 0).await;
        let new = NewBattle {
            code: "ZZZ999".into(),
            host_id: host.id,
            name: "One".into(),
            max_players: 2,
            questions: vec![],
        };

        store.insert_battle(&new).await.unwrap();
        let error = store.insert_battle(&new).await.unwrap_err();

        assert!(matches!(error, StoreError::Conflict(_)));
    }
}
