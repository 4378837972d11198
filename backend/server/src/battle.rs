//! # Battles
//!
//! Lifecycle of a multiplayer quiz session.
//!
//! ## States
//!
//! - `waiting`: open for joins, may start, end or be cancelled
//! - `active`: may only end
//! - `finished`: absorbing, may only be cancelled (deleted)
//!
//! ## Notes
//!
//! - The host is implicit and never counted in `current_players`
//! - Capacity is enforced by the store inside the join itself, the pre-checks here
//!   only pick the error message
//! - Every transition is a compare-and-set on the status it was validated against
//! - Ending records each result on its own detached task, one failure does not undo the rest
use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::spawn;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    database::{
        BattleFilter, BattleOutcome, BattleRepository, BattleRole, JoinOutcome, NewBattle, Store,
    },
    error::AppError,
    models::{BattleSession, BattleStatus, User, UserBattleStats, UserSummary},
    policy::{Capability, require},
};

pub const CODE_LENGTH: usize = 6;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_ATTEMPTS: usize = 10;
pub const MIN_PLAYERS: i32 = 2;
pub const MAX_PLAYERS: i32 = 8;
pub const WINNER_XP: i64 = 50;
pub const PARTICIPANT_XP: i64 = 25;
pub const LIST_LIMIT: i64 = 20;

pub fn random_code() -> String {
    let mut rng = rand::thread_rng();

    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draws codes from `generate` until one is unused, giving up after [`CODE_ATTEMPTS`].
pub async fn unique_code<R, F>(repo: &R, mut generate: F) -> Result<String, AppError>
where
    R: BattleRepository,
    F: FnMut() -> String,
{
    for attempt in 1..=CODE_ATTEMPTS {
        let code = generate();

        if !repo.code_exists(&code).await? {
            return Ok(code);
        }

        warn!("Battle code {code} already taken (attempt {attempt})");
    }

    Err(AppError::ExhaustedRetries(CODE_ATTEMPTS))
}

pub struct CreateBattle {
    pub name: String,
    pub max_players: i32,
    pub questions: Vec<Uuid>,
}

pub async fn create<S: Store>(
    store: &S,
    host: &User,
    input: CreateBattle,
) -> Result<BattleSession, AppError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::invalid("Battle name is required"));
    }
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&input.max_players) {
        return Err(AppError::invalid(format!(
            "Max players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
        )));
    }

    let distinct: BTreeSet<Uuid> = input.questions.iter().copied().collect();
    let distinct: Vec<Uuid> = distinct.into_iter().collect();
    if store.count_existing_questions(&distinct).await? != distinct.len() as i64 {
        return Err(AppError::invalid(
            "One or more provided question IDs are invalid",
        ));
    }

    let code = unique_code(store, random_code).await?;

    let battle = store
        .insert_battle(&NewBattle {
            code,
            host_id: host.id,
            name: name.to_string(),
            max_players: input.max_players,
            questions: input.questions,
        })
        .await?;

    store.ensure_stats(host.id).await?;

    info!("User {} created battle {} ({})", host.id, battle.id, battle.code);

    Ok(battle)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleView {
    #[serde(flatten)]
    pub battle: BattleSession,
    pub host: Option<UserSummary>,
    pub participants: Vec<Uuid>,
}

async fn view<S: Store>(store: &S, battle: BattleSession) -> Result<BattleView, AppError> {
    let host = store.find_user(battle.host_id).await?;
    let participants = store.participants(battle.id).await?;

    Ok(BattleView {
        host: host.as_ref().map(UserSummary::from),
        participants,
        battle,
    })
}

pub async fn get<S: Store>(store: &S, id: Uuid) -> Result<BattleView, AppError> {
    let battle = store
        .find_battle(id)
        .await?
        .ok_or(AppError::NotFound("Battle"))?;

    view(store, battle).await
}

pub async fn join<S: Store>(store: &S, user: &User, code: &str) -> Result<BattleSession, AppError> {
    let code = code.trim().to_uppercase();

    let battle = store
        .find_battle_by_code(&code)
        .await?
        .ok_or(AppError::NotFound("Battle"))?;

    if battle.status != BattleStatus::Waiting {
        return Err(AppError::InvalidState(
            "Battle is not accepting new players".into(),
        ));
    }
    if battle.is_full() {
        return Err(AppError::Full);
    }
    if battle.host_id == user.id {
        return Err(AppError::AlreadyHost);
    }

    let battle = match store.join_battle(battle.id, user.id).await? {
        JoinOutcome::Joined(battle) => battle,
        JoinOutcome::Missing => return Err(AppError::NotFound("Battle")),
        JoinOutcome::NotWaiting => {
            return Err(AppError::InvalidState(
                "Battle is not accepting new players".into(),
            ));
        }
        JoinOutcome::Full => return Err(AppError::Full),
        JoinOutcome::AlreadyJoined => return Err(AppError::AlreadyJoined),
    };

    store.ensure_stats(user.id).await?;

    info!(
        "User {} joined battle {} ({}/{})",
        user.id, battle.id, battle.current_players, battle.max_players
    );

    Ok(battle)
}

async fn hosted<S: Store>(store: &S, caller: &User, id: Uuid) -> Result<BattleSession, AppError> {
    store
        .find_battle(id)
        .await?
        .ok_or(AppError::NotFound("Battle"))
        .and_then(|battle| {
            require(caller, Capability::HostOf(&battle))?;
            Ok(battle)
        })
}

pub async fn start<S: Store>(store: &S, caller: &User, id: Uuid) -> Result<BattleSession, AppError> {
    let battle = hosted(store, caller, id).await?;

    if battle.status != BattleStatus::Waiting {
        return Err(AppError::InvalidState("Battle has already started".into()));
    }
    if battle.current_players < MIN_PLAYERS {
        return Err(AppError::InsufficientPlayers {
            required: MIN_PLAYERS,
        });
    }

    let battle = store
        .transition_battle(id, &[BattleStatus::Waiting], BattleStatus::Active, Utc::now())
        .await?
        .ok_or_else(|| AppError::InvalidState("Battle has already started".into()))?;

    info!("Battle {} started with {} players", battle.id, battle.current_players);

    Ok(battle)
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerResult {
    pub user_id: Uuid,
    pub total_questions: i64,
    pub correct_answers: i64,
}

#[derive(Debug, Default)]
pub struct EndBattle {
    pub winner_id: Option<Uuid>,
    pub results: Vec<PlayerResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ended {
    pub battle: BattleSession,
    pub recorded: Vec<UserBattleStats>,
    /// Users whose stats could not be updated.
    pub failed: Vec<Uuid>,
}

pub fn outcome_for(result: &PlayerResult, winner_id: Option<Uuid>) -> BattleOutcome {
    let won = winner_id == Some(result.user_id);

    BattleOutcome {
        won,
        total_questions: result.total_questions,
        correct_answers: result.correct_answers,
        experience: if won { WINNER_XP } else { PARTICIPANT_XP },
    }
}

pub async fn end<S: Store>(
    store: &S,
    caller: &User,
    id: Uuid,
    input: EndBattle,
) -> Result<Ended, AppError> {
    let battle = store
        .find_battle(id)
        .await?
        .ok_or(AppError::NotFound("Battle"))?;

    if battle.status == BattleStatus::Finished {
        return Err(AppError::InvalidState("Battle is already finished".into()));
    }
    require(caller, Capability::HostOf(&battle))?;

    let mut seen = HashSet::new();
    if let Some(duplicate) = input.results.iter().find(|r| !seen.insert(r.user_id)) {
        return Err(AppError::invalid(format!(
            "Duplicate result for user {}",
            duplicate.user_id
        )));
    }

    let battle = store
        .transition_battle(
            id,
            &[BattleStatus::Waiting, BattleStatus::Active],
            BattleStatus::Finished,
            Utc::now(),
        )
        .await?
        .ok_or_else(|| AppError::InvalidState("Battle is already finished".into()))?;

    // Detached: a dropped request must still record every result.
    let handles: Vec<_> = input
        .results
        .iter()
        .map(|result| {
            let store = store.clone();
            let user_id = result.user_id;
            let outcome = outcome_for(result, input.winner_id);

            (user_id, spawn(async move { store.record_result(user_id, &outcome).await }))
        })
        .collect();

    let mut recorded = Vec::with_capacity(handles.len());
    let mut failed = Vec::new();

    for (user_id, handle) in handles {
        match handle.await {
            Ok(Ok(stats)) => recorded.push(stats),
            Ok(Err(e)) => {
                error!("Failed to record battle result for {user_id}: {e}");
                failed.push(user_id);
            }
            Err(e) => {
                error!("Battle result task for {user_id} failed: {e}");
                failed.push(user_id);
            }
        }
    }

    failed.sort();
    recorded.sort_by_key(|stats| stats.user_id);

    info!(
        "Battle {} finished, {} results recorded, {} failed",
        battle.id,
        recorded.len(),
        failed.len()
    );

    Ok(Ended {
        battle,
        recorded,
        failed,
    })
}

pub async fn cancel<S: Store>(store: &S, caller: &User, id: Uuid) -> Result<BattleSession, AppError> {
    let battle = hosted(store, caller, id).await?;

    if battle.status == BattleStatus::Active {
        return Err(AppError::InvalidState("Cannot cancel an active battle".into()));
    }

    let battle = store
        .delete_battle(id)
        .await?
        .ok_or_else(|| AppError::InvalidState("Cannot cancel an active battle".into()))?;

    info!("Battle {} cancelled by {}", battle.id, caller.id);

    Ok(battle)
}

pub async fn list<S: Store>(
    store: &S,
    caller: &User,
    status: Option<BattleStatus>,
    role: Option<BattleRole>,
) -> Result<Vec<BattleView>, AppError> {
    let battles = store
        .list_battles(&BattleFilter {
            user_id: caller.id,
            status,
            role,
            limit: LIST_LIMIT,
        })
        .await?;

    let mut views = Vec::with_capacity(battles.len());
    for battle in battles {
        views.push(view(store, battle).await?);
    }

    Ok(views)
}
