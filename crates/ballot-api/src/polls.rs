use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use rand::{Rng, distr::Alphanumeric};
use tracing::{debug, info};
use uuid::Uuid;

use ballot_db::VoteOutcome;
use ballot_types::api::{CastVoteRequest, Claims, CreatePollRequest, CreatePollResponse};
use ballot_types::events::GatewayEvent;
use ballot_types::models::{ANONYMOUS_CREATOR, NewPoll, Poll};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::MaybeClaims;

const OPTION_ID_LEN: usize = 7;

/// Short lowercase alphanumeric ids, unique within one poll only.
fn option_ids(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let mut seen = HashSet::with_capacity(count);
    let mut ids = Vec::with_capacity(count);

    while ids.len() < count {
        let id: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(OPTION_ID_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    ids
}

/// Anonymous callers are allowed; their polls are owned by the sentinel creator.
pub async fn create_poll(
    State(state): State<AppState>,
    MaybeClaims(claims): MaybeClaims,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = NewPoll::validate(&req.question, &req.options)?;

    let poll_id = Uuid::new_v4();
    let created_by = claims
        .map(|c| c.sub.to_string())
        .unwrap_or_else(|| ANONYMOUS_CREATOR.to_string());

    let options: Vec<(String, String)> = option_ids(draft.options.len())
        .into_iter()
        .zip(draft.options)
        .collect();

    let question = draft.question;
    let creator = created_by.clone();
    let poll = state
        .with_db(move |db| db.insert_poll(&poll_id.to_string(), &question, &creator, &options))
        .await?;

    info!(
        "Poll {} created by {} with {} options",
        poll.id,
        created_by,
        poll.options.len()
    );

    let share_url = format!("{}/poll/{}", state.public_url.trim_end_matches('/'), poll.id);

    Ok((
        StatusCode::CREATED,
        Json(CreatePollResponse {
            id: poll.id,
            share_url,
            poll,
        }),
    ))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<Json<Poll>> {
    state
        .with_db(move |db| db.get_poll(&poll_id.to_string()))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("poll"))
}

/// One vote per signed-in user. The stored voter set is the authority;
/// the counter bump and the voter insert commit together.
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CastVoteRequest>,
) -> ApiResult<Json<Poll>> {
    let option_id = req.option_id.clone();
    let user_id = claims.sub;

    let outcome = state
        .with_db(move |db| {
            db.record_vote(&poll_id.to_string(), &option_id, &user_id.to_string())
        })
        .await?;

    let poll = match outcome {
        VoteOutcome::Recorded(poll) => poll,
        VoteOutcome::PollNotFound => return Err(ApiError::NotFound("poll")),
        VoteOutcome::UnknownOption => return Err(ApiError::InvalidOption(req.option_id)),
        VoteOutcome::AlreadyVoted => return Err(ApiError::AlreadyVoted),
    };

    debug!("{} ({}) voted {} on poll {}", claims.username, user_id, req.option_id, poll_id);

    state.dispatcher.broadcast(GatewayEvent::PollUpdate { poll: poll.clone() });

    Ok(Json(poll))
}

/// Polls authored by the caller, newest first.
pub async fn my_polls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Poll>>> {
    let creator = claims.sub.to_string();
    let polls = state
        .with_db(move |db| db.list_polls_by_creator(&creator))
        .await?;
    Ok(Json(polls))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_ids_unique_and_shaped() {
        let ids = option_ids(50);
        assert_eq!(ids.len(), 50);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 50);
        for id in &ids {
            assert_eq!(id.len(), OPTION_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
