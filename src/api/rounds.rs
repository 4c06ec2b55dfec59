use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, MethodRouter},
};

use super::{ApiError, ApiJson, AppState};
use crate::auth::AuthUser;
use crate::db::{ProcessStep, Round};
use crate::domain::{self, RoundInput, StepInput, UpdateMode};
use crate::scope::Scope;

// Rounds are created under a project only: POST /projects/{id}/rounds
pub(super) fn routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![
        ("/rounds", get(list_rounds)),
        (
            "/rounds/{id}",
            get(get_round).put(put_round).patch(patch_round).delete(delete_round),
        ),
        ("/rounds/{id}/steps", get(list_round_steps).post(create_round_step)),
    ]
}

// GET /rounds
async fn list_rounds(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Round>>, ApiError> {
    let rounds = state.db.transaction(|repo| Scope::new(repo, &user.id).rounds())?;
    Ok(Json(rounds))
}

// GET /rounds/{id}
async fn get_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Round>, ApiError> {
    let round = state.db.transaction(|repo| Scope::new(repo, &user.id).round(&id))?;
    Ok(Json(round))
}

// PUT /rounds/{id}
async fn put_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<RoundInput>,
) -> Result<Json<Round>, ApiError> {
    let round = state.db.transaction(|repo| {
        domain::update_round(&Scope::new(repo, &user.id), &id, input, UpdateMode::Replace)
    })?;
    Ok(Json(round))
}

// PATCH /rounds/{id}
async fn patch_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<RoundInput>,
) -> Result<Json<Round>, ApiError> {
    let round = state.db.transaction(|repo| {
        domain::update_round(&Scope::new(repo, &user.id), &id, input, UpdateMode::Partial)
    })?;
    Ok(Json(round))
}

// DELETE /rounds/{id}
async fn delete_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.db.transaction(|repo| domain::delete_round(&Scope::new(repo, &user.id), &id))?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /rounds/{id}/steps
async fn list_round_steps(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<ProcessStep>>, ApiError> {
    let steps = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        scope.steps_of(&scope.round(&id)?)
    })?;
    Ok(Json(steps))
}

// POST /rounds/{id}/steps
async fn create_round_step(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<StepInput>,
) -> Result<(StatusCode, Json<ProcessStep>), ApiError> {
    let step = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        let round = scope.round(&id)?;
        domain::create_step(&scope, &round, input)
    })?;
    Ok((StatusCode::CREATED, Json(step)))
}
