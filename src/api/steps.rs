use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, MethodRouter},
};

use super::{ApiError, AppState};
use crate::auth::AuthUser;
use crate::db::ProcessStep;
use crate::scope::Scope;

// Read-only; steps are created through POST /rounds/{id}/steps
pub(super) fn routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![("/steps", get(list_steps)), ("/steps/{id}", get(get_step))]
}

// GET /steps
async fn list_steps(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ProcessStep>>, ApiError> {
    let steps = state.db.transaction(|repo| Scope::new(repo, &user.id).steps())?;
    Ok(Json(steps))
}

// GET /steps/{id}
async fn get_step(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProcessStep>, ApiError> {
    let step = state.db.transaction(|repo| Scope::new(repo, &user.id).step(&id))?;
    Ok(Json(step))
}
