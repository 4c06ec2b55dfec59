use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, MethodRouter},
};

use super::{ApiError, ApiJson, AppState};
use crate::auth::AuthUser;
use crate::db::{Node, Project, Round};
use crate::domain::{self, ProjectInput, RoundInput, UpdateMode};
use crate::scope::Scope;

pub(super) fn routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![
        ("/projects", get(list_projects).post(create_project)),
        (
            "/projects/{id}",
            get(get_project).put(put_project).patch(patch_project).delete(delete_project),
        ),
        ("/projects/{id}/rounds", get(list_project_rounds).post(create_project_round)),
        ("/projects/{id}/nodes", get(list_project_nodes)),
    ]
}

// GET /projects
async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Project>>, ApiError> {
    let projects = state.db.transaction(|repo| Scope::new(repo, &user.id).projects())?;
    Ok(Json(projects))
}

// POST /projects
async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(input): ApiJson<ProjectInput>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state
        .db
        .transaction(|repo| domain::create_project(&Scope::new(repo, &user.id), input))?;
    Ok((StatusCode::CREATED, Json(project)))
}

// GET /projects/{id}
async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project = state.db.transaction(|repo| Scope::new(repo, &user.id).project(&id))?;
    Ok(Json(project))
}

async fn update_project(
    state: AppState,
    user: AuthUser,
    id: String,
    input: ProjectInput,
    mode: UpdateMode,
) -> Result<Json<Project>, ApiError> {
    let project = state
        .db
        .transaction(|repo| domain::update_project(&Scope::new(repo, &user.id), &id, input, mode))?;
    Ok(Json(project))
}

// PUT /projects/{id}
async fn put_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<ProjectInput>,
) -> Result<Json<Project>, ApiError> {
    update_project(state, user, id, input, UpdateMode::Replace).await
}

// PATCH /projects/{id}
async fn patch_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<ProjectInput>,
) -> Result<Json<Project>, ApiError> {
    update_project(state, user, id, input, UpdateMode::Partial).await
}

// DELETE /projects/{id}
async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.db.transaction(|repo| domain::delete_project(&Scope::new(repo, &user.id), &id))?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /projects/{id}/rounds
async fn list_project_rounds(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Round>>, ApiError> {
    let rounds = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        scope.rounds_of(&scope.project(&id)?)
    })?;
    Ok(Json(rounds))
}

// POST /projects/{id}/rounds
async fn create_project_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<RoundInput>,
) -> Result<(StatusCode, Json<Round>), ApiError> {
    let round = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        let project = scope.project(&id)?;
        domain::create_round(&scope, &project, input)
    })?;
    Ok((StatusCode::CREATED, Json(round)))
}

// GET /projects/{id}/nodes
async fn list_project_nodes(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Node>>, ApiError> {
    let nodes = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        scope.nodes_of(&scope.project(&id)?)
    })?;
    Ok(Json(nodes))
}
