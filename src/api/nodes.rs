use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, MethodRouter},
};
use serde_json::Value;

use super::{ApiError, ApiJson, AppState};
use crate::auth::AuthUser;
use crate::db::{Node, NodeLink, NodeLinks};
use crate::domain::{self, LinkInput, NodeInput, UpdateMode};
use crate::scope::Scope;

pub(super) fn routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![
        ("/nodes", get(list_nodes).post(create_node)),
        ("/nodes/global_nodes", get(list_global_nodes)),
        (
            "/nodes/{id}",
            get(get_node).put(put_node).patch(patch_node).delete(delete_node),
        ),
        ("/nodes/{id}/links", get(list_links).post(create_link).delete(delete_link)),
    ]
}

// GET /nodes
async fn list_nodes(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Node>>, ApiError> {
    let nodes = state.db.transaction(|repo| Scope::new(repo, &user.id).nodes())?;
    Ok(Json(nodes))
}

// GET /nodes/global_nodes
async fn list_global_nodes(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Node>>, ApiError> {
    let nodes = state.db.transaction(|repo| Scope::new(repo, &user.id).global_nodes())?;
    Ok(Json(nodes))
}

// POST /nodes
async fn create_node(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(input): ApiJson<NodeInput>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    let node = state
        .db
        .transaction(|repo| domain::create_node(&Scope::new(repo, &user.id), input))?;
    Ok((StatusCode::CREATED, Json(node)))
}

// GET /nodes/{id}
async fn get_node(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    let node = state.db.transaction(|repo| Scope::new(repo, &user.id).node(&id))?;
    Ok(Json(node))
}

// PUT /nodes/{id}
async fn put_node(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NodeInput>,
) -> Result<Json<Node>, ApiError> {
    let node = state.db.transaction(|repo| {
        domain::update_node(&Scope::new(repo, &user.id), &id, input, UpdateMode::Replace)
    })?;
    Ok(Json(node))
}

// PATCH /nodes/{id}
async fn patch_node(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NodeInput>,
) -> Result<Json<Node>, ApiError> {
    let node = state.db.transaction(|repo| {
        domain::update_node(&Scope::new(repo, &user.id), &id, input, UpdateMode::Partial)
    })?;
    Ok(Json(node))
}

// DELETE /nodes/{id}
async fn delete_node(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.db.transaction(|repo| domain::delete_node(&Scope::new(repo, &user.id), &id))?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /nodes/{id}/links
async fn list_links(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<NodeLinks>, ApiError> {
    let links = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        scope.links_of(&scope.node(&id)?)
    })?;
    Ok(Json(links))
}

// POST /nodes/{id}/links
async fn create_link(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<LinkInput>,
) -> Result<(StatusCode, Json<NodeLink>), ApiError> {
    let link = state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        let from = scope.node(&id)?;
        domain::create_link(&scope, &from, input)
    })?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// `{"link_id": "<uuid>"}`. Checked before any lookup so a bad body never
/// turns into a not-found.
fn parse_link_id(body: &[u8]) -> Result<String, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::validation("link_id: this field is required"));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::validation(format!("malformed JSON body: {}", e)))?;
    let Value::Object(fields) = value else {
        return Err(ApiError::validation("request body must be a JSON object"));
    };
    match fields.get("link_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ApiError::validation("link_id: this field is required"))
        }
        Some(_) => Err(ApiError::validation("link_id: must be a string")),
    }
}

// DELETE /nodes/{id}/links
async fn delete_link(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let link_id = parse_link_id(&body)?;
    state.db.transaction(|repo| {
        let scope = Scope::new(repo, &user.id);
        let node = scope.node(&id)?;
        domain::delete_link(&scope, &node, &link_id)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
