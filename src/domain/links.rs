use serde::Deserialize;

use super::DomainError;
use crate::db::{now, Constraint, Node, NodeLink, StoreError, Weight};
use crate::scope::{canonical_id, Scope};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkInput {
    pub to_node_id: Option<String>,
    pub weight: Option<f64>,
}

impl LinkInput {
    pub fn to(to_node_id: &str) -> Self {
        LinkInput { to_node_id: Some(to_node_id.to_string()), weight: None }
    }

    pub fn weighted(to_node_id: &str, weight: f64) -> Self {
        LinkInput { to_node_id: Some(to_node_id.to_string()), weight: Some(weight) }
    }
}

fn link_conflict(err: StoreError) -> DomainError {
    match err {
        StoreError::Unique(Constraint::LinkPair) => DomainError::DuplicateLink,
        StoreError::Check(Constraint::DistinctEndpoints) => DomainError::SelfLinkRejected,
        other => other.into(),
    }
}

/// Create the directed link `from -> to_node_id`. `from` must already have
/// been resolved through `scope`; the target is looked up through it.
pub fn create_link(scope: &Scope, from: &Node, input: LinkInput) -> Result<NodeLink, DomainError> {
    let to_raw = input
        .to_node_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DomainError::required("to_node_id"))?;

    let weight = match input.weight {
        None => Weight::default(),
        Some(w) => Weight::from_f64(w).ok_or_else(|| {
            DomainError::invalid("weight", "must be between 0.1 and 1.0 with one decimal place")
        })?,
    };

    if canonical_id(to_raw).as_deref() == Some(from.id.as_str()) {
        return Err(DomainError::SelfLinkRejected);
    }
    let to = scope.node(to_raw)?;
    if scope.repo().link_exists(&from.id, &to.id)? {
        return Err(DomainError::DuplicateLink);
    }

    let link = NodeLink {
        id: uuid::Uuid::new_v4().to_string(),
        from_node_id: from.id.clone(),
        to_node_id: to.id.clone(),
        from_node_title: from.title.clone(),
        to_node_title: to.title,
        weight,
        created_at: now(),
    };
    scope.repo().insert_link(&link).map_err(link_conflict)?;
    tracing::info!(link = %link.id, from = %link.from_node_id, to = %link.to_node_id, weight = link.weight.as_f64(), "link created");
    Ok(link)
}

/// Delete a link through one of its endpoints. A link that exists but does
/// not touch `node` is `LinkNotOwned`, the one case reported as forbidden.
pub fn delete_link(scope: &Scope, node: &Node, link_id: &str) -> Result<(), DomainError> {
    let id = canonical_id(link_id).ok_or(DomainError::LinkNotFound)?;
    let link = scope.repo().get_link(&id)?.ok_or(DomainError::LinkNotFound)?;
    if link.from_node_id != node.id && link.to_node_id != node.id {
        tracing::warn!(link = %link.id, node = %node.id, "link delete through a non-endpoint node");
        return Err(DomainError::LinkNotOwned);
    }
    scope.repo().delete_link(&link.id)?;
    tracing::info!(link = %link.id, via = %node.id, "link deleted");
    Ok(())
}
