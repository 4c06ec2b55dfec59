//! Domain operations: validation and derivation in front of every write.
//!
//! Each function here runs inside the caller's transaction and reads through
//! a [`Scope`](crate::scope::Scope), so a referenced entity that belongs to
//! someone else is indistinguishable from one that does not exist.

mod links;
mod nodes;
mod workflow;

pub use links::{create_link, delete_link, LinkInput};
pub use nodes::{create_node, delete_node, resolve_node_scope, update_node, NodeInput, ResolvedScope};
pub use workflow::{
    create_project, create_round, create_step, delete_project, delete_round, update_project,
    update_round, ProjectInput, RoundInput, StepInput,
};

use crate::db::{StepType, StoreError};

pub const TITLE_MAX_CHARS: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("round {0} already exists in this project; each round number can be used once")]
    DuplicateRound(u8),
    #[error("this round already has a '{0}' step; each step type can be used once per round")]
    DuplicateStep(StepType),
    #[error("a link from this node to the target already exists")]
    DuplicateLink,
    #[error("a node cannot link to itself")]
    SelfLinkRejected,
    #[error("inconsistent scope: {0}")]
    InconsistentScope(String),
    #[error("project not found")]
    ProjectNotFound,
    #[error("round not found")]
    RoundNotFound,
    #[error("step not found")]
    StepNotFound,
    #[error("node not found")]
    NodeNotFound,
    #[error("link not found")]
    LinkNotFound,
    #[error("link does not belong to this node")]
    LinkNotOwned,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DomainError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        DomainError::Invalid { field, message: message.into() }
    }

    pub fn required(field: &'static str) -> Self {
        Self::invalid(field, "this field is required")
    }
}

/// PUT requires the mandatory fields; optional ones it omits are kept.
/// PATCH touches only what was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Replace,
    Partial,
}

/// Trimmed, non-blank, at most [`TITLE_MAX_CHARS`] characters.
pub(crate) fn validate_title(field: &'static str, raw: Option<&str>) -> Result<String, DomainError> {
    let title = raw.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(DomainError::required(field));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(DomainError::invalid(
            field,
            format!("must be at most {} characters", TITLE_MAX_CHARS),
        ));
    }
    Ok(title.to_string())
}
