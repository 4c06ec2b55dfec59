//! Caller-scoped reads.
//!
//! Every lookup a request makes goes through a [`Scope`], which pins the
//! caller's user id into the row filter: projects, rounds and steps are
//! visible only to the project owner, nodes to the owner of their project or
//! to everyone when they have no project. Anything outside that set is
//! reported as not found.

use crate::db::{
    Filter, Node, NodeLinks, ProcessStep, Project, Repo, Round,
};
use crate::domain::DomainError;

/// Parse a client-supplied id into the stored (lowercase, hyphenated) form.
pub fn canonical_id(raw: &str) -> Option<String> {
    uuid::Uuid::parse_str(raw.trim()).ok().map(|id| id.to_string())
}

pub struct Scope<'r, 'c> {
    repo: &'r Repo<'c>,
    user_id: &'r str,
}

impl<'r, 'c> Scope<'r, 'c> {
    pub fn new(repo: &'r Repo<'c>, user_id: &'r str) -> Self {
        Scope { repo, user_id }
    }

    pub fn user_id(&self) -> &str {
        self.user_id
    }

    pub fn repo(&self) -> &Repo<'c> {
        self.repo
    }

    /// Filter for owner-only entities (projects, rounds, steps).
    pub fn owned(&self) -> Filter<'r> {
        Filter::OwnedBy(self.user_id)
    }

    /// Filter for nodes: owned through their project, or global.
    pub fn owned_or_global(&self) -> Filter<'r> {
        Filter::OwnedByOrGlobal(self.user_id)
    }

    pub fn project(&self, id: &str) -> Result<Project, DomainError> {
        let id = canonical_id(id).ok_or(DomainError::ProjectNotFound)?;
        self.repo.get_project(&id, self.owned())?.ok_or(DomainError::ProjectNotFound)
    }

    pub fn projects(&self) -> Result<Vec<Project>, DomainError> {
        Ok(self.repo.list_projects(self.owned())?)
    }

    pub fn round(&self, id: &str) -> Result<Round, DomainError> {
        let id = canonical_id(id).ok_or(DomainError::RoundNotFound)?;
        self.repo.get_round(&id, self.owned())?.ok_or(DomainError::RoundNotFound)
    }

    pub fn rounds(&self) -> Result<Vec<Round>, DomainError> {
        Ok(self.repo.list_rounds(self.owned())?)
    }

    /// `project` must already have been resolved through this scope.
    pub fn rounds_of(&self, project: &Project) -> Result<Vec<Round>, DomainError> {
        Ok(self.repo.list_rounds_in_project(&project.id)?)
    }

    pub fn step(&self, id: &str) -> Result<ProcessStep, DomainError> {
        let id = canonical_id(id).ok_or(DomainError::StepNotFound)?;
        self.repo.get_step(&id, self.owned())?.ok_or(DomainError::StepNotFound)
    }

    pub fn steps(&self) -> Result<Vec<ProcessStep>, DomainError> {
        Ok(self.repo.list_steps(self.owned())?)
    }

    pub fn steps_of(&self, round: &Round) -> Result<Vec<ProcessStep>, DomainError> {
        Ok(self.repo.list_steps_in_round(&round.id)?)
    }

    pub fn node(&self, id: &str) -> Result<Node, DomainError> {
        let id = canonical_id(id).ok_or(DomainError::NodeNotFound)?;
        self.repo.get_node(&id, self.owned_or_global())?.ok_or(DomainError::NodeNotFound)
    }

    pub fn nodes(&self) -> Result<Vec<Node>, DomainError> {
        Ok(self.repo.list_nodes(self.owned_or_global())?)
    }

    pub fn nodes_of(&self, project: &Project) -> Result<Vec<Node>, DomainError> {
        Ok(self.repo.list_nodes_in_project(&project.id)?)
    }

    pub fn global_nodes(&self) -> Result<Vec<Node>, DomainError> {
        Ok(self.repo.list_global_nodes()?)
    }

    /// Links touching `node`, hiding any whose far endpoint the caller cannot see.
    pub fn links_of(&self, node: &Node) -> Result<NodeLinks, DomainError> {
        Ok(NodeLinks {
            outgoing: self.repo.list_outgoing_links(&node.id, self.owned_or_global())?,
            incoming: self.repo.list_incoming_links(&node.id, self.owned_or_global())?,
        })
    }
}
