//! Idea cards and the resolution of their optional project/round/step scope.

use serde::Deserialize;

use super::{validate_title, DomainError, UpdateMode};
use crate::db::{now, Node, ProcessStep, Project, Round};
use crate::scope::{canonical_id, Scope};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInput {
    pub title: Option<String>,
    pub context: Option<String>,
    pub project_id: Option<String>,
    pub round_id: Option<String>,
    pub step_id: Option<String>,
}

impl NodeInput {
    pub fn titled(title: &str) -> Self {
        NodeInput { title: Some(title.to_string()), ..Default::default() }
    }
}

/// A fully derived scope chain. All three are `None` for a global node.
#[derive(Debug, Clone, Default)]
pub struct ResolvedScope {
    pub project: Option<Project>,
    pub round: Option<Round>,
    pub step: Option<ProcessStep>,
}

// Blank ids are treated as absent, the same as null.
fn supplied(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve step, then round, then project. Each supplied id must be visible
/// to the caller, and every supplied ancestor must match the one derived from
/// its descendant; omitted ancestors are filled in.
pub fn resolve_node_scope(
    scope: &Scope,
    project_id: Option<&str>,
    round_id: Option<&str>,
    step_id: Option<&str>,
) -> Result<ResolvedScope, DomainError> {
    let step = supplied(step_id).map(|id| scope.step(id)).transpose()?;
    let round = supplied(round_id).map(|id| scope.round(id)).transpose()?;
    let project = supplied(project_id).map(|id| scope.project(id)).transpose()?;

    let round = match (&step, round) {
        (Some(step), Some(round)) if round.id != step.round_id => {
            return Err(DomainError::InconsistentScope(
                "step does not belong to the given round".to_string(),
            ));
        }
        (Some(step), None) => Some(scope.round(&step.round_id)?),
        (_, round) => round,
    };

    let project = match (&round, project) {
        (Some(round), Some(project)) if project.id != round.project_id => {
            return Err(DomainError::InconsistentScope(
                "round does not belong to the given project".to_string(),
            ));
        }
        (Some(round), None) => Some(scope.project(&round.project_id)?),
        (_, project) => project,
    };

    Ok(ResolvedScope { project, round, step })
}

pub fn create_node(scope: &Scope, input: NodeInput) -> Result<Node, DomainError> {
    let title = validate_title("title", input.title.as_deref())?;
    let resolved = resolve_node_scope(
        scope,
        input.project_id.as_deref(),
        input.round_id.as_deref(),
        input.step_id.as_deref(),
    )?;

    let ts = now();
    let node = Node {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: resolved.project.as_ref().map(|p| p.id.clone()),
        round_id: resolved.round.as_ref().map(|r| r.id.clone()),
        step_id: resolved.step.as_ref().map(|s| s.id.clone()),
        title,
        context: input.context,
        is_global: resolved.project.is_none(),
        project_title: resolved.project.as_ref().map(|p| p.title.clone()),
        created_at: ts,
        updated_at: ts,
    };
    scope.repo().insert_node(&node)?;
    tracing::info!(
        node = %node.id,
        project = node.project_id.as_deref().unwrap_or("-"),
        global = node.is_global,
        "node created"
    );
    Ok(node)
}

// Scoping keys are fixed at creation. Sending the current value back is fine.
fn check_unchanged(field: &'static str, sent: Option<&str>, current: Option<&str>) -> Result<(), DomainError> {
    let Some(sent) = sent else { return Ok(()) };
    let sent = supplied(Some(sent)).and_then(canonical_id);
    if sent.as_deref() == current {
        Ok(())
    } else {
        Err(DomainError::invalid(field, "cannot be changed after the node is created"))
    }
}

pub fn update_node(scope: &Scope, id: &str, input: NodeInput, mode: UpdateMode) -> Result<Node, DomainError> {
    let mut node = scope.node(id)?;
    check_unchanged("project_id", input.project_id.as_deref(), node.project_id.as_deref())?;
    check_unchanged("round_id", input.round_id.as_deref(), node.round_id.as_deref())?;
    check_unchanged("step_id", input.step_id.as_deref(), node.step_id.as_deref())?;

    if mode == UpdateMode::Replace || input.title.is_some() {
        node.title = validate_title("title", input.title.as_deref())?;
    }
    // Optional fields left out of a PUT keep their value.
    if input.context.is_some() {
        node.context = input.context;
    }
    node.updated_at = now();
    scope.repo().update_node(&node)?;
    tracing::info!(node = %node.id, "node updated");
    Ok(node)
}

/// Links touching the node go with it.
pub fn delete_node(scope: &Scope, id: &str) -> Result<(), DomainError> {
    let node = scope.node(id)?;
    scope.repo().delete_node(&node.id)?;
    tracing::info!(node = %node.id, "node deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::domain::{create_project, create_round, create_step, ProjectInput, RoundInput, StepInput};
    use crate::testing::seed_user;

    struct Tree {
        project: Project,
        round: Round,
        step: ProcessStep,
    }

    fn tree(db: &Database, user: &str, title: &str) -> Tree {
        db.transaction(|repo| {
            let scope = Scope::new(repo, user);
            let project = create_project(&scope, ProjectInput::titled(title))?;
            let round = create_round(&scope, &project, RoundInput::numbered(1))?;
            let step = create_step(&scope, &round, StepInput::new("overview", "what is it"))?;
            Ok::<_, DomainError>(Tree { project, round, step })
        })
        .unwrap()
    }

    fn create(db: &Database, user: &str, input: NodeInput) -> Result<Node, DomainError> {
        db.transaction(|repo| create_node(&Scope::new(repo, user), input))
    }

    #[test]
    fn test_node_without_scope_is_global() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let node = create(&db, &alice, NodeInput::titled("Global1")).unwrap();
        assert!(node.is_global);
        assert!(node.project_id.is_none() && node.round_id.is_none() && node.step_id.is_none());
        assert!(node.project_title.is_none());
    }

    #[test]
    fn test_step_alone_fills_round_and_project() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let t = tree(&db, &alice, "Idea A");

        let node = create(&db, &alice, NodeInput {
            step_id: Some(t.step.id.clone()),
            ..NodeInput::titled("Card1")
        }).unwrap();
        assert_eq!(node.step_id.as_deref(), Some(t.step.id.as_str()));
        assert_eq!(node.round_id.as_deref(), Some(t.round.id.as_str()));
        assert_eq!(node.project_id.as_deref(), Some(t.project.id.as_str()));
        assert_eq!(node.project_title.as_deref(), Some("Idea A"));
        assert!(!node.is_global);
    }

    #[test]
    fn test_round_alone_fills_project() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let t = tree(&db, &alice, "Idea A");

        let node = create(&db, &alice, NodeInput {
            round_id: Some(t.round.id.clone()),
            ..NodeInput::titled("Card")
        }).unwrap();
        assert_eq!(node.project_id.as_deref(), Some(t.project.id.as_str()));
        assert!(node.step_id.is_none());
    }

    #[test]
    fn test_missing_references_report_the_first_unresolved() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let missing = uuid::Uuid::new_v4().to_string();

        let err = create(&db, &alice, NodeInput { step_id: Some(missing.clone()), ..NodeInput::titled("x") });
        assert!(matches!(err, Err(DomainError::StepNotFound)));
        let err = create(&db, &alice, NodeInput { round_id: Some(missing.clone()), ..NodeInput::titled("x") });
        assert!(matches!(err, Err(DomainError::RoundNotFound)));
        let err = create(&db, &alice, NodeInput { project_id: Some("not-a-uuid".into()), ..NodeInput::titled("x") });
        assert!(matches!(err, Err(DomainError::ProjectNotFound)));
    }

    #[test]
    fn test_other_users_scope_is_not_found() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let t = tree(&db, &alice, "Idea A");

        let err = create(&db, &bob, NodeInput { step_id: Some(t.step.id.clone()), ..NodeInput::titled("x") });
        assert!(matches!(err, Err(DomainError::StepNotFound)));
        let err = create(&db, &bob, NodeInput { project_id: Some(t.project.id.clone()), ..NodeInput::titled("x") });
        assert!(matches!(err, Err(DomainError::ProjectNotFound)));
    }

    #[test]
    fn test_mismatched_ancestors_are_inconsistent() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let a = tree(&db, &alice, "Idea A");
        let b = tree(&db, &alice, "Idea B");

        let err = create(&db, &alice, NodeInput {
            step_id: Some(a.step.id.clone()),
            round_id: Some(b.round.id.clone()),
            ..NodeInput::titled("x")
        });
        assert!(matches!(err, Err(DomainError::InconsistentScope(_))));

        let err = create(&db, &alice, NodeInput {
            round_id: Some(a.round.id.clone()),
            project_id: Some(b.project.id.clone()),
            ..NodeInput::titled("x")
        });
        assert!(matches!(err, Err(DomainError::InconsistentScope(_))));

        // Matching ancestors are accepted as-is
        let node = create(&db, &alice, NodeInput {
            step_id: Some(a.step.id.clone()),
            round_id: Some(a.round.id.clone()),
            project_id: Some(a.project.id.to_uppercase()),
            ..NodeInput::titled("x")
        }).unwrap();
        assert_eq!(node.project_id.as_deref(), Some(a.project.id.as_str()));
    }

    #[test]
    fn test_blank_ids_mean_global() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let node = create(&db, &alice, NodeInput {
            project_id: Some(" ".into()),
            ..NodeInput::titled("Loose")
        }).unwrap();
        assert!(node.is_global);
    }

    #[test]
    fn test_update_node_keeps_scope_fixed() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let a = tree(&db, &alice, "Idea A");
        let b = tree(&db, &alice, "Idea B");
        let node = create(&db, &alice, NodeInput {
            project_id: Some(a.project.id.clone()),
            ..NodeInput::titled("Card")
        }).unwrap();

        let err = db.transaction(|repo| {
            update_node(&Scope::new(repo, &alice), &node.id, NodeInput {
                project_id: Some(b.project.id.clone()),
                ..Default::default()
            }, UpdateMode::Partial)
        });
        assert!(matches!(err, Err(DomainError::Invalid { field: "project_id", .. })));

        let updated = db.transaction(|repo| {
            update_node(&Scope::new(repo, &alice), &node.id, NodeInput {
                context: Some("more detail".into()),
                project_id: Some(a.project.id.clone()),
                ..Default::default()
            }, UpdateMode::Partial)
        }).unwrap();
        assert_eq!(updated.title, "Card");
        assert_eq!(updated.context.as_deref(), Some("more detail"));
        assert_eq!(updated.project_title.as_deref(), Some("Idea A"));
        assert!(updated.updated_at >= node.updated_at);
    }

    #[test]
    fn test_put_node_with_title_only_keeps_context() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let node = create(&db, &alice, NodeInput {
            context: Some("keep me".into()),
            ..NodeInput::titled("C")
        }).unwrap();

        let updated = db.transaction(|repo| {
            update_node(&Scope::new(repo, &alice), &node.id, NodeInput::titled("C2"), UpdateMode::Replace)
        }).unwrap();
        assert_eq!(updated.title, "C2");
        assert_eq!(updated.context.as_deref(), Some("keep me"));

        let err = db.transaction(|repo| {
            update_node(&Scope::new(repo, &alice), &node.id, NodeInput::default(), UpdateMode::Replace)
        });
        assert!(matches!(err, Err(DomainError::Invalid { field: "title", .. })));
    }

    #[test]
    fn test_delete_node_scoped() {
        let db = Database::in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let a = tree(&db, &alice, "Idea A");
        let card = create(&db, &alice, NodeInput {
            project_id: Some(a.project.id.clone()),
            ..NodeInput::titled("Card")
        }).unwrap();

        let err = db.transaction(|repo| delete_node(&Scope::new(repo, &bob), &card.id));
        assert!(matches!(err, Err(DomainError::NodeNotFound)));
        db.transaction(|repo| delete_node(&Scope::new(repo, &alice), &card.id)).unwrap();
        let nodes = db.transaction(|repo| Scope::new(repo, &alice).nodes()).unwrap();
        assert!(nodes.is_empty());
    }
}
