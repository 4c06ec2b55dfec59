//! Projects and the rounds and process steps beneath them.

use serde::Deserialize;

use super::{validate_title, DomainError, UpdateMode};
use crate::db::{now, Constraint, ProcessStep, Project, ProjectStatus, Round, StepType, StoreError};
use crate::scope::Scope;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInput {
    pub title: Option<String>,
    pub status: Option<String>,
}

impl ProjectInput {
    pub fn titled(title: &str) -> Self {
        ProjectInput { title: Some(title.to_string()), status: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoundInput {
    pub round_number: Option<i64>,
    pub note: Option<String>,
}

impl RoundInput {
    pub fn numbered(round_number: i64) -> Self {
        RoundInput { round_number: Some(round_number), note: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepInput {
    pub step_type: Option<String>,
    pub content: Option<String>,
}

impl StepInput {
    pub fn new(step_type: &str, content: &str) -> Self {
        StepInput { step_type: Some(step_type.to_string()), content: Some(content.to_string()) }
    }
}

fn parse_status(raw: &str) -> Result<ProjectStatus, DomainError> {
    ProjectStatus::from_str(raw).ok_or_else(|| {
        DomainError::invalid("status", format!("'{}' is not one of active, pending, completed", raw))
    })
}

fn validate_round_number(raw: Option<i64>) -> Result<u8, DomainError> {
    let n = raw.ok_or_else(|| DomainError::required("round_number"))?;
    match u8::try_from(n) {
        Ok(n @ 1..=5) => Ok(n),
        _ => Err(DomainError::invalid("round_number", format!("must be between 1 and 5, got {}", n))),
    }
}

fn parse_step_type(raw: Option<&str>) -> Result<StepType, DomainError> {
    let raw = raw.ok_or_else(|| DomainError::required("step_type"))?;
    StepType::from_str(raw).ok_or_else(|| {
        let allowed: Vec<&str> = StepType::ALL.iter().map(StepType::as_str).collect();
        DomainError::invalid("step_type", format!("'{}' is not one of {}", raw, allowed.join(", ")))
    })
}

pub fn create_project(scope: &Scope, input: ProjectInput) -> Result<Project, DomainError> {
    let title = validate_title("title", input.title.as_deref())?;
    let status = input.status.as_deref().map(parse_status).transpose()?.unwrap_or_default();
    let ts = now();
    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: scope.user_id().to_string(),
        title,
        status,
        created_at: ts,
        updated_at: ts,
    };
    scope.repo().insert_project(&project)?;
    tracing::info!(project = %project.id, owner = %project.owner_id, "project created");
    Ok(project)
}

pub fn update_project(
    scope: &Scope,
    id: &str,
    input: ProjectInput,
    mode: UpdateMode,
) -> Result<Project, DomainError> {
    let mut project = scope.project(id)?;
    if mode == UpdateMode::Replace || input.title.is_some() {
        project.title = validate_title("title", input.title.as_deref())?;
    }
    if let Some(status) = input.status.as_deref() {
        project.status = parse_status(status)?;
    }
    project.updated_at = now();
    scope.repo().update_project(&project)?;
    tracing::info!(project = %project.id, "project updated");
    Ok(project)
}

/// Removes the project with its rounds, steps, scoped nodes and their links.
pub fn delete_project(scope: &Scope, id: &str) -> Result<(), DomainError> {
    let project = scope.project(id)?;
    scope.repo().delete_project(&project.id)?;
    tracing::info!(project = %project.id, "project deleted");
    Ok(())
}

fn round_conflict(err: StoreError, round_number: u8) -> DomainError {
    match err {
        StoreError::Unique(Constraint::RoundNumber) => DomainError::DuplicateRound(round_number),
        other => other.into(),
    }
}

/// The project comes from the request path, never from the body.
pub fn create_round(scope: &Scope, project: &Project, input: RoundInput) -> Result<Round, DomainError> {
    let round_number = validate_round_number(input.round_number)?;
    if scope.repo().round_number_taken(&project.id, round_number)? {
        return Err(DomainError::DuplicateRound(round_number));
    }
    let round = Round {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        round_number,
        note: input.note,
        created_at: now(),
    };
    scope.repo().insert_round(&round).map_err(|e| round_conflict(e, round_number))?;
    tracing::info!(project = %project.id, round = %round.id, round_number, "round created");
    Ok(round)
}

pub fn update_round(
    scope: &Scope,
    id: &str,
    input: RoundInput,
    mode: UpdateMode,
) -> Result<Round, DomainError> {
    let mut round = scope.round(id)?;
    if mode == UpdateMode::Replace || input.round_number.is_some() {
        let round_number = validate_round_number(input.round_number)?;
        if round_number != round.round_number
            && scope.repo().round_number_taken(&round.project_id, round_number)?
        {
            return Err(DomainError::DuplicateRound(round_number));
        }
        round.round_number = round_number;
    }
    if input.note.is_some() {
        round.note = input.note;
    }
    scope.repo().update_round(&round).map_err(|e| round_conflict(e, round.round_number))?;
    tracing::info!(round = %round.id, round_number = round.round_number, "round updated");
    Ok(round)
}

pub fn delete_round(scope: &Scope, id: &str) -> Result<(), DomainError> {
    let round = scope.round(id)?;
    scope.repo().delete_round(&round.id)?;
    tracing::info!(round = %round.id, "round deleted");
    Ok(())
}

fn step_conflict(err: StoreError, step_type: StepType) -> DomainError {
    match err {
        StoreError::Unique(Constraint::StepType) => DomainError::DuplicateStep(step_type),
        other => other.into(),
    }
}

/// The step's project is copied from its round.
pub fn create_step(scope: &Scope, round: &Round, input: StepInput) -> Result<ProcessStep, DomainError> {
    let step_type = parse_step_type(input.step_type.as_deref())?;
    let content = match input.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => return Err(DomainError::required("content")),
    };
    if scope.repo().step_type_taken(&round.id, step_type)? {
        return Err(DomainError::DuplicateStep(step_type));
    }
    let step = ProcessStep {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: round.project_id.clone(),
        round_id: round.id.clone(),
        step_type,
        step_type_number: step_type.number(),
        content,
        created_at: now(),
    };
    scope.repo().insert_step(&step).map_err(|e| step_conflict(e, step_type))?;
    tracing::info!(round = %round.id, step = %step.id, step_type = %step_type, "step created");
    Ok(step)
}
