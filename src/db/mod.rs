mod schema;
mod models;

pub use schema::{now, Constraint, Database, Filter, Repo, StoreError, StoreResult};
pub use models::{
    Node, NodeLink, NodeLinks, ProcessStep, Project, ProjectStatus, Round, StepType, User, Weight,
};
