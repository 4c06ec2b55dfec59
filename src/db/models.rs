use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Pending,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Pending => "pending",
            ProjectStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProjectStatus::Active),
            "pending" => Some(ProjectStatus::Pending),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

/// The five fixed stages of a round, declared in display order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Overview,
    Extract,
    Flow,
    Mvp,
    Expand,
}

impl StepType {
    pub const ALL: [StepType; 5] = [
        StepType::Overview,
        StepType::Extract,
        StepType::Flow,
        StepType::Mvp,
        StepType::Expand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Overview => "overview",
            StepType::Extract => "extract",
            StepType::Flow => "flow",
            StepType::Mvp => "mvp",
            StepType::Expand => "expand",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "overview" => Some(StepType::Overview),
            "extract" => Some(StepType::Extract),
            "flow" => Some(StepType::Flow),
            "mvp" => Some(StepType::Mvp),
            "expand" => Some(StepType::Expand),
            _ => None,
        }
    }

    /// Display position, 1 (overview) through 5 (expand).
    pub fn number(&self) -> u8 {
        match self {
            StepType::Overview => 1,
            StepType::Extract => 2,
            StepType::Flow => 3,
            StepType::Mvp => 4,
            StepType::Expand => 5,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link strength in tenths, 1..=10 (0.1 to 1.0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Weight(u8);

impl Weight {
    pub const MIN_TENTHS: u8 = 1;
    pub const MAX_TENTHS: u8 = 10;

    pub fn from_tenths(tenths: u8) -> Option<Self> {
        (Self::MIN_TENTHS..=Self::MAX_TENTHS)
            .contains(&tenths)
            .then_some(Weight(tenths))
    }

    /// Accepts values in [0.1, 1.0] carrying at most one decimal place.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * 10.0;
        let tenths = scaled.round();
        if (scaled - tenths).abs() > 1e-6 || !(0.0..=255.0).contains(&tenths) {
            return None;
        }
        Self::from_tenths(tenths as u8)
    }

    pub fn tenths(&self) -> u8 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl Default for Weight {
    fn default() -> Self {
        Weight(5)
    }
}

impl Serialize for Weight {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    #[serde(skip)]
    pub owner_id: String,
    pub title: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Round {
    pub id: String,
    pub project_id: String,
    pub round_number: u8,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStep {
    pub id: String,
    pub project_id: String,
    pub round_id: String,
    pub step_type: StepType,
    pub step_type_number: u8,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// is_global is derived from project_id at read time and never stored
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub project_id: Option<String>,
    pub round_id: Option<String>,
    pub step_id: Option<String>,
    pub title: String,
    pub context: Option<String>,
    pub is_global: bool,
    pub project_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeLink {
    pub id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub from_node_title: String,
    pub to_node_title: String,
    pub weight: Weight,
    pub created_at: DateTime<Utc>,
}

/// Outgoing and incoming links of one node.
#[derive(Debug, Clone, Serialize, Default)]
pub struct NodeLinks {
    pub outgoing: Vec<NodeLink>,
    pub incoming: Vec<NodeLink>,
}
