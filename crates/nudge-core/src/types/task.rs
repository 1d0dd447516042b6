//! Task items read from per-user task files.
//!
//! Tasks feed the weighted reminder draw only; Nudge never writes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NudgeError;

/// Task priority, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::None
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            "none" | "" => Ok(TaskPriority::None),
            other => Err(NudgeError::schedule(format!(
                "Unknown task priority: '{other}'"
            ))),
        }
    }
}

/// One task in a user's task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
}

impl TaskItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority,
            due_date: None,
            completed: false,
        }
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }
}
