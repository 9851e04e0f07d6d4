use serde::{Deserialize, Serialize};

use crate::domain::TaskId;

/// Key carrying the task id in a start request.
pub const EXTRA_ID: &str = "Id";

// Start request: `{"Id": "<task id>"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StartRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    /// Task id carried by the request, if present and non-empty.
    pub fn task_id(&self) -> Option<TaskId> {
        self.id.as_deref().and_then(|s| TaskId::parse(s).ok())
    }
}

/// Events a host reports to whoever drives the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    Started { task_id: TaskId },
    Rejected { task_id: TaskId, reason: String },
    Completed { task_id: TaskId },
}
