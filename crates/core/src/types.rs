use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lead record supplied by the caller at enroll time. The engine keeps a
/// copy; later edits to the source record do not reach running enrollments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    /// Free-form fields from the lead source, exposed as template variables.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Lead {
    /// First whitespace-separated token of `name`.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    /// Everything after the first name, trimmed.
    pub fn last_name(&self) -> &str {
        let trimmed = self.name.trim();
        match trimmed.find(char::is_whitespace) {
            Some(idx) => trimmed[idx..].trim(),
            None => "",
        }
    }
}

/// Engine lifecycle event, routed to analytics pipelines and webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub sequence_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub lead_id: Option<String>,
    pub detail: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SequenceCreated,
    SequenceStatusChanged,
    SequenceDeleted,
    EnrollmentCreated,
    EnrollmentPaused,
    EnrollmentResumed,
    EnrollmentCompleted,
    ExecutionScheduled,
    ExecutionDeferred,
    ExecutionCompleted,
    ReplyReceived,
    MeetingBooked,
}
