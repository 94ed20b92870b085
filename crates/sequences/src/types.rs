use std::collections::HashMap;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use outreach_core::types::Lead;
use outreach_core::{OutreachError, OutreachResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An outreach sequence: ordered steps plus timing and stop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: SequenceStatus,
    pub settings: SequenceSettings,
    pub steps: Vec<Step>,
    /// Snapshot of the running counters taken when the sequence was read.
    pub stats: SequenceStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a sequence definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Archived,
}

impl SequenceStatus {
    /// Returns `true` if a sequence may move from `self` to `to`.
    /// Setting the current status again is always allowed.
    pub fn can_transition(self, to: SequenceStatus) -> bool {
        use SequenceStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Archived)
                | (Paused, Active)
                | (Paused, Completed)
                | (Paused, Archived)
                | (Completed, Archived)
        )
    }
}

/// Timing and stop-condition settings of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSettings {
    /// First hour (0-23) at which executions may be scheduled.
    pub start_hour: u32,
    /// Hour (exclusive) at which the send window closes.
    pub end_hour: u32,
    pub timezone: String,
    pub skip_weekends: bool,
    pub stop_on_reply: bool,
    pub stop_on_meeting: bool,
    pub daily_limit: u32,
}

impl SequenceSettings {
    pub fn validate(&self) -> OutreachResult<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(OutreachError::Validation(format!(
                "send window hours must be within 0-23 (got {}-{})",
                self.start_hour, self.end_hour
            )));
        }
        if self.start_hour >= self.end_hour {
            return Err(OutreachError::Validation(format!(
                "send window start hour {} must be before end hour {}",
                self.start_hour, self.end_hour
            )));
        }
        if self.daily_limit == 0 {
            return Err(OutreachError::Validation(
                "daily_limit must be a positive integer".to_string(),
            ));
        }
        if self.timezone.trim().is_empty() {
            return Err(OutreachError::Validation(
                "timezone must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn send_window(&self) -> SendWindow {
        SendWindow {
            start_hour: self.start_hour,
            end_hour: self.end_hour,
        }
    }
}

/// Hour range `[start_hour, end_hour)` during which executions may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

/// Running counters of a sequence, adjusted on every enrollment transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStats {
    pub enrolled: u64,
    pub active: u64,
    pub completed: u64,
    pub replied: u64,
    pub meetings: u64,
}

/// Signed adjustment to apply to [`SequenceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDelta {
    pub enrolled: i64,
    pub active: i64,
    pub completed: i64,
    pub replied: i64,
    pub meetings: i64,
}

impl StatDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for StatDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.enrolled += rhs.enrolled;
        self.active += rhs.active;
        self.completed += rhs.completed;
        self.replied += rhs.replied;
        self.meetings += rhs.meetings;
    }
}

/// Channel a step is carried out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Linkedin,
    Sms,
    Call,
    Task,
}

/// A single step of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    /// 0-based position, dense and unique within the sequence.
    pub order: u32,
    pub channel: Channel,
    /// Delay from the previous step's completion (or enrollment for step 0).
    pub delay_days: u32,
    pub delay_hours: u32,
    pub subject: Option<String>,
    pub body: String,
    pub template_id: Option<String>,
}

/// Caller-supplied definition of a step; `id` and `order` are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub channel: Channel,
    #[serde(default)]
    pub delay_days: u32,
    #[serde(default)]
    pub delay_hours: u32,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// Longest delay a step may wait, in days.
pub const MAX_DELAY_DAYS: u32 = 3650;

impl StepDefinition {
    pub fn validate(&self) -> OutreachResult<()> {
        if self.delay_days > MAX_DELAY_DAYS {
            return Err(OutreachError::Validation(format!(
                "delay_days must be at most {} (got {})",
                MAX_DELAY_DAYS, self.delay_days
            )));
        }
        if self.delay_hours > 23 {
            return Err(OutreachError::Validation(format!(
                "delay_hours must be within 0-23 (got {})",
                self.delay_hours
            )));
        }
        if self.subject.is_some() && self.channel != Channel::Email {
            return Err(OutreachError::Validation(format!(
                "subject is only supported on email steps (got {:?})",
                self.channel
            )));
        }
        Ok(())
    }

    pub(crate) fn into_step(self, order: u32) -> Step {
        Step {
            id: Uuid::new_v4(),
            order,
            channel: self.channel,
            delay_days: self.delay_days,
            delay_hours: self.delay_hours,
            subject: self.subject,
            body: self.body,
            template_id: self.template_id,
        }
    }
}

/// Caller-supplied definition used to create a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Falls back to the configured defaults when omitted.
    #[serde(default)]
    pub settings: Option<SequenceSettings>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// The live progress of one lead through one sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub lead: Lead,
    pub status: EnrollmentStatus,
    pub current_step: usize,
    /// Step list copied from the sequence at enroll time.
    pub steps: Vec<Step>,
    pub variables: HashMap<String, String>,
    pub step_results: Vec<StepResult>,
    pub pause_reason: Option<PauseReason>,
    pub replied_at: Option<DateTime<Utc>>,
    pub meeting_booked_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    /// Appends to the step history.
    pub fn record(
        &mut self,
        step_index: usize,
        result: StepResultKind,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.step_results.push(StepResult {
            step_index,
            result,
            timestamp: now,
            detail,
        });
        self.updated_at = now;
    }
}

/// Runtime status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
}

/// Why an enrollment was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    ReplyReceived,
    MeetingBooked,
    Manual,
    SequenceDeleted,
}

/// Append-only record of something that happened at a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub result: StepResultKind,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultKind {
    Sent,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Failed,
    Skipped,
    MeetingBooked,
}

/// Rendered subject and body of an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
}

/// One concrete, time-stamped instance of a step for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub sequence_id: Uuid,
    pub step_id: Uuid,
    pub step_index: usize,
    pub channel: Channel,
    pub template_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub content: RenderedContent,
    /// Set when the runner claims the execution for dispatch.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Scheduled,
    Sent,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    /// Only a scheduled execution is open; every other status is terminal.
    pub fn is_open(self) -> bool {
        self == ExecutionStatus::Scheduled
    }

    /// Delivered and possibly engaged with.
    pub fn is_delivered(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Sent
                | ExecutionStatus::Opened
                | ExecutionStatus::Clicked
                | ExecutionStatus::Replied
        )
    }

    fn engagement_rank(self) -> u8 {
        match self {
            ExecutionStatus::Sent => 1,
            ExecutionStatus::Opened => 2,
            ExecutionStatus::Clicked => 3,
            ExecutionStatus::Replied => 4,
            _ => 0,
        }
    }

    /// The more engaged of two delivered statuses.
    pub fn max_engagement(self, other: ExecutionStatus) -> ExecutionStatus {
        if other.engagement_rank() > self.engagement_rank() {
            other
        } else {
            self
        }
    }
}

/// Outcome reported by the dispatcher for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Sent,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Failed,
    Skipped,
}

impl ExecutionOutcome {
    /// Whether the outcome means the channel action was carried out
    /// (successfully or not) and the sequence may move on.
    pub fn advances_step(self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Sent
                | ExecutionOutcome::Bounced
                | ExecutionOutcome::Failed
                | ExecutionOutcome::Skipped
        )
    }

    pub fn status(self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Sent => ExecutionStatus::Sent,
            ExecutionOutcome::Opened => ExecutionStatus::Opened,
            ExecutionOutcome::Clicked => ExecutionStatus::Clicked,
            ExecutionOutcome::Replied => ExecutionStatus::Replied,
            ExecutionOutcome::Bounced => ExecutionStatus::Bounced,
            ExecutionOutcome::Failed => ExecutionStatus::Failed,
            ExecutionOutcome::Skipped => ExecutionStatus::Skipped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionOutcome::Sent => "sent",
            ExecutionOutcome::Opened => "opened",
            ExecutionOutcome::Clicked => "clicked",
            ExecutionOutcome::Replied => "replied",
            ExecutionOutcome::Bounced => "bounced",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Skipped => "skipped",
        }
    }

    pub fn result_kind(self) -> StepResultKind {
        match self {
            ExecutionOutcome::Sent => StepResultKind::Sent,
            ExecutionOutcome::Opened => StepResultKind::Opened,
            ExecutionOutcome::Clicked => StepResultKind::Clicked,
            ExecutionOutcome::Replied => StepResultKind::Replied,
            ExecutionOutcome::Bounced => StepResultKind::Bounced,
            ExecutionOutcome::Failed => StepResultKind::Failed,
            ExecutionOutcome::Skipped => StepResultKind::Skipped,
        }
    }
}

/// Notification from a channel provider about an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub enrollment_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: InboundEventType,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEventType {
    Reply,
    Meeting,
    Open,
    Click,
    Bounce,
}
