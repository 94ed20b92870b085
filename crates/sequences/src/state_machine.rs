//! Enrollment lifecycle and execution outcome transitions.
//!
//! Both functions here are pure: they decide the next state and the counter
//! deltas, and the engine applies the result to storage. All counter math
//! for a sequence lives in [`transition`].

use chrono::{DateTime, Utc};
use outreach_core::{OutreachError, OutreachResult};
use serde::{Deserialize, Serialize};

use crate::types::{
    EnrollmentStatus, Execution, ExecutionOutcome, ExecutionStatus, PauseReason, StatDelta,
};

/// Something that happens to an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EnrollmentEvent {
    /// Steps are exhausted.
    Finish,
    Pause { reason: PauseReason },
    Resume,
    /// A reply was recorded. `first` is true for the enrollment's first reply.
    Reply { first: bool, stop: bool },
    /// A meeting was booked. `first` is true for the enrollment's first booking.
    Meeting { first: bool, stop: bool },
}

/// Outcome of applying an [`EnrollmentEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub pause_reason: Option<PauseReason>,
    pub delta: StatDelta,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Counter deltas for a brand-new enrollment.
pub fn enrolled() -> StatDelta {
    StatDelta {
        enrolled: 1,
        active: 1,
        ..Default::default()
    }
}

fn stay(from: EnrollmentStatus, delta: StatDelta) -> Transition {
    Transition {
        from,
        to: from,
        pause_reason: None,
        delta,
    }
}

fn pause(reason: PauseReason, mut delta: StatDelta) -> Transition {
    delta.active -= 1;
    Transition {
        from: EnrollmentStatus::Active,
        to: EnrollmentStatus::Paused,
        pause_reason: Some(reason),
        delta,
    }
}

/// Decides the next status of an enrollment and the counter deltas to apply.
pub fn transition(from: EnrollmentStatus, event: EnrollmentEvent) -> OutreachResult<Transition> {
    use EnrollmentStatus::*;

    match (from, event) {
        (Active, EnrollmentEvent::Finish) => Ok(Transition {
            from,
            to: Completed,
            pause_reason: None,
            delta: StatDelta {
                active: -1,
                completed: 1,
                ..Default::default()
            },
        }),
        (Active, EnrollmentEvent::Pause { reason }) => Ok(pause(reason, StatDelta::default())),
        (Paused, EnrollmentEvent::Pause { .. }) => Ok(stay(from, StatDelta::default())),
        (Paused, EnrollmentEvent::Resume) => Ok(Transition {
            from,
            to: Active,
            pause_reason: None,
            delta: StatDelta {
                active: 1,
                ..Default::default()
            },
        }),
        (Active, EnrollmentEvent::Resume) => Ok(stay(from, StatDelta::default())),
        (status, EnrollmentEvent::Reply { first, stop }) => {
            let delta = StatDelta {
                replied: i64::from(first),
                ..Default::default()
            };
            if status == Active && stop {
                Ok(pause(PauseReason::ReplyReceived, delta))
            } else {
                Ok(stay(status, delta))
            }
        }
        (status, EnrollmentEvent::Meeting { first, stop }) => {
            let delta = StatDelta {
                meetings: i64::from(first),
                ..Default::default()
            };
            if status == Active && stop {
                Ok(pause(PauseReason::MeetingBooked, delta))
            } else {
                Ok(stay(status, delta))
            }
        }
        (from, event) => Err(OutreachError::InvalidState(format!(
            "enrollment in {:?} cannot handle {:?}",
            from, event
        ))),
    }
}

/// What recording an outcome means for the enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step was carried out; the enrollment may move on.
    Advance,
    /// Recorded, but the step had already been carried out.
    Recorded,
    /// Same outcome reported again; nothing changed.
    Duplicate,
}

/// Records `outcome` on an execution.
///
/// Advancing outcomes (`sent`, `bounced`, `failed`, `skipped`) close an open
/// execution. Engagement signals layer on a delivered execution and never
/// advance. A bounce reported after `sent` is recorded without advancing.
pub fn record_outcome(
    execution: &mut Execution,
    outcome: ExecutionOutcome,
    detail: Option<String>,
    now: DateTime<Utc>,
) -> OutreachResult<Progress> {
    let current = execution.status;

    if current == outcome.status() {
        return Ok(Progress::Duplicate);
    }

    let progress = match (current, outcome) {
        (ExecutionStatus::Scheduled, o) if o.advances_step() => {
            execution.status = o.status();
            execution.completed_at = Some(now);
            match o {
                ExecutionOutcome::Sent => execution.sent_at = Some(now),
                ExecutionOutcome::Bounced => execution.bounced_at = Some(now),
                _ => {}
            }
            Progress::Advance
        }
        (ExecutionStatus::Scheduled, o) => {
            return Err(OutreachError::InvalidState(format!(
                "cannot record {:?} on an execution that was never sent",
                o
            )));
        }
        (c, ExecutionOutcome::Bounced) if c.is_delivered() => {
            execution.status = ExecutionStatus::Bounced;
            execution.bounced_at = Some(now);
            Progress::Recorded
        }
        (c, ExecutionOutcome::Sent) if c.is_delivered() => return Ok(Progress::Duplicate),
        (c, o) if c.is_delivered() && !o.advances_step() => {
            let slot = match o {
                ExecutionOutcome::Opened => &mut execution.opened_at,
                ExecutionOutcome::Clicked => &mut execution.clicked_at,
                _ => &mut execution.replied_at,
            };
            if slot.is_some() {
                return Ok(Progress::Duplicate);
            }
            *slot = Some(now);
            execution.status = c.max_engagement(o.status());
            Progress::Recorded
        }
        (c, o) => {
            return Err(OutreachError::InvalidState(format!(
                "execution {} already completed as {:?}, cannot record {:?}",
                execution.id, c, o
            )));
        }
    };

    if detail.is_some() {
        execution.detail = detail;
    }
    Ok(progress)
}
