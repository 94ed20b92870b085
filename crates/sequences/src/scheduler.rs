//! Step execution scheduler — materializes the execution for an enrollment's
//! current step and advances the enrollment when a step is carried out.
//!
//! Every method here expects the caller to hold the enrollment's lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use outreach_core::event_bus::EventPublisher;
use outreach_core::types::EventType;
use outreach_core::{OutreachError, OutreachResult};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock;
use crate::renderer;
use crate::repository::SequenceRepository;
use crate::state_machine::{self, EnrollmentEvent, Transition};
use crate::types::{Enrollment, EnrollmentStatus, Execution, ExecutionStatus, StatDelta};

#[derive(Clone)]
pub struct StepScheduler {
    repo: Arc<dyn SequenceRepository>,
    events: EventPublisher,
}

impl StepScheduler {
    pub fn new(repo: Arc<dyn SequenceRepository>, events: EventPublisher) -> Self {
        Self { repo, events }
    }

    /// Creates the execution for the enrollment's current step.
    ///
    /// Returns `None` when the enrollment is not active, already has an open
    /// execution, or has run out of steps (in which case it is completed).
    pub fn schedule_next_step(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> OutreachResult<Option<Execution>> {
        let enrollment = self
            .repo
            .get_enrollment(enrollment_id)
            .ok_or_else(|| OutreachError::not_found("Enrollment", enrollment_id))?;

        if enrollment.status != EnrollmentStatus::Active {
            debug!(enrollment_id = %enrollment_id, status = ?enrollment.status, "Enrollment not active, nothing scheduled");
            return Ok(None);
        }

        if let Some(open) = self
            .repo
            .executions_for_enrollment(enrollment_id)
            .into_iter()
            .find(|e| e.status.is_open())
        {
            debug!(enrollment_id = %enrollment_id, execution_id = %open.id, "Execution already open");
            return Ok(None);
        }

        let Some(step) = enrollment.steps.get(enrollment.current_step).cloned() else {
            self.finish(&enrollment, now)?;
            return Ok(None);
        };

        let sequence = self
            .repo
            .get_sequence(enrollment.sequence_id)
            .ok_or_else(|| OutreachError::not_found("Sequence", enrollment.sequence_id))?;

        let scheduled_at = clock::next_run_time(
            now,
            step.delay_days,
            step.delay_hours,
            sequence.settings.send_window(),
            sequence.settings.skip_weekends,
        )
        .map_err(|e| {
            error!(enrollment_id = %enrollment_id, step_index = enrollment.current_step, error = %e, "Cannot schedule step");
            e
        })?;
        let content = renderer::render_step(&step, &enrollment.variables);

        let execution = Execution {
            id: Uuid::new_v4(),
            enrollment_id,
            sequence_id: enrollment.sequence_id,
            step_id: step.id,
            step_index: enrollment.current_step,
            channel: step.channel,
            template_id: step.template_id.clone(),
            scheduled_at,
            status: ExecutionStatus::Scheduled,
            content,
            dispatched_at: None,
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            replied_at: None,
            bounced_at: None,
            completed_at: None,
            detail: None,
            created_at: now,
        };

        info!(
            enrollment_id = %enrollment_id,
            execution_id = %execution.id,
            step_index = execution.step_index,
            channel = ?execution.channel,
            scheduled_at = %scheduled_at,
            "Scheduled step execution"
        );

        self.repo.insert_execution(execution.clone());
        metrics::counter!("sequences.executions.scheduled").increment(1);
        self.events.publish(self.events.event(
            now,
            EventType::ExecutionScheduled,
            Some(execution.sequence_id),
            Some(enrollment_id),
            Some(execution.id),
        ));

        Ok(Some(execution))
    }

    /// Moves the enrollment past `step_index` and schedules what follows.
    ///
    /// A no-op when the enrollment is no longer active or has already moved
    /// past `step_index` (stale or out-of-order callback).
    pub fn advance(
        &self,
        enrollment_id: Uuid,
        step_index: usize,
        now: DateTime<Utc>,
    ) -> OutreachResult<Option<Execution>> {
        let mut advanced = false;
        self.repo.update_enrollment(enrollment_id, &mut |enrollment| {
            advanced = false;
            if enrollment.status != EnrollmentStatus::Active {
                return Ok(());
            }
            if enrollment.current_step != step_index {
                warn!(
                    enrollment_id = %enrollment_id,
                    current_step = enrollment.current_step,
                    step_index,
                    "Ignoring advance for a step that is not current"
                );
                return Ok(());
            }
            set_current_step(enrollment, step_index + 1)?;
            enrollment.updated_at = now;
            advanced = true;
            Ok(())
        })?;

        if !advanced {
            return Ok(None);
        }
        self.schedule_next_step(enrollment_id, now)
    }

    /// Applies an enrollment transition's counter deltas. A missing sequence
    /// (deleted while the enrollment was in flight) is logged, not fatal.
    pub fn apply_delta(&self, sequence_id: Uuid, delta: StatDelta) {
        if let Err(e) = self.repo.apply_stat_delta(sequence_id, delta) {
            warn!(sequence_id = %sequence_id, error = %e, ?delta, "Could not apply sequence stat delta");
        }
    }

    fn finish(&self, enrollment: &Enrollment, now: DateTime<Utc>) -> OutreachResult<()> {
        let transition: Transition =
            state_machine::transition(enrollment.status, EnrollmentEvent::Finish)?;
        self.repo.update_enrollment(enrollment.id, &mut |e| {
            e.status = transition.to;
            e.completed_at = Some(now);
            e.updated_at = now;
            Ok(())
        })?;
        self.apply_delta(enrollment.sequence_id, transition.delta);

        info!(
            enrollment_id = %enrollment.id,
            sequence_id = %enrollment.sequence_id,
            steps = enrollment.steps.len(),
            "Enrollment completed"
        );
        metrics::counter!("sequences.enrollments.completed").increment(1);
        let mut event = self.events.event(
            now,
            EventType::EnrollmentCompleted,
            Some(enrollment.sequence_id),
            Some(enrollment.id),
            None,
        );
        event.lead_id = Some(enrollment.lead.id.clone());
        self.events.publish(event);
        Ok(())
    }
}

/// Moves `current_step` forward. A decrease is a programming error: it trips
/// in debug builds and is rejected for this enrollment only in release.
fn set_current_step(enrollment: &mut Enrollment, next: usize) -> OutreachResult<()> {
    debug_assert!(next >= enrollment.current_step, "current_step must not decrease");
    if next < enrollment.current_step || next > enrollment.steps.len() {
        error!(
            enrollment_id = %enrollment.id,
            current_step = enrollment.current_step,
            next,
            "Rejected current_step change"
        );
        return Err(OutreachError::InvalidState(format!(
            "enrollment {} cannot move from step {} to {}",
            enrollment.id, enrollment.current_step, next
        )));
    }
    enrollment.current_step = next;
    Ok(())
}
