//! Sequence engine — the entry point collaborators call.
//!
//! Ties the store, the enrollment state machine and the step scheduler
//! together. Every read-then-write of an enrollment runs under that
//! enrollment's lock from [`EnrollmentLocks`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use outreach_core::config::SequenceDefaults;
use outreach_core::event_bus::{noop_sink, EventPublisher, EventSink};
use outreach_core::types::{EventType, Lead};
use outreach_core::{OutreachError, OutreachResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{self, SequenceAnalytics};
use crate::clock::{SystemTime, TimeSource};
use crate::locks::EnrollmentLocks;
use crate::renderer;
use crate::repository::{InMemoryRepository, SequenceRepository};
use crate::scheduler::StepScheduler;
use crate::state_machine::{self, EnrollmentEvent, Progress, Transition};
use crate::store::SequenceStore;
use crate::types::{
    Enrollment, EnrollmentStatus, Execution, ExecutionOutcome, ExecutionStatus, InboundEvent,
    InboundEventType, PauseReason, Sequence, SequenceDefinition, SequenceSettings,
    SequenceStatus, Step, StepDefinition, StepResultKind,
};

const DEFAULT_NODE_ID: &str = "local";

/// Result of trying to claim a due execution for dispatch.
#[derive(Debug, Clone)]
pub enum Claim {
    /// Claimed. The caller dispatches it and reports the outcome.
    Ready(DispatchJob),
    /// The sequence is paused; the execution stays scheduled.
    Held,
    /// The enrollment (or its sequence) no longer runs. The execution is
    /// still open and should be closed as skipped.
    Inactive(Execution),
    /// Already claimed, completed or unknown.
    Gone,
}

/// Everything the dispatcher needs to carry out one execution.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub execution: Execution,
    pub lead: Lead,
    pub settings: SequenceSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    Reply,
    Meeting,
}

/// Sequence automation engine: sequence definitions, enrollments and the
/// executions that carry them forward.
#[derive(Clone)]
pub struct SequenceEngine {
    repo: Arc<dyn SequenceRepository>,
    store: SequenceStore,
    scheduler: StepScheduler,
    locks: Arc<EnrollmentLocks>,
    events: EventPublisher,
    time: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for SequenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceEngine")
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl SequenceEngine {
    pub fn new(repo: Arc<dyn SequenceRepository>, defaults: SequenceDefaults) -> Self {
        let events = EventPublisher::new(noop_sink(), DEFAULT_NODE_ID);
        Self {
            store: SequenceStore::new(repo.clone(), defaults),
            scheduler: StepScheduler::new(repo.clone(), events.clone()),
            locks: Arc::new(EnrollmentLocks::new()),
            repo,
            events,
            time: Arc::new(SystemTime),
        }
    }

    /// Engine backed by the in-memory repository.
    pub fn in_memory(defaults: SequenceDefaults) -> Self {
        Self::new(Arc::new(InMemoryRepository::new()), defaults)
    }

    /// Attach an event sink for emitting lifecycle events.
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        let events = EventPublisher::new(sink, self.events.node_id());
        self.with_events(events)
    }

    /// Node id stamped on every emitted event.
    pub fn with_node_id(self, node_id: &str) -> Self {
        let events = EventPublisher::new(self.events.sink(), node_id);
        self.with_events(events)
    }

    fn with_events(mut self, events: EventPublisher) -> Self {
        self.scheduler = StepScheduler::new(self.repo.clone(), events.clone());
        self.events = events;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    // ─── Sequences ─────────────────────────────────────────────────────────

    pub fn create_sequence(&self, definition: SequenceDefinition) -> OutreachResult<Sequence> {
        let sequence = self.store.create(definition, self.now())?;
        metrics::counter!("sequences.created").increment(1);
        self.events.publish(self.events.event(
            sequence.created_at,
            EventType::SequenceCreated,
            Some(sequence.id),
            None,
            None,
        ));
        Ok(sequence)
    }

    pub fn get_sequence(&self, sequence_id: Uuid) -> OutreachResult<Sequence> {
        self.store.get(sequence_id)
    }

    pub fn list_sequences(&self) -> Vec<Sequence> {
        self.store.list()
    }

    pub fn add_step(&self, sequence_id: Uuid, definition: StepDefinition) -> OutreachResult<Step> {
        self.store.add_step(sequence_id, definition, self.now())
    }

    pub fn update_step(
        &self,
        sequence_id: Uuid,
        step_id: Uuid,
        definition: StepDefinition,
    ) -> OutreachResult<Sequence> {
        self.store
            .update_step(sequence_id, step_id, definition, self.now())
    }

    pub fn remove_step(&self, sequence_id: Uuid, step_id: Uuid) -> OutreachResult<Sequence> {
        self.store.remove_step(sequence_id, step_id, self.now())
    }

    pub fn reorder_steps(&self, sequence_id: Uuid, step_ids: &[Uuid]) -> OutreachResult<Sequence> {
        self.store.reorder_steps(sequence_id, step_ids, self.now())
    }

    pub fn update_settings(
        &self,
        sequence_id: Uuid,
        settings: SequenceSettings,
    ) -> OutreachResult<Sequence> {
        self.store.update_settings(sequence_id, settings, self.now())
    }

    pub fn set_sequence_status(
        &self,
        sequence_id: Uuid,
        status: SequenceStatus,
    ) -> OutreachResult<Sequence> {
        let sequence = self.store.set_status(sequence_id, status, self.now())?;
        let mut event = self.events.event(
            self.now(),
            EventType::SequenceStatusChanged,
            Some(sequence_id),
            None,
            None,
        );
        event.detail = Some(format!("{:?}", status).to_lowercase());
        self.events.publish(event);
        Ok(sequence)
    }

    /// Deletes the sequence and pauses its active enrollments with reason
    /// `sequence_deleted`. The sequence's counters go with it.
    pub fn delete_sequence(&self, sequence_id: Uuid) -> OutreachResult<Sequence> {
        let now = self.now();
        let sequence = self.store.delete(sequence_id)?;

        let mut paused = 0usize;
        for enrollment in self.repo.enrollments_for_sequence(sequence_id) {
            if enrollment.status != EnrollmentStatus::Active {
                continue;
            }
            let result = {
                let lock = self.locks.handle(enrollment.id);
                let _guard = lock.lock();
                self.pause_locked(enrollment.id, PauseReason::SequenceDeleted, now)
            };
            match result {
                Ok((_, transition)) if transition.changed() => paused += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(enrollment_id = %enrollment.id, error = %e, "Could not pause enrollment of deleted sequence")
                }
            }
            self.release_if_finished(enrollment.id);
        }

        info!(sequence_id = %sequence_id, paused, "Cascade-paused enrollments of deleted sequence");
        self.events.publish(self.events.event(
            now,
            EventType::SequenceDeleted,
            Some(sequence_id),
            None,
            None,
        ));
        Ok(sequence)
    }

    // ─── Enrollments ───────────────────────────────────────────────────────

    /// Enrolls a lead into an active sequence and schedules its first step.
    ///
    /// The lead and the sequence's step list are snapshotted; later edits to
    /// either do not affect this enrollment.
    pub fn enroll_lead(
        &self,
        sequence_id: Uuid,
        lead: Lead,
        overrides: HashMap<String, String>,
    ) -> OutreachResult<Enrollment> {
        let now = self.now();
        let sequence = self.store.get(sequence_id)?;
        if sequence.status != SequenceStatus::Active {
            return Err(OutreachError::InvalidState(format!(
                "sequence {} is {:?}, enrollment requires an active sequence",
                sequence_id, sequence.status
            )));
        }

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            sequence_id,
            variables: renderer::lead_variables(&lead, overrides),
            lead,
            status: EnrollmentStatus::Active,
            current_step: 0,
            steps: sequence.steps,
            step_results: Vec::new(),
            pause_reason: None,
            replied_at: None,
            meeting_booked_at: None,
            enrolled_at: now,
            updated_at: now,
            completed_at: None,
        };
        let enrollment_id = enrollment.id;
        let lead_id = enrollment.lead.id.clone();

        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();

        self.repo.insert_enrollment(enrollment);
        if let Err(e) = self
            .repo
            .apply_stat_delta(sequence_id, state_machine::enrolled())
        {
            // Sequence deleted between the status check and the insert.
            warn!(sequence_id = %sequence_id, enrollment_id = %enrollment_id, error = %e, "Sequence vanished during enrollment");
            self.repo.update_enrollment(enrollment_id, &mut |orphan| {
                orphan.status = EnrollmentStatus::Paused;
                orphan.pause_reason = Some(PauseReason::SequenceDeleted);
                Ok(())
            })?;
            return Err(e);
        }

        info!(
            enrollment_id = %enrollment_id,
            sequence_id = %sequence_id,
            lead_id = %lead_id,
            "Lead enrolled"
        );
        metrics::counter!("sequences.enrollments.created").increment(1);
        let mut event = self.events.event(
            now,
            EventType::EnrollmentCreated,
            Some(sequence_id),
            Some(enrollment_id),
            None,
        );
        event.lead_id = Some(lead_id);
        self.events.publish(event);

        self.scheduler.schedule_next_step(enrollment_id, now)?;
        self.get_enrollment(enrollment_id)
    }

    /// Records a reply. Pauses the enrollment when the sequence stops on reply.
    pub fn handle_reply(
        &self,
        enrollment_id: Uuid,
        detail: Option<String>,
    ) -> OutreachResult<Enrollment> {
        self.handle_response(enrollment_id, Response::Reply, detail)
    }

    /// Records a booked meeting. Pauses the enrollment when the sequence
    /// stops on meeting.
    pub fn handle_meeting_booked(
        &self,
        enrollment_id: Uuid,
        detail: Option<String>,
    ) -> OutreachResult<Enrollment> {
        self.handle_response(enrollment_id, Response::Meeting, detail)
    }

    /// Routes an inbound provider notification. Engagement signals (open,
    /// click, bounce) land on the enrollment's most recent delivered execution.
    pub fn handle_event(&self, event: InboundEvent) -> OutreachResult<Enrollment> {
        let outcome = match event.event_type {
            InboundEventType::Reply => return self.handle_reply(event.enrollment_id, event.detail),
            InboundEventType::Meeting => {
                return self.handle_meeting_booked(event.enrollment_id, event.detail)
            }
            InboundEventType::Open => ExecutionOutcome::Opened,
            InboundEventType::Click => ExecutionOutcome::Clicked,
            InboundEventType::Bounce => ExecutionOutcome::Bounced,
        };

        self.load_enrollment(event.enrollment_id)?;
        let execution = self.latest_delivered(event.enrollment_id).ok_or_else(|| {
            OutreachError::InvalidState(format!(
                "enrollment {} has no delivered execution to record {} on",
                event.enrollment_id,
                outcome.as_str()
            ))
        })?;
        self.complete_execution(execution.id, outcome, event.detail)?;
        self.get_enrollment(event.enrollment_id)
    }

    /// Pauses an active enrollment. Pausing a paused enrollment is a no-op.
    pub fn pause_enrollment(&self, enrollment_id: Uuid) -> OutreachResult<Enrollment> {
        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();
        let (enrollment, transition) =
            self.pause_locked(enrollment_id, PauseReason::Manual, self.now())?;
        self.scheduler
            .apply_delta(enrollment.sequence_id, transition.delta);
        Ok(enrollment)
    }

    /// Resumes a paused enrollment at its current step. A new execution is
    /// scheduled unless one is still open.
    pub fn resume_enrollment(&self, enrollment_id: Uuid) -> OutreachResult<Enrollment> {
        let now = self.now();
        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();

        let enrollment = self.load_enrollment(enrollment_id)?;
        if enrollment.pause_reason == Some(PauseReason::SequenceDeleted) {
            return Err(OutreachError::InvalidState(format!(
                "enrollment {} belongs to a deleted sequence",
                enrollment_id
            )));
        }
        let transition = state_machine::transition(enrollment.status, EnrollmentEvent::Resume)?;
        if !transition.changed() {
            return Ok(enrollment);
        }

        self.repo.update_enrollment(enrollment_id, &mut |e| {
            e.status = transition.to;
            e.pause_reason = None;
            e.updated_at = now;
            Ok(())
        })?;
        self.scheduler
            .apply_delta(enrollment.sequence_id, transition.delta);

        info!(enrollment_id = %enrollment_id, current_step = enrollment.current_step, "Enrollment resumed");
        metrics::counter!("sequences.enrollments.resumed").increment(1);
        self.events.publish(self.events.event(
            now,
            EventType::EnrollmentResumed,
            Some(enrollment.sequence_id),
            Some(enrollment_id),
            None,
        ));

        self.scheduler.schedule_next_step(enrollment_id, now)?;
        self.get_enrollment(enrollment_id)
    }

    /// Schedules the enrollment's current step if nothing is open.
    pub fn schedule_next_step(&self, enrollment_id: Uuid) -> OutreachResult<Option<Execution>> {
        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();
        self.scheduler.schedule_next_step(enrollment_id, self.now())
    }

    pub fn get_enrollment(&self, enrollment_id: Uuid) -> OutreachResult<Enrollment> {
        self.load_enrollment(enrollment_id)
    }

    pub fn list_enrollments(&self, sequence_id: Uuid) -> Vec<Enrollment> {
        self.repo.enrollments_for_sequence(sequence_id)
    }

    // ─── Executions ────────────────────────────────────────────────────────

    /// Records a dispatcher outcome. Advancing outcomes move an active
    /// enrollment to its next step; repeated reports of the same outcome
    /// change nothing.
    pub fn complete_execution(
        &self,
        execution_id: Uuid,
        outcome: ExecutionOutcome,
        detail: Option<String>,
    ) -> OutreachResult<Execution> {
        let enrollment_id = self
            .repo
            .get_execution(execution_id)
            .ok_or_else(|| OutreachError::not_found("Execution", execution_id))?
            .enrollment_id;

        let completed = {
            let lock = self.locks.handle(enrollment_id);
            let _guard = lock.lock();
            self.complete_execution_locked(execution_id, enrollment_id, outcome, detail)
        };
        self.release_if_finished(enrollment_id);
        completed
    }

    fn complete_execution_locked(
        &self,
        execution_id: Uuid,
        enrollment_id: Uuid,
        outcome: ExecutionOutcome,
        detail: Option<String>,
    ) -> OutreachResult<Execution> {
        let now = self.now();
        let mut progress = Progress::Duplicate;
        let execution = self.repo.update_execution(execution_id, &mut |e| {
            progress = state_machine::record_outcome(e, outcome, detail.clone(), now)?;
            Ok(())
        })?;

        if progress == Progress::Duplicate {
            debug!(execution_id = %execution_id, outcome = outcome.as_str(), "Duplicate execution outcome ignored");
            return Ok(execution);
        }

        self.repo.update_enrollment(enrollment_id, &mut |e| {
            e.record(execution.step_index, outcome.result_kind(), detail.clone(), now);
            Ok(())
        })?;

        info!(
            execution_id = %execution_id,
            enrollment_id = %enrollment_id,
            step_index = execution.step_index,
            outcome = outcome.as_str(),
            "Execution outcome recorded"
        );
        metrics::counter!("sequences.executions.completed", "outcome" => outcome.as_str())
            .increment(1);
        let mut event = self.events.event(
            now,
            EventType::ExecutionCompleted,
            Some(execution.sequence_id),
            Some(enrollment_id),
            Some(execution_id),
        );
        event.detail = Some(outcome.as_str().to_string());
        self.events.publish(event);

        if progress == Progress::Advance {
            self.scheduler
                .advance(enrollment_id, execution.step_index, now)?;
        }
        Ok(execution)
    }

    pub fn get_execution(&self, execution_id: Uuid) -> OutreachResult<Execution> {
        self.repo
            .get_execution(execution_id)
            .ok_or_else(|| OutreachError::not_found("Execution", execution_id))
    }

    pub fn list_executions(&self, enrollment_id: Uuid) -> Vec<Execution> {
        self.repo.executions_for_enrollment(enrollment_id)
    }

    /// Scheduled, unclaimed executions whose time has come.
    pub fn due_executions(&self, limit: usize) -> Vec<Execution> {
        self.repo.due_executions(self.now(), limit)
    }

    /// Claims a due execution for dispatch by stamping `dispatched_at`, so a
    /// concurrent poll cannot hand it out twice.
    pub fn claim_execution(&self, execution_id: Uuid) -> OutreachResult<Claim> {
        let now = self.now();
        let Some(enrollment_id) = self
            .repo
            .get_execution(execution_id)
            .map(|e| e.enrollment_id)
        else {
            return Ok(Claim::Gone);
        };

        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();

        let execution = match self.repo.get_execution(execution_id) {
            Some(e) if e.status.is_open() && e.dispatched_at.is_none() => e,
            _ => return Ok(Claim::Gone),
        };
        let enrollment = self.load_enrollment(enrollment_id)?;
        let sequence = self.repo.get_sequence(execution.sequence_id);

        let settings = match sequence {
            _ if enrollment.status != EnrollmentStatus::Active => {
                return Ok(Claim::Inactive(execution))
            }
            Some(s) if s.status == SequenceStatus::Active => s.settings,
            Some(s) if s.status == SequenceStatus::Paused => return Ok(Claim::Held),
            _ => return Ok(Claim::Inactive(execution)),
        };

        let execution = self.repo.update_execution(execution_id, &mut |e| {
            e.dispatched_at = Some(now);
            Ok(())
        })?;
        debug!(execution_id = %execution_id, enrollment_id = %enrollment_id, "Claimed execution for dispatch");
        Ok(Claim::Ready(DispatchJob {
            execution,
            lead: enrollment.lead,
            settings,
        }))
    }

    /// Pushes an open execution to `until` and releases any claim on it.
    pub fn defer_execution(
        &self,
        execution_id: Uuid,
        until: DateTime<Utc>,
    ) -> OutreachResult<Execution> {
        let current = self.get_execution(execution_id)?;
        let lock = self.locks.handle(current.enrollment_id);
        let _guard = lock.lock();

        let execution = self.repo.update_execution(execution_id, &mut |e| {
            if !e.status.is_open() {
                return Err(OutreachError::InvalidState(format!(
                    "execution {} is already {:?}",
                    e.id, e.status
                )));
            }
            e.scheduled_at = until;
            e.dispatched_at = None;
            Ok(())
        })?;

        info!(execution_id = %execution_id, until = %until, "Execution deferred");
        metrics::counter!("sequences.executions.deferred").increment(1);
        self.events.publish(self.events.event(
            self.now(),
            EventType::ExecutionDeferred,
            Some(execution.sequence_id),
            Some(execution.enrollment_id),
            Some(execution_id),
        ));
        Ok(execution)
    }

    // ─── Analytics ─────────────────────────────────────────────────────────

    pub fn sequence_analytics(&self, sequence_id: Uuid) -> OutreachResult<SequenceAnalytics> {
        let sequence = self.store.get(sequence_id)?;
        let enrollments = self.repo.enrollments_for_sequence(sequence_id);
        let executions = self.repo.executions_for_sequence(sequence_id);
        Ok(analytics::sequence_analytics(
            &sequence,
            &enrollments,
            &executions,
            self.now(),
        ))
    }

    // ─── Internals ─────────────────────────────────────────────────────────

    fn load_enrollment(&self, enrollment_id: Uuid) -> OutreachResult<Enrollment> {
        self.repo
            .get_enrollment(enrollment_id)
            .ok_or_else(|| OutreachError::not_found("Enrollment", enrollment_id))
    }

    /// Drops the lock entry of an enrollment that will not run again.
    /// Must be called without holding that enrollment's lock.
    fn release_if_finished(&self, enrollment_id: Uuid) {
        let finished = self.repo.get_enrollment(enrollment_id).map_or(true, |e| {
            e.status == EnrollmentStatus::Completed
                || e.pause_reason == Some(PauseReason::SequenceDeleted)
        });
        if finished && self.locks.release(enrollment_id) {
            debug!(enrollment_id = %enrollment_id, "Released enrollment lock");
        }
    }

    fn latest_delivered(&self, enrollment_id: Uuid) -> Option<Execution> {
        self.repo
            .executions_for_enrollment(enrollment_id)
            .into_iter()
            .filter(|e| e.status.is_delivered() || e.status == ExecutionStatus::Bounced)
            .last()
    }

    fn handle_response(
        &self,
        enrollment_id: Uuid,
        response: Response,
        detail: Option<String>,
    ) -> OutreachResult<Enrollment> {
        let now = self.now();
        let lock = self.locks.handle(enrollment_id);
        let _guard = lock.lock();

        let enrollment = self.load_enrollment(enrollment_id)?;
        let settings = self
            .repo
            .get_sequence(enrollment.sequence_id)
            .map(|s| s.settings);

        let (event, kind) = match response {
            Response::Reply => (
                EnrollmentEvent::Reply {
                    first: enrollment.replied_at.is_none(),
                    stop: settings.as_ref().map_or(true, |s| s.stop_on_reply),
                },
                StepResultKind::Replied,
            ),
            Response::Meeting => (
                EnrollmentEvent::Meeting {
                    first: enrollment.meeting_booked_at.is_none(),
                    stop: settings.as_ref().map_or(true, |s| s.stop_on_meeting),
                },
                StepResultKind::MeetingBooked,
            ),
        };
        let transition = state_machine::transition(enrollment.status, event)?;

        let updated = self.repo.update_enrollment(enrollment_id, &mut |e| {
            let step = e.current_step;
            e.record(step, kind, detail.clone(), now);
            match response {
                Response::Reply => e.replied_at.get_or_insert(now),
                Response::Meeting => e.meeting_booked_at.get_or_insert(now),
            };
            if transition.changed() {
                e.status = transition.to;
                e.pause_reason = transition.pause_reason;
            }
            Ok(())
        })?;
        self.scheduler
            .apply_delta(updated.sequence_id, transition.delta);

        if response == Response::Reply {
            if let Some(execution) = self.latest_delivered(enrollment_id) {
                let marked = self.repo.update_execution(execution.id, &mut |e| {
                    state_machine::record_outcome(e, ExecutionOutcome::Replied, None, now).map(|_| ())
                });
                if let Err(e) = marked {
                    debug!(execution_id = %execution.id, error = %e, "Reply not attributed to execution");
                }
            }
        }

        let (event_type, counter) = match response {
            Response::Reply => (EventType::ReplyReceived, "sequences.replies"),
            Response::Meeting => (EventType::MeetingBooked, "sequences.meetings"),
        };
        info!(
            enrollment_id = %enrollment_id,
            sequence_id = %updated.sequence_id,
            response = ?response,
            status = ?updated.status,
            "Lead responded"
        );
        metrics::counter!(counter).increment(1);
        let mut event = self.events.event(
            now,
            event_type,
            Some(updated.sequence_id),
            Some(enrollment_id),
            None,
        );
        event.lead_id = Some(updated.lead.id.clone());
        event.detail = detail;
        self.events.publish(event);

        if transition.changed() {
            self.emit_paused(&updated);
        }
        Ok(updated)
    }

    /// Pauses the enrollment without touching counters; the caller applies
    /// the returned delta. Expects the enrollment lock to be held.
    fn pause_locked(
        &self,
        enrollment_id: Uuid,
        reason: PauseReason,
        now: DateTime<Utc>,
    ) -> OutreachResult<(Enrollment, Transition)> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        let transition =
            state_machine::transition(enrollment.status, EnrollmentEvent::Pause { reason })?;
        if !transition.changed() {
            return Ok((enrollment, transition));
        }

        let updated = self.repo.update_enrollment(enrollment_id, &mut |e| {
            e.status = transition.to;
            e.pause_reason = transition.pause_reason;
            e.updated_at = now;
            Ok(())
        })?;
        self.emit_paused(&updated);
        Ok((updated, transition))
    }

    fn emit_paused(&self, enrollment: &Enrollment) {
        info!(
            enrollment_id = %enrollment.id,
            reason = ?enrollment.pause_reason,
            current_step = enrollment.current_step,
            "Enrollment paused"
        );
        metrics::counter!("sequences.enrollments.paused").increment(1);
        let mut event = self.events.event(
            enrollment.updated_at,
            EventType::EnrollmentPaused,
            Some(enrollment.sequence_id),
            Some(enrollment.id),
            None,
        );
        event.detail = enrollment
            .pause_reason
            .map(|r| format!("{:?}", r).to_lowercase());
        self.events.publish(event);
    }
}
