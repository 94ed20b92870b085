//! Storage interface for sequences, enrollments and executions.
//!
//! The engine only talks to [`SequenceRepository`]; [`InMemoryRepository`]
//! is the DashMap-backed implementation used in development and tests.
//! Production: back the trait with PostgreSQL or a similar ACID store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use outreach_core::{OutreachError, OutreachResult};
use tracing::info;
use uuid::Uuid;

use crate::types::{Enrollment, Execution, Sequence, SequenceStats, StatDelta};

pub trait SequenceRepository: Send + Sync {
    // ─── Sequences ─────────────────────────────────────────────────────────

    fn insert_sequence(&self, sequence: Sequence);

    /// Returns the sequence with a fresh snapshot of its counters.
    fn get_sequence(&self, id: Uuid) -> Option<Sequence>;

    fn list_sequences(&self) -> Vec<Sequence>;

    /// Applies `apply` to the stored sequence atomically. The closure's
    /// error aborts the update and leaves the stored value untouched.
    fn update_sequence(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Sequence) -> OutreachResult<()>,
    ) -> OutreachResult<Sequence>;

    fn remove_sequence(&self, id: Uuid) -> Option<Sequence>;

    /// Atomically adjusts the sequence counters.
    fn apply_stat_delta(&self, sequence_id: Uuid, delta: StatDelta) -> OutreachResult<()>;

    fn stats(&self, sequence_id: Uuid) -> Option<SequenceStats>;

    // ─── Enrollments ───────────────────────────────────────────────────────

    fn insert_enrollment(&self, enrollment: Enrollment);

    fn get_enrollment(&self, id: Uuid) -> Option<Enrollment>;

    fn update_enrollment(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Enrollment) -> OutreachResult<()>,
    ) -> OutreachResult<Enrollment>;

    fn enrollments_for_sequence(&self, sequence_id: Uuid) -> Vec<Enrollment>;

    // ─── Executions ────────────────────────────────────────────────────────

    fn insert_execution(&self, execution: Execution);

    fn get_execution(&self, id: Uuid) -> Option<Execution>;

    fn update_execution(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Execution) -> OutreachResult<()>,
    ) -> OutreachResult<Execution>;

    fn executions_for_sequence(&self, sequence_id: Uuid) -> Vec<Execution>;

    /// Executions of an enrollment ordered by step index, then creation time.
    fn executions_for_enrollment(&self, enrollment_id: Uuid) -> Vec<Execution>;

    /// Scheduled, unclaimed executions with `scheduled_at <= now`. No
    /// ordering is guaranteed.
    fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Vec<Execution>;
}

/// Lock-free running counters for one sequence.
#[derive(Debug, Default)]
struct SequenceCounters {
    enrolled: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    replied: AtomicU64,
    meetings: AtomicU64,
}

impl SequenceCounters {
    fn apply(&self, delta: StatDelta) {
        adjust(&self.enrolled, delta.enrolled);
        adjust(&self.active, delta.active);
        adjust(&self.completed, delta.completed);
        adjust(&self.replied, delta.replied);
        adjust(&self.meetings, delta.meetings);
    }

    fn snapshot(&self) -> SequenceStats {
        SequenceStats {
            enrolled: self.enrolled.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            meetings: self.meetings.load(Ordering::Relaxed),
        }
    }
}

fn adjust(counter: &AtomicU64, delta: i64) {
    if delta > 0 {
        counter.fetch_add(delta.unsigned_abs(), Ordering::Relaxed);
    } else if delta < 0 {
        counter.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}

/// Thread-safe in-memory repository backed by DashMap.
#[derive(Default)]
pub struct InMemoryRepository {
    sequences: DashMap<Uuid, Sequence>,
    counters: DashMap<Uuid, Arc<SequenceCounters>>,
    enrollments: DashMap<Uuid, Enrollment>,
    executions: DashMap<Uuid, Execution>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        info!("Sequence repository initialized (in-memory, development mode)");
        Self::default()
    }

    fn with_stats(&self, mut sequence: Sequence) -> Sequence {
        if let Some(counters) = self.counters.get(&sequence.id) {
            sequence.stats = counters.snapshot();
        }
        sequence
    }
}

impl SequenceRepository for InMemoryRepository {
    fn insert_sequence(&self, sequence: Sequence) {
        self.counters
            .entry(sequence.id)
            .or_insert_with(|| Arc::new(SequenceCounters::default()));
        self.sequences.insert(sequence.id, sequence);
    }

    fn get_sequence(&self, id: Uuid) -> Option<Sequence> {
        let sequence = self.sequences.get(&id).map(|r| r.value().clone())?;
        Some(self.with_stats(sequence))
    }

    fn list_sequences(&self) -> Vec<Sequence> {
        let mut sequences: Vec<Sequence> = self
            .sequences
            .iter()
            .map(|r| self.with_stats(r.value().clone()))
            .collect();
        sequences.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sequences
    }

    fn update_sequence(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Sequence) -> OutreachResult<()>,
    ) -> OutreachResult<Sequence> {
        let updated = {
            let mut entry = self
                .sequences
                .get_mut(&id)
                .ok_or_else(|| OutreachError::not_found("Sequence", id))?;
            let mut draft = entry.value().clone();
            apply(&mut draft)?;
            *entry.value_mut() = draft.clone();
            draft
        };
        Ok(self.with_stats(updated))
    }

    fn remove_sequence(&self, id: Uuid) -> Option<Sequence> {
        let (_, sequence) = self.sequences.remove(&id)?;
        let sequence = self.with_stats(sequence);
        self.counters.remove(&id);
        Some(sequence)
    }

    fn apply_stat_delta(&self, sequence_id: Uuid, delta: StatDelta) -> OutreachResult<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let counters = self
            .counters
            .get(&sequence_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| OutreachError::not_found("Sequence", sequence_id))?;
        counters.apply(delta);
        Ok(())
    }

    fn stats(&self, sequence_id: Uuid) -> Option<SequenceStats> {
        self.counters.get(&sequence_id).map(|c| c.snapshot())
    }

    fn insert_enrollment(&self, enrollment: Enrollment) {
        self.enrollments.insert(enrollment.id, enrollment);
    }

    fn get_enrollment(&self, id: Uuid) -> Option<Enrollment> {
        self.enrollments.get(&id).map(|r| r.value().clone())
    }

    fn update_enrollment(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Enrollment) -> OutreachResult<()>,
    ) -> OutreachResult<Enrollment> {
        let mut entry = self
            .enrollments
            .get_mut(&id)
            .ok_or_else(|| OutreachError::not_found("Enrollment", id))?;
        let mut draft = entry.value().clone();
        apply(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn enrollments_for_sequence(&self, sequence_id: Uuid) -> Vec<Enrollment> {
        let mut enrollments: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|r| r.value().sequence_id == sequence_id)
            .map(|r| r.value().clone())
            .collect();
        enrollments.sort_by(|a, b| a.enrolled_at.cmp(&b.enrolled_at));
        enrollments
    }

    fn insert_execution(&self, execution: Execution) {
        self.executions.insert(execution.id, execution);
    }

    fn get_execution(&self, id: Uuid) -> Option<Execution> {
        self.executions.get(&id).map(|r| r.value().clone())
    }

    fn update_execution(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Execution) -> OutreachResult<()>,
    ) -> OutreachResult<Execution> {
        let mut entry = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| OutreachError::not_found("Execution", id))?;
        let mut draft = entry.value().clone();
        apply(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn executions_for_sequence(&self, sequence_id: Uuid) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|r| r.value().sequence_id == sequence_id)
            .map(|r| r.value().clone())
            .collect()
    }

    fn executions_for_enrollment(&self, enrollment_id: Uuid) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .executions
            .iter()
            .filter(|r| r.value().enrollment_id == enrollment_id)
            .map(|r| r.value().clone())
            .collect();
        executions.sort_by(|a, b| {
            a.step_index
                .cmp(&b.step_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        executions
    }

    fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|r| {
                let e = r.value();
                e.status.is_open() && e.dispatched_at.is_none() && e.scheduled_at <= now
            })
            .take(limit)
            .map(|r| r.value().clone())
            .collect()
    }
}
