//! Per-enrollment mutual exclusion.
//!
//! Every read-then-write of an enrollment (enroll, reply handling, execution
//! completion, dispatch claims) runs under that enrollment's lock, so
//! unrelated enrollments never contend with each other. The engine releases
//! an entry once its enrollment has finished, so the table tracks live
//! enrollments rather than every enrollment ever seen.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct EnrollmentLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl EnrollmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `enrollment_id`, creating it on first use.
    /// Callers hold the returned handle and lock it for the critical section.
    pub fn handle(&self, enrollment_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(enrollment_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drops the entry for `enrollment_id` unless a caller still holds its
    /// handle. A later `handle` call creates a fresh lock.
    pub fn release(&self, enrollment_id: Uuid) -> bool {
        self.locks
            .remove_if(&enrollment_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
