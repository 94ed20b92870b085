//! End-to-end engine scenarios driven through the public API with a manual clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use outreach_core::config::SequenceDefaults;
use outreach_core::event_bus::{capture_sink, CaptureSink};
use outreach_core::types::{EventType, Lead};
use outreach_core::OutreachError;
use outreach_sequences::types::{
    Channel, EnrollmentStatus, Execution, ExecutionOutcome, PauseReason, SequenceDefinition,
    SequenceSettings, SequenceStats, SequenceStatus, StepDefinition,
};
use outreach_sequences::{ManualTime, SequenceEngine};
use uuid::Uuid;

fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

struct Harness {
    engine: SequenceEngine,
    time: Arc<ManualTime>,
    sink: Arc<CaptureSink>,
}

fn harness() -> Harness {
    let time = Arc::new(ManualTime::new(monday_morning()));
    let sink = capture_sink();
    let engine = SequenceEngine::in_memory(SequenceDefaults::default())
        .with_event_sink(sink.clone())
        .with_time_source(time.clone());
    Harness { engine, time, sink }
}

fn settings(stop_on_reply: bool) -> SequenceSettings {
    SequenceSettings {
        start_hour: 9,
        end_hour: 17,
        timezone: "UTC".into(),
        skip_weekends: true,
        stop_on_reply,
        stop_on_meeting: true,
        daily_limit: 100,
    }
}

fn email(delay_days: u32) -> StepDefinition {
    StepDefinition {
        channel: Channel::Email,
        delay_days,
        delay_hours: 0,
        subject: Some("Quick question for {company}".into()),
        body: "Hi {first_name}, saw what {company} is building.".into(),
        template_id: None,
    }
}

fn active_sequence(engine: &SequenceEngine, delays: &[u32], stop_on_reply: bool) -> Uuid {
    let sequence = engine
        .create_sequence(SequenceDefinition {
            name: "Outbound Q1".into(),
            description: "Founders at seed-stage startups".into(),
            settings: Some(settings(stop_on_reply)),
            steps: delays.iter().map(|d| email(*d)).collect(),
        })
        .unwrap();
    engine
        .set_sequence_status(sequence.id, SequenceStatus::Active)
        .unwrap();
    sequence.id
}

fn ana() -> Lead {
    Lead {
        id: "lead-ana".into(),
        name: "Ana Lopez".into(),
        email: "ana@acme.io".into(),
        company: Some("Acme".into()),
        title: Some("CTO".into()),
        ..Default::default()
    }
}

fn open_execution(engine: &SequenceEngine, enrollment_id: Uuid) -> Option<Execution> {
    engine
        .list_executions(enrollment_id)
        .into_iter()
        .find(|e| e.status.is_open())
}

fn live_active(engine: &SequenceEngine, sequence_id: Uuid) -> u64 {
    engine
        .list_enrollments(sequence_id)
        .iter()
        .filter(|e| e.status == EnrollmentStatus::Active)
        .count() as u64
}

#[test]
fn test_first_step_then_two_day_delay() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 2], true);

    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();
    let first = open_execution(&h.engine, enrollment.id).unwrap();
    assert_eq!(first.step_index, 0);
    assert_eq!(first.scheduled_at, monday_morning());
    assert!(first.content.subject.as_deref().unwrap().contains("Acme"));
    assert_eq!(first.content.body, "Hi Ana, saw what Acme is building.");

    h.engine
        .complete_execution(first.id, ExecutionOutcome::Sent, None)
        .unwrap();

    let enrollment = h.engine.get_enrollment(enrollment.id).unwrap();
    assert_eq!(enrollment.current_step, 1);
    let second = open_execution(&h.engine, enrollment.id).unwrap();
    assert_eq!(second.step_index, 1);
    assert_eq!(second.scheduled_at, monday_morning() + Duration::days(2));
}

#[test]
fn test_reply_pauses_when_stop_on_reply() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 2], true);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();
    let first = open_execution(&h.engine, enrollment.id).unwrap();

    let replied = h
        .engine
        .handle_reply(enrollment.id, Some("Sounds good".into()))
        .unwrap();
    assert_eq!(replied.status, EnrollmentStatus::Paused);
    assert_eq!(replied.pause_reason, Some(PauseReason::ReplyReceived));

    let stats = h.engine.get_sequence(sequence_id).unwrap().stats;
    assert_eq!(stats.replied, 1);
    assert_eq!(stats.active, 0);

    // Time passes and the in-flight execution still reports back.
    h.time.advance(Duration::days(7));
    h.engine
        .complete_execution(first.id, ExecutionOutcome::Sent, None)
        .unwrap();
    assert!(h.engine.schedule_next_step(enrollment.id).unwrap().is_none());
    assert_eq!(h.engine.list_executions(enrollment.id).len(), 1);
    assert_eq!(h.engine.get_enrollment(enrollment.id).unwrap().current_step, 0);
    assert_eq!(h.sink.count_type(EventType::EnrollmentPaused), 1);
}

#[test]
fn test_reply_without_stop_keeps_advancing() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 2], false);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();

    let replied = h.engine.handle_reply(enrollment.id, None).unwrap();
    assert_eq!(replied.status, EnrollmentStatus::Active);
    assert!(replied.replied_at.is_some());
    assert_eq!(replied.step_results.len(), 1);

    let first = open_execution(&h.engine, enrollment.id).unwrap();
    h.engine
        .complete_execution(first.id, ExecutionOutcome::Sent, None)
        .unwrap();
    let enrollment = h.engine.get_enrollment(enrollment.id).unwrap();
    assert_eq!(enrollment.current_step, 1);
    assert!(open_execution(&h.engine, enrollment.id).is_some());

    let stats = h.engine.get_sequence(sequence_id).unwrap().stats;
    assert_eq!(stats.replied, 1);
    assert_eq!(stats.active, 1);
}

#[test]
fn test_last_step_completes_once() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 1], true);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();

    for _ in 0..2 {
        let execution = open_execution(&h.engine, enrollment.id).unwrap();
        h.time.set(execution.scheduled_at);
        h.engine
            .complete_execution(execution.id, ExecutionOutcome::Sent, None)
            .unwrap();
    }

    let done = h.engine.get_enrollment(enrollment.id).unwrap();
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert_eq!(done.current_step, 2);
    assert!(done.completed_at.is_some());
    assert!(open_execution(&h.engine, enrollment.id).is_none());

    let last = h.engine.list_executions(enrollment.id).pop().unwrap();
    h.engine
        .complete_execution(last.id, ExecutionOutcome::Sent, None)
        .unwrap();

    let stats = h.engine.get_sequence(sequence_id).unwrap().stats;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(h.sink.count_type(EventType::EnrollmentCompleted), 1);
}

#[test]
fn test_enrolling_into_draft_is_rejected() {
    let h = harness();
    let sequence = h
        .engine
        .create_sequence(SequenceDefinition {
            name: "Draft".into(),
            description: String::new(),
            settings: None,
            steps: vec![email(0)],
        })
        .unwrap();

    let err = h
        .engine
        .enroll_lead(sequence.id, ana(), HashMap::new())
        .unwrap_err();
    assert!(matches!(err, OutreachError::InvalidState(_)));

    let after = h.engine.get_sequence(sequence.id).unwrap();
    assert_eq!(after.stats, SequenceStats::default());
    assert!(h.engine.list_enrollments(sequence.id).is_empty());
    assert_eq!(h.sink.count_type(EventType::EnrollmentCreated), 0);
}

#[test]
fn test_step_snapshot_isolates_running_enrollments() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 2], true);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();

    let sequence = h.engine.get_sequence(sequence_id).unwrap();
    h.engine.remove_step(sequence_id, sequence.steps[1].id).unwrap();
    h.engine.add_step(sequence_id, email(5)).unwrap();
    h.engine.add_step(sequence_id, email(6)).unwrap();

    let first = open_execution(&h.engine, enrollment.id).unwrap();
    h.engine
        .complete_execution(first.id, ExecutionOutcome::Sent, None)
        .unwrap();
    let second = open_execution(&h.engine, enrollment.id).unwrap();
    // Still the two-day step the lead was enrolled with.
    assert_eq!(second.scheduled_at, monday_morning() + Duration::days(2));
    assert_eq!(h.engine.get_enrollment(enrollment.id).unwrap().steps.len(), 2);
}

#[test]
fn test_concurrent_duplicate_callbacks_advance_once() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 1, 2], true);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();
    let first = open_execution(&h.engine, enrollment.id).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            thread::spawn(move || {
                engine
                    .complete_execution(first.id, ExecutionOutcome::Sent, None)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let enrollment = h.engine.get_enrollment(enrollment.id).unwrap();
    assert_eq!(enrollment.current_step, 1);
    assert_eq!(enrollment.step_results.len(), 1);
    assert_eq!(h.engine.list_executions(enrollment.id).len(), 2);
}

#[test]
fn test_concurrent_enrollments_keep_counters_exact() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 1], true);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = h.engine.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let lead = Lead {
                        id: format!("lead-{}-{}", t, i),
                        name: "Lead Person".into(),
                        email: format!("lead{}-{}@example.com", t, i),
                        ..Default::default()
                    };
                    let enrollment = engine
                        .enroll_lead(sequence_id, lead, HashMap::new())
                        .unwrap();
                    if i % 5 == 0 {
                        engine.handle_reply(enrollment.id, None).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = h.engine.get_sequence(sequence_id).unwrap().stats;
    assert_eq!(stats.enrolled, 200);
    assert_eq!(stats.replied, 40);
    assert_eq!(stats.active, 160);
    assert_eq!(stats.active, live_active(&h.engine, sequence_id));
}

/// Drives a mix of operations over many enrollments and checks after every
/// step that `current_step` never decreases or overruns, and that the active
/// counter matches the live count of active enrollments.
#[test]
fn test_invariants_hold_across_mixed_operations() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 1, 3], true);
    let enrollments: Vec<Uuid> = (0..10)
        .map(|i| {
            let lead = Lead {
                id: format!("lead-{}", i),
                name: format!("Lead {}", i),
                email: format!("lead{}@example.com", i),
                ..Default::default()
            };
            h.engine
                .enroll_lead(sequence_id, lead, HashMap::new())
                .unwrap()
                .id
        })
        .collect();
    let mut last_step: HashMap<Uuid, usize> = enrollments.iter().map(|id| (*id, 0)).collect();

    for i in 0..300usize {
        let id = enrollments[(i * 7) % enrollments.len()];
        match (i * 13 + i / 7) % 6 {
            0 | 1 => {
                if let Some(execution) = open_execution(&h.engine, id) {
                    let outcome = if i % 4 == 0 {
                        ExecutionOutcome::Failed
                    } else {
                        ExecutionOutcome::Sent
                    };
                    h.engine.complete_execution(execution.id, outcome, None).unwrap();
                }
            }
            2 => {
                h.engine.handle_reply(id, None).unwrap();
            }
            3 => {
                let _ = h.engine.pause_enrollment(id);
            }
            4 => {
                let _ = h.engine.resume_enrollment(id);
            }
            _ => {
                h.engine.handle_meeting_booked(id, None).unwrap();
            }
        }
        h.time.advance(Duration::hours(5));

        for id in &enrollments {
            let enrollment = h.engine.get_enrollment(*id).unwrap();
            assert!(enrollment.current_step >= last_step[id]);
            assert!(enrollment.current_step <= enrollment.steps.len());
            last_step.insert(*id, enrollment.current_step);
        }
        let stats = h.engine.get_sequence(sequence_id).unwrap().stats;
        assert_eq!(stats.active, live_active(&h.engine, sequence_id), "after op {}", i);
    }
}

#[test]
fn test_scheduled_times_respect_window_and_weekends() {
    let h = harness();
    // Friday afternoon, past the window.
    h.time
        .set(Utc.with_ymd_and_hms(2024, 1, 5, 18, 30, 0).unwrap());
    let sequence_id = active_sequence(&h.engine, &[0, 1, 2], true);
    let enrollment = h
        .engine
        .enroll_lead(sequence_id, ana(), HashMap::new())
        .unwrap();

    let mut seen = 0;
    while let Some(execution) = open_execution(&h.engine, enrollment.id) {
        let at = execution.scheduled_at;
        assert!(at >= h.engine.now());
        assert!(!matches!(at.weekday(), Weekday::Sat | Weekday::Sun));
        assert!((9..17).contains(&at.hour()));
        h.time.set(at);
        h.engine
            .complete_execution(execution.id, ExecutionOutcome::Sent, None)
            .unwrap();
        seen += 1;
    }
    assert_eq!(seen, 3);
    assert_eq!(
        h.engine.get_enrollment(enrollment.id).unwrap().status,
        EnrollmentStatus::Completed
    );
}

#[test]
fn test_analytics_match_history() {
    let h = harness();
    let sequence_id = active_sequence(&h.engine, &[0, 1], false);
    let a = h.engine.enroll_lead(sequence_id, ana(), HashMap::new()).unwrap();
    let b = h.engine.enroll_lead(sequence_id, ana(), HashMap::new()).unwrap();

    let a_first = open_execution(&h.engine, a.id).unwrap();
    let b_first = open_execution(&h.engine, b.id).unwrap();
    h.engine
        .complete_execution(a_first.id, ExecutionOutcome::Sent, None)
        .unwrap();
    h.engine
        .complete_execution(b_first.id, ExecutionOutcome::Bounced, None)
        .unwrap();
    h.engine
        .complete_execution(a_first.id, ExecutionOutcome::Opened, None)
        .unwrap();
    h.engine.handle_reply(a.id, None).unwrap();

    let analytics = h.engine.sequence_analytics(sequence_id).unwrap();
    let step0 = &analytics.steps[0];
    assert_eq!(step0.sent, 1);
    assert_eq!(step0.opened, 1);
    assert_eq!(step0.replied, 1);
    assert_eq!(step0.bounced, 1);
    assert_eq!(step0.open_rate, 1.0);
    assert_eq!(analytics.steps[1].scheduled, 2);
    assert_eq!(analytics.enrollments.total, 2);
    assert_eq!(analytics.enrollments.active, analytics.stats.active);
    assert_eq!(analytics.conversion_rate, 0.5);
}
