//! Sequence analytics — per-step funnel metrics derived from execution history.
//!
//! Pure read-side computation. It is deliberately independent of the running
//! counters on the sequence so the two can be compared.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    Channel, Enrollment, EnrollmentStatus, Execution, ExecutionStatus, Sequence, SequenceStats,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepAnalytics {
    pub step_index: usize,
    pub channel: Option<Channel>,
    pub scheduled: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub replied: u64,
    pub bounced: u64,
    pub failed: u64,
    pub skipped: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
}

/// Live count of enrollments by status, computed by scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentBreakdown {
    pub total: u64,
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceAnalytics {
    pub sequence_id: Uuid,
    pub steps: Vec<StepAnalytics>,
    pub enrollments: EnrollmentBreakdown,
    /// Running counters as stored on the sequence.
    pub stats: SequenceStats,
    pub conversion_rate: f64,
    pub computed_at: DateTime<Utc>,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Buckets executions by step index and computes funnel metrics.
pub fn sequence_analytics(
    sequence: &Sequence,
    enrollments: &[Enrollment],
    executions: &[Execution],
    now: DateTime<Utc>,
) -> SequenceAnalytics {
    let mut buckets: BTreeMap<usize, StepAnalytics> = sequence
        .steps
        .iter()
        .map(|s| {
            let index = s.order as usize;
            (
                index,
                StepAnalytics {
                    step_index: index,
                    channel: Some(s.channel),
                    ..Default::default()
                },
            )
        })
        .collect();

    for execution in executions.iter().filter(|e| e.sequence_id == sequence.id) {
        let bucket = buckets
            .entry(execution.step_index)
            .or_insert_with(|| StepAnalytics {
                step_index: execution.step_index,
                channel: Some(execution.channel),
                ..Default::default()
            });

        if execution.sent_at.is_some() {
            bucket.sent += 1;
        }
        if execution.opened_at.is_some() {
            bucket.opened += 1;
        }
        if execution.clicked_at.is_some() {
            bucket.clicked += 1;
        }
        if execution.replied_at.is_some() {
            bucket.replied += 1;
        }
        match execution.status {
            ExecutionStatus::Scheduled => bucket.scheduled += 1,
            ExecutionStatus::Bounced => bucket.bounced += 1,
            ExecutionStatus::Failed => bucket.failed += 1,
            ExecutionStatus::Skipped => bucket.skipped += 1,
            _ => {}
        }
    }

    let steps = buckets
        .into_values()
        .map(|mut s| {
            s.open_rate = ratio(s.opened, s.sent);
            s.click_rate = ratio(s.clicked, s.sent);
            s.reply_rate = ratio(s.replied, s.sent);
            s
        })
        .collect();

    let mut breakdown = EnrollmentBreakdown::default();
    for enrollment in enrollments.iter().filter(|e| e.sequence_id == sequence.id) {
        breakdown.total += 1;
        match enrollment.status {
            EnrollmentStatus::Active => breakdown.active += 1,
            EnrollmentStatus::Paused => breakdown.paused += 1,
            EnrollmentStatus::Completed => breakdown.completed += 1,
        }
    }

    SequenceAnalytics {
        sequence_id: sequence.id,
        steps,
        enrollments: breakdown,
        stats: sequence.stats,
        conversion_rate: ratio(sequence.stats.replied, sequence.stats.enrolled),
        computed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RenderedContent, SequenceSettings, SequenceStatus, Step};
    use outreach_core::types::Lead;
    use std::collections::HashMap;

    fn sequence(steps: usize) -> Sequence {
        let now = Utc::now();
        Sequence {
            id: Uuid::new_v4(),
            name: "Funnel".into(),
            description: String::new(),
            status: SequenceStatus::Active,
            settings: SequenceSettings {
                start_hour: 9,
                end_hour: 17,
                timezone: "UTC".into(),
                skip_weekends: true,
                stop_on_reply: true,
                stop_on_meeting: true,
                daily_limit: 10,
            },
            steps: (0..steps)
                .map(|i| Step {
                    id: Uuid::new_v4(),
                    order: i as u32,
                    channel: Channel::Email,
                    delay_days: 0,
                    delay_hours: 0,
                    subject: None,
                    body: String::new(),
                    template_id: None,
                })
                .collect(),
            stats: SequenceStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn execution(sequence_id: Uuid, step_index: usize, status: ExecutionStatus) -> Execution {
        let now = Utc::now();
        let delivered = status.is_delivered() || status == ExecutionStatus::Bounced;
        Execution {
            id: Uuid::new_v4(),
            enrollment_id: Uuid::new_v4(),
            sequence_id,
            step_id: Uuid::new_v4(),
            step_index,
            channel: Channel::Email,
            template_id: None,
            scheduled_at: now,
            status,
            content: RenderedContent::default(),
            dispatched_at: None,
            sent_at: status.is_delivered().then_some(now),
            opened_at: matches!(
                status,
                ExecutionStatus::Opened | ExecutionStatus::Clicked | ExecutionStatus::Replied
            )
            .then_some(now),
            clicked_at: (status == ExecutionStatus::Clicked).then_some(now),
            replied_at: (status == ExecutionStatus::Replied).then_some(now),
            bounced_at: (status == ExecutionStatus::Bounced).then_some(now),
            completed_at: delivered.then_some(now),
            detail: None,
            created_at: now,
        }
    }

    fn enrollment(sequence_id: Uuid, status: EnrollmentStatus) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            sequence_id,
            lead: Lead::default(),
            status,
            current_step: 0,
            steps: Vec::new(),
            variables: HashMap::new(),
            step_results: Vec::new(),
            pause_reason: None,
            replied_at: None,
            meeting_booked_at: None,
            enrolled_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_empty_sequence_has_zero_rates() {
        let seq = sequence(2);
        let analytics = sequence_analytics(&seq, &[], &[], Utc::now());
        assert_eq!(analytics.steps.len(), 2);
        for step in &analytics.steps {
            assert_eq!(step.sent, 0);
            assert_eq!(step.open_rate, 0.0);
            assert_eq!(step.reply_rate, 0.0);
        }
        assert_eq!(analytics.conversion_rate, 0.0);
    }

    #[test]
    fn test_step_funnel_counts_and_rates() {
        let seq = sequence(2);
        let executions = vec![
            execution(seq.id, 0, ExecutionStatus::Sent),
            execution(seq.id, 0, ExecutionStatus::Opened),
            execution(seq.id, 0, ExecutionStatus::Clicked),
            execution(seq.id, 0, ExecutionStatus::Replied),
            execution(seq.id, 0, ExecutionStatus::Bounced),
            execution(seq.id, 1, ExecutionStatus::Scheduled),
            execution(seq.id, 1, ExecutionStatus::Failed),
            // Other sequences are ignored.
            execution(Uuid::new_v4(), 0, ExecutionStatus::Sent),
        ];
        let analytics = sequence_analytics(&seq, &[], &executions, Utc::now());

        let first = &analytics.steps[0];
        assert_eq!(first.sent, 4);
        assert_eq!(first.opened, 3);
        assert_eq!(first.clicked, 1);
        assert_eq!(first.replied, 1);
        assert_eq!(first.bounced, 1);
        assert_eq!(first.open_rate, 0.75);
        assert_eq!(first.click_rate, 0.25);
        assert_eq!(first.reply_rate, 0.25);

        let second = &analytics.steps[1];
        assert_eq!(second.sent, 0);
        assert_eq!(second.scheduled, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(second.open_rate, 0.0);
    }

    #[test]
    fn test_enrollment_breakdown_and_conversion() {
        let mut seq = sequence(1);
        seq.stats = SequenceStats {
            enrolled: 4,
            active: 2,
            completed: 1,
            replied: 1,
            meetings: 0,
        };
        let enrollments = vec![
            enrollment(seq.id, EnrollmentStatus::Active),
            enrollment(seq.id, EnrollmentStatus::Active),
            enrollment(seq.id, EnrollmentStatus::Paused),
            enrollment(seq.id, EnrollmentStatus::Completed),
        ];
        let analytics = sequence_analytics(&seq, &enrollments, &[], Utc::now());
        assert_eq!(
            analytics.enrollments,
            EnrollmentBreakdown {
                total: 4,
                active: 2,
                paused: 1,
                completed: 1,
            }
        );
        assert_eq!(analytics.conversion_rate, 0.25);
        assert_eq!(analytics.stats.active, analytics.enrollments.active);
    }
}
