//! Sequence store — sequence definitions, step ordering and status changes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use outreach_core::config::SequenceDefaults;
use outreach_core::{OutreachError, OutreachResult};
use tracing::info;
use uuid::Uuid;

use crate::repository::SequenceRepository;
use crate::types::{
    Sequence, SequenceDefinition, SequenceSettings, SequenceStats, SequenceStatus, Step,
    StepDefinition,
};

/// CRUD over sequence definitions. Step orders are kept dense and 0-based;
/// every structural edit renumbers the whole list in one update.
#[derive(Clone)]
pub struct SequenceStore {
    repo: Arc<dyn SequenceRepository>,
    defaults: SequenceDefaults,
}

impl SequenceStore {
    pub fn new(repo: Arc<dyn SequenceRepository>, defaults: SequenceDefaults) -> Self {
        Self { repo, defaults }
    }

    /// Settings used when a definition omits its own.
    pub fn default_settings(&self) -> SequenceSettings {
        SequenceSettings {
            start_hour: self.defaults.default_start_hour,
            end_hour: self.defaults.default_end_hour,
            timezone: self.defaults.default_timezone.clone(),
            skip_weekends: self.defaults.default_skip_weekends,
            stop_on_reply: self.defaults.default_stop_on_reply,
            stop_on_meeting: self.defaults.default_stop_on_meeting,
            daily_limit: self.defaults.default_daily_limit,
        }
    }

    /// Validates and stores a new sequence in `draft` with zeroed stats.
    pub fn create(&self, definition: SequenceDefinition, now: DateTime<Utc>) -> OutreachResult<Sequence> {
        if definition.name.trim().is_empty() {
            return Err(OutreachError::Validation(
                "sequence name must not be empty".to_string(),
            ));
        }
        let settings = definition
            .settings
            .unwrap_or_else(|| self.default_settings());
        settings.validate()?;
        for step in &definition.steps {
            step.validate()?;
        }

        let steps: Vec<Step> = definition
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, def)| def.into_step(i as u32))
            .collect();

        let sequence = Sequence {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            status: SequenceStatus::Draft,
            settings,
            steps,
            stats: SequenceStats::default(),
            created_at: now,
            updated_at: now,
        };

        info!(
            sequence_id = %sequence.id,
            name = %sequence.name,
            steps = sequence.steps.len(),
            "Creating sequence"
        );
        self.repo.insert_sequence(sequence.clone());
        Ok(sequence)
    }

    pub fn get(&self, id: Uuid) -> OutreachResult<Sequence> {
        self.repo
            .get_sequence(id)
            .ok_or_else(|| OutreachError::not_found("Sequence", id))
    }

    pub fn list(&self) -> Vec<Sequence> {
        self.repo.list_sequences()
    }

    /// Appends a step with the next free order. Allowed in any status;
    /// running enrollments keep the step list they were enrolled with.
    pub fn add_step(
        &self,
        sequence_id: Uuid,
        definition: StepDefinition,
        now: DateTime<Utc>,
    ) -> OutreachResult<Step> {
        definition.validate()?;
        let mut added = None;
        self.repo.update_sequence(sequence_id, &mut |sequence| {
            let step = definition.clone().into_step(sequence.steps.len() as u32);
            added = Some(step.clone());
            sequence.steps.push(step);
            sequence.updated_at = now;
            Ok(())
        })?;
        let step = added.ok_or_else(|| {
            OutreachError::Internal(anyhow::anyhow!("step update did not run for {}", sequence_id))
        })?;
        info!(sequence_id = %sequence_id, step_id = %step.id, order = step.order, "Added step");
        Ok(step)
    }

    /// Replaces the content and timing of an existing step, keeping its id and order.
    pub fn update_step(
        &self,
        sequence_id: Uuid,
        step_id: Uuid,
        definition: StepDefinition,
        now: DateTime<Utc>,
    ) -> OutreachResult<Sequence> {
        definition.validate()?;
        self.repo.update_sequence(sequence_id, &mut |sequence| {
            let step = sequence
                .steps
                .iter_mut()
                .find(|s| s.id == step_id)
                .ok_or_else(|| OutreachError::not_found("Step", step_id))?;
            step.channel = definition.channel;
            step.delay_days = definition.delay_days;
            step.delay_hours = definition.delay_hours;
            step.subject = definition.subject.clone();
            step.body = definition.body.clone();
            step.template_id = definition.template_id.clone();
            sequence.updated_at = now;
            Ok(())
        })
    }

    /// Removes a step and renumbers the remaining ones.
    pub fn remove_step(&self, sequence_id: Uuid, step_id: Uuid, now: DateTime<Utc>) -> OutreachResult<Sequence> {
        let sequence = self.repo.update_sequence(sequence_id, &mut |sequence| {
            let before = sequence.steps.len();
            sequence.steps.retain(|s| s.id != step_id);
            if sequence.steps.len() == before {
                return Err(OutreachError::not_found("Step", step_id));
            }
            renumber(&mut sequence.steps);
            sequence.updated_at = now;
            Ok(())
        })?;
        info!(sequence_id = %sequence_id, step_id = %step_id, "Removed step");
        Ok(sequence)
    }

    /// Reorders steps to match `step_ids`, which must be a permutation of the
    /// sequence's current step ids.
    pub fn reorder_steps(
        &self,
        sequence_id: Uuid,
        step_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> OutreachResult<Sequence> {
        let unique: HashSet<&Uuid> = step_ids.iter().collect();
        if unique.len() != step_ids.len() {
            return Err(OutreachError::Validation(
                "step order contains duplicate ids".to_string(),
            ));
        }
        self.repo.update_sequence(sequence_id, &mut |sequence| {
            if step_ids.len() != sequence.steps.len() {
                return Err(OutreachError::Validation(format!(
                    "step order lists {} ids but the sequence has {} steps",
                    step_ids.len(),
                    sequence.steps.len()
                )));
            }
            let mut reordered = Vec::with_capacity(step_ids.len());
            for id in step_ids {
                let step = sequence
                    .steps
                    .iter()
                    .find(|s| s.id == *id)
                    .ok_or_else(|| OutreachError::not_found("Step", id))?;
                reordered.push(step.clone());
            }
            renumber(&mut reordered);
            sequence.steps = reordered;
            sequence.updated_at = now;
            Ok(())
        })
    }

    pub fn update_settings(
        &self,
        sequence_id: Uuid,
        settings: SequenceSettings,
        now: DateTime<Utc>,
    ) -> OutreachResult<Sequence> {
        settings.validate()?;
        self.repo.update_sequence(sequence_id, &mut |sequence| {
            sequence.settings = settings.clone();
            sequence.updated_at = now;
            Ok(())
        })
    }

    /// Moves the sequence to `status`. Does not touch enrollments.
    pub fn set_status(
        &self,
        sequence_id: Uuid,
        status: SequenceStatus,
        now: DateTime<Utc>,
    ) -> OutreachResult<Sequence> {
        let sequence = self.repo.update_sequence(sequence_id, &mut |sequence| {
            if !sequence.status.can_transition(status) {
                return Err(OutreachError::InvalidState(format!(
                    "sequence cannot move from {:?} to {:?}",
                    sequence.status, status
                )));
            }
            if status == SequenceStatus::Active && sequence.steps.is_empty() {
                return Err(OutreachError::Validation(
                    "a sequence needs at least one step to be activated".to_string(),
                ));
            }
            sequence.status = status;
            sequence.updated_at = now;
            Ok(())
        })?;
        info!(sequence_id = %sequence_id, ?status, "Updated sequence status");
        Ok(sequence)
    }

    pub fn delete(&self, sequence_id: Uuid) -> OutreachResult<Sequence> {
        let sequence = self
            .repo
            .remove_sequence(sequence_id)
            .ok_or_else(|| OutreachError::not_found("Sequence", sequence_id))?;
        info!(sequence_id = %sequence_id, "Deleted sequence");
        Ok(sequence)
    }
}

fn renumber(steps: &mut [Step]) {
    for (i, step) in steps.iter_mut().enumerate() {
        step.order = i as u32;
    }
}
