//! Background runner — polls due executions, hands them to the dispatcher
//! and reports the outcome back to the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outreach_core::config::SchedulerConfig;
use outreach_core::types::Lead;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock;
use crate::engine::{Claim, DispatchJob, SequenceEngine};
use crate::throttle::DailySendLimiter;
use crate::types::{Channel, ExecutionOutcome, RenderedContent};

/// Channel delivery capability. Returns the provider's delivery id.
///
/// Retries, if any, belong to the implementation; the runner reports a
/// single failure as the execution's terminal outcome.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        content: &RenderedContent,
        lead: &Lead,
    ) -> anyhow::Result<String>;
}

/// Dispatcher that only logs. Used when no channel provider is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(
        &self,
        channel: Channel,
        content: &RenderedContent,
        lead: &Lead,
    ) -> anyhow::Result<String> {
        let delivery_id = format!("log-{}", Uuid::new_v4());
        info!(
            ?channel,
            lead_id = %lead.id,
            subject = content.subject.as_deref().unwrap_or_default(),
            body_len = content.body.len(),
            delivery_id = %delivery_id,
            "Dispatched (log only)"
        );
        Ok(delivery_id)
    }
}

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub held: usize,
}

pub struct SequenceRunner {
    engine: SequenceEngine,
    dispatcher: Arc<dyn Dispatcher>,
    limiter: DailySendLimiter,
    config: SchedulerConfig,
}

impl SequenceRunner {
    pub fn new(
        engine: SequenceEngine,
        dispatcher: Arc<dyn Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            limiter: DailySendLimiter::new(),
            config,
        }
    }

    pub fn limiter(&self) -> &DailySendLimiter {
        &self.limiter
    }

    /// Runs a single poll: claims every due execution, defers the ones over
    /// their sequence's daily limit and dispatches the rest concurrently.
    pub async fn run_once(&self) -> RunSummary {
        let due = self.engine.due_executions(self.config.batch_size);
        let mut summary = RunSummary {
            due: due.len(),
            ..Default::default()
        };
        let timeout = Duration::from_millis(self.config.dispatch_timeout_ms);
        let mut tasks = JoinSet::new();

        for execution in due {
            match self.engine.claim_execution(execution.id) {
                Ok(Claim::Ready(job)) => {
                    let now = self.engine.now();
                    let sequence_id = job.execution.sequence_id;
                    if !self
                        .limiter
                        .try_acquire(sequence_id, job.settings.daily_limit, now)
                    {
                        let deferred = clock::next_day_opening(
                            now,
                            job.settings.send_window(),
                            job.settings.skip_weekends,
                        )
                        .and_then(|until| self.engine.defer_execution(job.execution.id, until));
                        match deferred {
                            Ok(_) => summary.deferred += 1,
                            Err(e) => {
                                warn!(execution_id = %job.execution.id, error = %e, "Failed to defer execution")
                            }
                        }
                        continue;
                    }
                    let engine = self.engine.clone();
                    let dispatcher = self.dispatcher.clone();
                    tasks.spawn(dispatch(engine, dispatcher, job, timeout));
                }
                Ok(Claim::Inactive(execution)) => {
                    match self.engine.complete_execution(
                        execution.id,
                        ExecutionOutcome::Skipped,
                        Some("enrollment not active".to_string()),
                    ) {
                        Ok(_) => summary.skipped += 1,
                        Err(e) => {
                            warn!(execution_id = %execution.id, error = %e, "Failed to skip execution")
                        }
                    }
                }
                Ok(Claim::Held) => summary.held += 1,
                Ok(Claim::Gone) => {
                    debug!(execution_id = %execution.id, "Execution claimed elsewhere")
                }
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "Failed to claim execution")
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ExecutionOutcome::Sent) => summary.sent += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Dispatch outcome task panicked");
                }
            }
        }
        summary
    }

    /// Polls every `poll_interval_ms` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_interval_ms = self.config.poll_interval_ms,
                dispatch_timeout_ms = self.config.dispatch_timeout_ms,
                batch_size = self.config.batch_size,
                "Sequence runner started"
            );
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
            loop {
                interval.tick().await;
                let summary = self.run_once().await;
                if summary.due > 0 {
                    info!(
                        due = summary.due,
                        sent = summary.sent,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        deferred = summary.deferred,
                        held = summary.held,
                        "Runner poll complete"
                    );
                }
            }
        })
    }
}

/// Sends one claimed execution, bounded by `timeout`, and records the outcome.
async fn dispatch(
    engine: SequenceEngine,
    dispatcher: Arc<dyn Dispatcher>,
    job: DispatchJob,
    timeout: Duration,
) -> ExecutionOutcome {
    let execution_id = job.execution.id;
    let DispatchJob {
        execution, lead, ..
    } = job;
    let channel = execution.channel;

    // Own task, so a panicking provider comes back as a JoinError.
    let mut send =
        tokio::spawn(async move { dispatcher.send(channel, &execution.content, &lead).await });
    let sent = tokio::time::timeout(timeout, &mut send).await;

    let (outcome, detail) = match sent {
        Ok(Ok(Ok(delivery_id))) => (ExecutionOutcome::Sent, Some(delivery_id)),
        Ok(Ok(Err(e))) => {
            error!(execution_id = %execution_id, error = %e, "Dispatch failed");
            metrics::counter!("sequences.dispatch.failures").increment(1);
            (ExecutionOutcome::Failed, Some(e.to_string()))
        }
        Ok(Err(e)) => {
            error!(execution_id = %execution_id, error = %e, "Dispatch task panicked");
            metrics::counter!("sequences.dispatch.failures").increment(1);
            (ExecutionOutcome::Failed, Some("dispatch panicked".to_string()))
        }
        Err(_) => {
            send.abort();
            error!(execution_id = %execution_id, timeout_ms = timeout.as_millis() as u64, "Dispatch timed out");
            metrics::counter!("sequences.dispatch.failures").increment(1);
            (
                ExecutionOutcome::Failed,
                Some(format!("dispatch timed out after {}ms", timeout.as_millis())),
            )
        }
    };

    if let Err(e) = engine.complete_execution(execution_id, outcome, detail) {
        error!(execution_id = %execution_id, error = %e, "Failed to record dispatch outcome");
    }
    outcome
}
