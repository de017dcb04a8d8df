// Cron-driven job runner with distributed execution tokens
//
// Every replica runs the same loop. Before running an occurrence, the replica
// inserts a (job_name, scheduled_time) token; only the insert winner runs it.
//
// Loop states:
//   WaitingForOccurrence -> AttemptingToken -> (Skipped | Running) -> WaitingForOccurrence
//   Stopped is reachable from anywhere via the shutdown token.

use super::token::{ScheduleTokenProvider, TokenOutcome};
use crate::clock::Clock;
use crate::error::{AppResult, SchedulerError};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct CronJob<F> {
    name: String,
    expression: String,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn ScheduleTokenProvider>,
    work: F,
}

impl<F, Fut> CronJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    /// Parse the schedule up front; a bad expression never starts a loop.
    pub fn new(
        name: impl Into<String>,
        expression: &str,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn ScheduleTokenProvider>,
        work: F,
    ) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.into(),
            expression: expression.to_string(),
            schedule,
            clock,
            tokens,
            work,
        })
    }

    /// Spawn the loop in the background
    pub fn start(self) -> JobHandle {
        let shutdown = CancellationToken::new();
        let name = self.name.clone();

        info!(job = %name, cron = %self.expression, "⏰ Scheduled job started");

        let loop_shutdown = shutdown.clone();
        let task = tokio::spawn(async move { self.run(loop_shutdown).await });

        JobHandle {
            name,
            shutdown,
            task,
        }
    }

    async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let now = self.clock.now();
            let Some(scheduled_for) = self.schedule.after(&now).next() else {
                error!(
                    job = %self.name,
                    cron = %self.expression,
                    "Cron expression has no future occurrence, job will not run again"
                );
                break;
            };

            let delay = (scheduled_for - now).to_std().unwrap_or(Duration::ZERO);
            debug!(job = %self.name, %scheduled_for, delay_ms = delay.as_millis() as u64, "Waiting for next occurrence");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self
                .tokens
                .try_acquire(&self.name, scheduled_for, self.clock.now())
                .await
            {
                Ok(TokenOutcome::Acquired) => {}
                Ok(TokenOutcome::AlreadyClaimed) => {
                    debug!(job = %self.name, %scheduled_for, "Occurrence already claimed by another replica, skipping");
                    continue;
                }
                Err(e) => {
                    error!(job = %self.name, %scheduled_for, error = %e, "❌ Failed to acquire execution token");
                    continue;
                }
            }

            info!(job = %self.name, %scheduled_for, "▶️  Running scheduled job");
            let started = Instant::now();
            let result = (self.work)(shutdown.child_token()).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!(job = %self.name, %scheduled_for, elapsed_ms, "✅ Scheduled job completed");
                }
                Err(e) if e.is_cancelled() && shutdown.is_cancelled() => {
                    info!(job = %self.name, %scheduled_for, elapsed_ms, "Scheduled job cancelled during shutdown");
                    break;
                }
                Err(e) if e.is_cancelled() => {
                    warn!(job = %self.name, %scheduled_for, elapsed_ms, "Scheduled job cancelled outside shutdown, continuing");
                }
                Err(e) => {
                    error!(job = %self.name, %scheduled_for, elapsed_ms, error = %e, "❌ Scheduled job failed");
                }
            }
        }

        info!(job = %self.name, "⏹️  Scheduled job stopped");
    }
}

/// Handle to a running job loop
pub struct JobHandle {
    name: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait up to `timeout` for the in-flight tick to return.
    ///
    /// Returns false if the loop had to be aborted.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.shutdown.cancel();

        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(job = %self.name, error = %e, "Scheduled job task panicked");
                true
            }
            Err(_) => {
                warn!(job = %self.name, timeout_ms = timeout.as_millis() as u64, "Scheduled job did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }
}
