//! Per-job background polling to a terminal state.
//!
//! Exactly one poller exists per accepted job, and it is the only
//! component allowed to mark the job terminal. Whatever happens inside
//! the loop, the job's cost is settled exactly once: delivered as
//! spent on success, refunded on failure/timeout/unexpected error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ledger::LedgerStore;
use crate::notifier::Notifier;
use crate::observability::{metrics, CorrelationId};
use crate::render_api::{classify, RenderClient, TaskStatus};
use crate::retry::{poll_until, PollSchedule, PollStep};
use crate::types::Job;

/// Terminal outcome of one poll loop, before it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Succeeded { asset_url: Option<String> },
    Failed { reason: Option<String> },
    TimedOut,
}

pub struct JobPoller {
    render: Arc<dyn RenderClient>,
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

impl JobPoller {
    pub fn new(
        render: Arc<dyn RenderClient>,
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            render,
            ledger,
            notifier,
            config,
        }
    }

    fn schedule(&self) -> PollSchedule {
        PollSchedule::new(
            Duration::from_millis(self.config.job_poll_interval_ms),
            self.config.job_poll_max_attempts,
        )
        .with_jitter(self.config.job_poll_interval_ms / 16)
    }

    /// Drive `job` to its terminal state and apply the outcome once.
    pub async fn run(&self, job: Job) {
        let correlation_id = CorrelationId::new();
        info!(
            task_id = %job.task_id,
            account = job.owner,
            cost = job.cost,
            %correlation_id,
            "job poller started"
        );

        let terminal = self.poll_loop(&job).await;
        self.apply(&job, terminal, &correlation_id).await;
    }

    async fn poll_loop(&self, job: &Job) -> Terminal {
        let schedule = self.schedule();
        let task_id = job.task_id.clone();

        let outcome = poll_until(&schedule, |attempt| {
            let render = Arc::clone(&self.render);
            let task_id = task_id.clone();
            async move {
                let record = match render.record_info(&task_id).await {
                    Ok(record) => record,
                    Err(e) => {
                        // Transient; consumes budget only.
                        debug!(task_id = %task_id, attempt, error = %e, "recordInfo transient error");
                        return PollStep::Retry;
                    }
                };

                match classify(&record) {
                    TaskStatus::InProgress => {
                        debug!(task_id = %task_id, attempt, "job still in progress");
                        PollStep::Retry
                    }
                    TaskStatus::Succeeded { asset_url } => {
                        PollStep::Done(Terminal::Succeeded { asset_url })
                    }
                    TaskStatus::Failed { reason } => PollStep::Done(Terminal::Failed { reason }),
                }
            }
        })
        .await;

        outcome.unwrap_or(Terminal::TimedOut)
    }

    /// Apply the terminal outcome. Single exit per job: deliver the
    /// asset XOR refund the cost, plus exactly one notification.
    async fn apply(&self, job: &Job, terminal: Terminal, correlation_id: &CorrelationId) {
        match terminal {
            Terminal::Succeeded { asset_url } => {
                metrics().increment_counter("jobs_succeeded_total");
                info!(
                    task_id = %job.task_id,
                    account = job.owner,
                    %correlation_id,
                    has_url = asset_url.is_some(),
                    "job succeeded"
                );

                let headline = format!(
                    "Your video is ready! {} s, {}",
                    job.params.duration.seconds(),
                    job.params.orientation.label()
                );

                match asset_url {
                    Some(url) => {
                        if let Err(e) = self.notifier.send_video(job.owner, &url, &headline).await {
                            warn!(task_id = %job.task_id, error = %e, "video delivery failed");
                        }
                    }
                    None => {
                        // Provider claims completion; cost stays consumed.
                        warn!(task_id = %job.task_id, "success reported but no asset URL found");
                        self.notify(
                            job,
                            "The video finished rendering, but no download link was returned.",
                        )
                        .await;
                    }
                }
            }
            Terminal::Failed { reason } => {
                metrics().increment_counter("jobs_failed_total");
                let reason = reason.unwrap_or_else(|| "generation failed".to_string());
                warn!(
                    task_id = %job.task_id,
                    account = job.owner,
                    %correlation_id,
                    reason = %reason,
                    "job failed, refunding"
                );
                self.refund(job).await;
                self.notify(
                    job,
                    &format!("Generation failed: {reason}. Your tokens were returned."),
                )
                .await;
            }
            Terminal::TimedOut => {
                metrics().increment_counter("jobs_timed_out_total");
                warn!(
                    task_id = %job.task_id,
                    account = job.owner,
                    %correlation_id,
                    "job polling budget exhausted, refunding"
                );
                self.refund(job).await;
                self.notify(
                    job,
                    "The render timed out. Your tokens were returned.",
                )
                .await;
            }
        }
    }

    async fn refund(&self, job: &Job) {
        match self.ledger.credit(job.owner, job.cost).await {
            Ok(()) => {
                metrics().increment_counter("jobs_refunded_total");
                metrics().add_to_counter("tokens_refunded_total", job.cost);
            }
            Err(e) => {
                // Real token loss; must be loud but must not take the
                // process down with it.
                error!(
                    task_id = %job.task_id,
                    account = job.owner,
                    cost = job.cost,
                    error = %e,
                    "REFUND FAILED"
                );
            }
        }
    }

    async fn notify(&self, job: &Job, text: &str) {
        if let Err(e) = self.notifier.send_message(job.owner, text).await {
            warn!(task_id = %job.task_id, error = %e, "notification delivery failed");
        }
    }
}
