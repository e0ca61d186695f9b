//! Engine facade exposed to the upstream conversational layer.
//!
//! Owns the spend path: atomic debit, single submission to the render
//! service, compensating refund on submission failure, and exactly one
//! supervised poller per accepted job. Payment entry points delegate
//! to the reconciler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::EngineError;
use crate::ledger::LedgerStore;
use crate::notifier::Notifier;
use crate::observability::metrics;
use crate::payments::PaymentReconciler;
use crate::poller::JobPoller;
use crate::pricing::TokenPackage;
use crate::render_api::{CreateTaskRequest, RenderClient};
use crate::task_registry::TaskRegistry;
use crate::types::{
    AccountId, CreditOutcome, GenerationParams, InstantPaymentEvent, Job, JobHandle,
};

pub struct VideoEngine {
    ledger: Arc<dyn LedgerStore>,
    render: Arc<dyn RenderClient>,
    notifier: Arc<dyn Notifier>,
    reconciler: Arc<PaymentReconciler>,
    tasks: Arc<TaskRegistry>,
    config: Config,
}

impl VideoEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        render: Arc<dyn RenderClient>,
        notifier: Arc<dyn Notifier>,
        reconciler: Arc<PaymentReconciler>,
        tasks: Arc<TaskRegistry>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            render,
            notifier,
            reconciler,
            tasks,
            config,
        }
    }

    /// Debit `cost`, submit one render task, and start its poller.
    ///
    /// Submission failure (transport error, rejected status, missing
    /// task id) refunds the cost exactly once and surfaces
    /// [`EngineError::SubmissionRejected`]; the caller must not retry
    /// automatically.
    pub async fn submit_job(
        &self,
        account: AccountId,
        params: GenerationParams,
        cost: u64,
    ) -> Result<JobHandle, EngineError> {
        let debited = self
            .ledger
            .debit_if_sufficient(account, cost)
            .await
            .map_err(|e| EngineError::network_with_source("ledger debit failed", e))?;

        if !debited {
            let available = self.ledger.balance(account).await.unwrap_or(0);
            info!(account, cost, available, "debit refused");
            return Err(EngineError::InsufficientBalance {
                needed: cost,
                available,
            });
        }

        metrics().increment_counter("jobs_submitted_total");
        let request = CreateTaskRequest::from_params(&params, self.config.remove_watermark);

        let task_id = match self.render.create_task(&request).await {
            Ok(task_id) => task_id,
            Err(e) => {
                // Hard failure: compensate the debit before surfacing.
                warn!(account, cost, error = %e, "createTask failed, refunding");
                metrics().increment_counter("submissions_rejected_total");
                self.refund_submission(account, cost).await;
                self.notify(
                    account,
                    "The render job could not be created. Your tokens were returned.",
                )
                .await;
                return Err(EngineError::submission_rejected(e.to_string()));
            }
        };

        let job = Job {
            task_id: task_id.clone(),
            owner: account,
            cost,
            params,
            submitted_at: Utc::now(),
        };

        info!(task_id = %task_id, account, cost, "render task accepted");

        let poller = JobPoller::new(
            Arc::clone(&self.render),
            Arc::clone(&self.ledger),
            Arc::clone(&self.notifier),
            self.config.clone(),
        );
        let key = format!("job:{task_id}");
        if !self
            .tasks
            .spawn_unique(&key, async move { poller.run(job).await })
        {
            // The provider handed out a task id we already track.
            warn!(task_id = %task_id, "job poller already running");
        }
        metrics().set_gauge("active_pollers", self.tasks.active_count() as u64);

        Ok(JobHandle { task_id })
    }

    /// Point-in-time balance read.
    pub async fn get_balance(&self, account: AccountId) -> Result<u64, EngineError> {
        self.ledger
            .balance(account)
            .await
            .map_err(|e| EngineError::network_with_source("ledger read failed", e))
    }

    /// Apply one instant-confirm payment event; duplicates are no-ops.
    pub async fn confirm_instant_payment(
        &self,
        event: &InstantPaymentEvent,
    ) -> Result<CreditOutcome, EngineError> {
        self.reconciler.confirm_instant_payment(event).await
    }

    /// Initiate a poll-confirm payment; polling starts automatically.
    pub async fn initiate_poll_payment(
        &self,
        account: AccountId,
        package: TokenPackage,
    ) -> Result<String, EngineError> {
        self.reconciler.initiate_poll_payment(account, package).await
    }

    /// Abort every in-flight poller. Balances already settled stay
    /// settled; pending jobs are audited through the registry.
    pub fn shutdown(&self) {
        self.tasks.abort_all();
    }

    async fn refund_submission(&self, account: AccountId, cost: u64) {
        match self.ledger.credit(account, cost).await {
            Ok(()) => {
                metrics().increment_counter("jobs_refunded_total");
                metrics().add_to_counter("tokens_refunded_total", cost);
            }
            Err(e) => {
                error!(account, cost, error = %e, "REFUND FAILED");
            }
        }
    }

    async fn notify(&self, account: AccountId, text: &str) {
        if let Err(e) = self.notifier.send_message(account, text).await {
            warn!(account, error = %e, "notification delivery failed");
        }
    }
}
