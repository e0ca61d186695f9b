//! Payment reconciliation for both top-up rails.
//!
//! One contract — observe a payment, credit tokens exactly once —
//! with two strategies behind it: the instant-confirm rail delivers a
//! push event that may be redelivered, the poll-confirm rail requires
//! actively polling a status endpoint until a terminal state or the
//! budget runs out. All crediting is gated through the idempotency
//! registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::EngineError;
use crate::idempotency::IdempotencyStore;
use crate::ledger::LedgerStore;
use crate::notifier::Notifier;
use crate::observability::metrics;
use crate::pricing::{TokenPackage, INSTANT_PACKAGES};
use crate::retry::{poll_until, PollSchedule, PollStep};
use crate::task_registry::TaskRegistry;
use crate::types::{AccountId, CreditOutcome, InstantPaymentEvent, PaymentRail, PendingPayment};

/// Terminal and non-terminal states of a poll-confirm payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded { amount_paid: Option<String> },
    Canceled,
    Expired,
}

#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub redirect_url: String,
}

/// External poll-confirm payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        amount: &str,
        currency: &str,
        metadata: Value,
    ) -> Result<CreatedPayment>;

    async fn find_payment(&self, payment_id: &str) -> Result<PaymentStatus>;
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    amount: &'a str,
    currency: &'a str,
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    #[serde(rename = "paymentId")]
    payment_id: String,
    #[serde(rename = "redirectUrl")]
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct FindPaymentResponse {
    status: String,
    #[serde(rename = "amountPaid")]
    amount_paid: Option<String>,
}

/// HTTP client for the poll-confirm gateway.
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building payment HTTP client")?;
        Ok(Self {
            http,
            base_url: config.payment_api_base.trim_end_matches('/').to_string(),
            token: config.payment_api_token.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment(
        &self,
        amount: &str,
        currency: &str,
        metadata: Value,
    ) -> Result<CreatedPayment> {
        let url = format!("{}/payments", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CreatePaymentRequest {
                amount,
                currency,
                metadata,
            })
            .send()
            .await
            .context("createPayment request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("createPayment returned {}", resp.status()));
        }

        let body: CreatePaymentResponse = resp
            .json()
            .await
            .context("createPayment returned malformed body")?;
        Ok(CreatedPayment {
            payment_id: body.payment_id,
            redirect_url: body.redirect_url,
        })
    }

    async fn find_payment(&self, payment_id: &str) -> Result<PaymentStatus> {
        let url = format!("{}/payments/{}", self.base_url, payment_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("findPayment request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("findPayment returned {}", resp.status()));
        }

        let body: FindPaymentResponse = resp
            .json()
            .await
            .context("findPayment returned malformed body")?;
        Ok(match body.status.as_str() {
            "pending" => PaymentStatus::Pending,
            "succeeded" => PaymentStatus::Succeeded {
                amount_paid: body.amount_paid,
            },
            "canceled" => PaymentStatus::Canceled,
            "expired" => PaymentStatus::Expired,
            other => {
                warn!(payment_id, status = other, "unknown payment status");
                PaymentStatus::Pending
            }
        })
    }
}

/// Applies payment observations to the ledger, exactly once per
/// external identifier.
pub struct PaymentReconciler {
    ledger: Arc<dyn LedgerStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    tasks: Arc<TaskRegistry>,
    config: Config,
}

impl PaymentReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        tasks: Arc<TaskRegistry>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            idempotency,
            gateway,
            notifier,
            tasks,
            config,
        }
    }

    /// Apply one instant-confirm event. Redeliveries are no-ops.
    pub async fn confirm_instant_payment(
        &self,
        event: &InstantPaymentEvent,
    ) -> Result<CreditOutcome, EngineError> {
        let fresh = self
            .idempotency
            .record_if_absent(&event.charge_id, event.tokens_to_credit)
            .await
            .map_err(|e| EngineError::network_with_source("idempotency check failed", e))?;

        if !fresh {
            metrics().increment_counter("duplicate_payment_events_total");
            info!(
                charge_id = %event.charge_id,
                account = event.owner,
                "duplicate instant payment event ignored"
            );
            self.notify(
                event.owner,
                "This payment was already credited, nothing new to apply.",
            )
            .await;
            return Ok(CreditOutcome::AlreadyApplied);
        }

        if let Some(pkg) = INSTANT_PACKAGES
            .iter()
            .find(|p| p.tokens == event.tokens_to_credit)
        {
            if pkg.price != event.total_amount {
                warn!(
                    charge_id = %event.charge_id,
                    declared = pkg.price,
                    observed = event.total_amount,
                    currency = %event.currency,
                    "instant payment amount mismatch; crediting declared tokens anyway"
                );
            }
        }

        if let Err(e) = self.ledger.credit(event.owner, event.tokens_to_credit).await {
            // Paid but not credited; this must never pass silently.
            error!(
                charge_id = %event.charge_id,
                account = event.owner,
                tokens = event.tokens_to_credit,
                error = %e,
                "crediting instant payment FAILED"
            );
            return Err(EngineError::network_with_source("ledger credit failed", e));
        }

        metrics().increment_counter("payments_credited_total");
        metrics().add_to_counter("tokens_credited_total", event.tokens_to_credit);
        info!(
            charge_id = %event.charge_id,
            account = event.owner,
            tokens = event.tokens_to_credit,
            "instant payment credited"
        );
        self.notify(
            event.owner,
            &format!(
                "Balance topped up: +{} tokens. Thank you!",
                event.tokens_to_credit
            ),
        )
        .await;

        Ok(CreditOutcome::Applied {
            tokens: event.tokens_to_credit,
        })
    }

    /// Initiate a poll-confirm payment and start its background
    /// reconciliation task. Returns the provider redirect URL.
    pub async fn initiate_poll_payment(
        self: &Arc<Self>,
        account: AccountId,
        package: TokenPackage,
    ) -> Result<String, EngineError> {
        let amount = format!("{}.00", package.price);
        let metadata = json!({ "account": account, "tokens": package.tokens });

        let created = self
            .gateway
            .create_payment(&amount, &self.config.payment_currency, metadata)
            .await
            .map_err(|e| EngineError::network_with_source("createPayment failed", e))?;

        let pending = PendingPayment {
            payment_id: created.payment_id.clone(),
            owner: account,
            tokens_to_credit: package.tokens,
            declared_amount: package.price,
            rail: PaymentRail::PollConfirm,
            initiated_at: Utc::now(),
        };

        metrics().increment_counter("payments_initiated_total");
        info!(
            payment_id = %pending.payment_id,
            account,
            tokens = package.tokens,
            "poll-confirm payment initiated"
        );

        let key = format!("payment:{}", pending.payment_id);
        let reconciler = Arc::clone(self);
        if !self
            .tasks
            .spawn_unique(&key, async move { reconciler.poll_payment(pending).await })
        {
            warn!(key, "payment poller already running");
        }
        metrics().set_gauge("active_pollers", self.tasks.active_count() as u64);

        Ok(created.redirect_url)
    }

    fn schedule(&self) -> PollSchedule {
        PollSchedule::new(
            Duration::from_millis(self.config.payment_poll_interval_ms),
            self.config.payment_poll_max_attempts,
        )
    }

    /// Background loop for one poll-confirm payment. Exactly one exit:
    /// credit on success, nothing on cancel/expire/timeout.
    async fn poll_payment(&self, pending: PendingPayment) {
        let schedule = self.schedule();
        let payment_id = pending.payment_id.clone();

        let outcome = poll_until(&schedule, |attempt| {
            let gateway = Arc::clone(&self.gateway);
            let payment_id = payment_id.clone();
            async move {
                match gateway.find_payment(&payment_id).await {
                    Ok(PaymentStatus::Pending) => PollStep::Retry,
                    Ok(terminal) => PollStep::Done(terminal),
                    Err(e) => {
                        debug!(payment_id = %payment_id, attempt, error = %e, "findPayment transient error");
                        PollStep::Retry
                    }
                }
            }
        })
        .await;

        match outcome {
            Some(PaymentStatus::Succeeded { amount_paid }) => {
                self.apply_poll_success(&pending, amount_paid.as_deref()).await;
            }
            Some(PaymentStatus::Canceled) => {
                metrics().increment_counter("payments_not_completed_total");
                info!(payment_id = %pending.payment_id, "payment canceled, no credit");
                self.notify(
                    pending.owner,
                    "The payment was canceled. No tokens were credited.",
                )
                .await;
            }
            Some(PaymentStatus::Expired) => {
                metrics().increment_counter("payments_not_completed_total");
                info!(payment_id = %pending.payment_id, "payment expired, no credit");
                self.notify(
                    pending.owner,
                    "The payment expired. No tokens were credited.",
                )
                .await;
            }
            Some(PaymentStatus::Pending) | None => {
                metrics().increment_counter("payments_poll_timeout_total");
                warn!(payment_id = %pending.payment_id, "payment polling budget exhausted");
                self.notify(
                    pending.owner,
                    "Payment confirmation timed out. If you completed the payment it may still be reconciled manually.",
                )
                .await;
            }
        }
    }

    async fn apply_poll_success(&self, pending: &PendingPayment, amount_paid: Option<&str>) {
        let declared = format!("{}.00", pending.declared_amount);
        if let Some(paid) = amount_paid {
            let matches = match (paid.parse::<f64>(), declared.parse::<f64>()) {
                (Ok(a), Ok(b)) => (a - b).abs() < 0.005,
                _ => paid == declared,
            };
            if !matches {
                warn!(
                    payment_id = %pending.payment_id,
                    declared = %declared,
                    observed = %paid,
                    "payment amount mismatch; crediting declared tokens anyway"
                );
            }
        }

        let fresh = match self
            .idempotency
            .record_if_absent(&pending.payment_id, pending.tokens_to_credit)
            .await
        {
            Ok(fresh) => fresh,
            Err(e) => {
                error!(payment_id = %pending.payment_id, error = %e, "idempotency check failed");
                return;
            }
        };
        if !fresh {
            metrics().increment_counter("duplicate_payment_events_total");
            info!(payment_id = %pending.payment_id, "payment already credited");
            return;
        }

        if let Err(e) = self
            .ledger
            .credit(pending.owner, pending.tokens_to_credit)
            .await
        {
            error!(
                payment_id = %pending.payment_id,
                account = pending.owner,
                tokens = pending.tokens_to_credit,
                error = %e,
                "crediting poll-confirm payment FAILED"
            );
            return;
        }

        metrics().increment_counter("payments_credited_total");
        metrics().add_to_counter("tokens_credited_total", pending.tokens_to_credit);
        info!(
            payment_id = %pending.payment_id,
            account = pending.owner,
            tokens = pending.tokens_to_credit,
            "poll-confirm payment credited"
        );
        self.notify(
            pending.owner,
            &format!(
                "Balance topped up: +{} tokens. Thank you!",
                pending.tokens_to_credit
            ),
        )
        .await;
    }

    async fn notify(&self, account: AccountId, text: &str) {
        if let Err(e) = self.notifier.send_message(account, text).await {
            warn!(account, error = %e, "notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotency;
    use crate::ledger::InMemoryLedger;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(AccountId, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_message(&self, account: AccountId, text: &str) -> Result<()> {
            self.messages.lock().push((account, text.to_string()));
            Ok(())
        }

        async fn send_video(&self, _: AccountId, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct UnusedGateway;

    #[async_trait]
    impl PaymentGateway for UnusedGateway {
        async fn create_payment(&self, _: &str, _: &str, _: Value) -> Result<CreatedPayment> {
            anyhow::bail!("not used")
        }

        async fn find_payment(&self, _: &str) -> Result<PaymentStatus> {
            anyhow::bail!("not used")
        }
    }

    fn reconciler(
        ledger: Arc<InMemoryLedger>,
        notifier: Arc<RecordingNotifier>,
    ) -> PaymentReconciler {
        PaymentReconciler::new(
            ledger,
            Arc::new(InMemoryIdempotency::new()),
            Arc::new(UnusedGateway),
            notifier,
            Arc::new(TaskRegistry::new()),
            Config::default(),
        )
    }

    fn event(charge_id: &str) -> InstantPaymentEvent {
        InstantPaymentEvent {
            charge_id: charge_id.to_string(),
            owner: 11,
            tokens_to_credit: 100,
            total_amount: 60,
            currency: "XTR".into(),
            invoice_payload: "stars_60".into(),
        }
    }

    #[tokio::test]
    async fn instant_event_credits_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let rec = reconciler(ledger.clone(), notifier.clone());

        let out = rec.confirm_instant_payment(&event("ch_1")).await.unwrap();
        assert_eq!(out, CreditOutcome::Applied { tokens: 100 });
        assert_eq!(ledger.balance(11).await.unwrap(), 100);

        // Redelivery of the same charge id is a no-op.
        let out = rec.confirm_instant_payment(&event("ch_1")).await.unwrap();
        assert_eq!(out, CreditOutcome::AlreadyApplied);
        assert_eq!(ledger.balance(11).await.unwrap(), 100);

        // Both observations produced a user-visible message.
        assert_eq!(notifier.messages.lock().len(), 2);
    }

    #[tokio::test]
    async fn instant_amount_mismatch_still_credits_declared() {
        let ledger = Arc::new(InMemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let rec = reconciler(ledger.clone(), notifier);

        let mut ev = event("ch_2");
        ev.total_amount = 55; // provider reports a different paid amount
        let out = rec.confirm_instant_payment(&ev).await.unwrap();
        assert_eq!(out, CreditOutcome::Applied { tokens: 100 });
        assert_eq!(ledger.balance(11).await.unwrap(), 100);
    }
}
