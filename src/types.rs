use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable external user identifier (chat id of the owning account).
pub type AccountId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// Text-to-video
    Text,
    /// Image-to-video; `GenerationParams::image_url` must be set
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Standard,
    Pro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Std,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Duration {
    #[serde(rename = "10")]
    Sec10,
    #[serde(rename = "15")]
    Sec15,
}

impl Duration {
    pub fn seconds(&self) -> u32 {
        match self {
            Duration::Sec10 => 10,
            Duration::Sec15 => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl Orientation {
    pub fn label(&self) -> &'static str {
        match self {
            Orientation::Portrait => "9:16",
            Orientation::Landscape => "16:9",
        }
    }
}

/// Normalized generation parameters collected by the upstream layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub kind: PromptKind,
    pub tier: ModelTier,
    /// Only meaningful for `ModelTier::Pro`
    pub quality: Option<Quality>,
    pub duration: Duration,
    pub orientation: Orientation,
    pub image_url: Option<String>,
}

/// Opaque handle for an accepted render job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub task_id: String,
}

/// One in-flight render request, created the instant the provider
/// returns a task id. `cost` has already been debited.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub owner: AccountId,
    pub cost: u64,
    pub params: GenerationParams,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentRail {
    InstantConfirm,
    PollConfirm,
}

/// One initiated top-up on the poll-confirm rail.
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub payment_id: String,
    pub owner: AccountId,
    pub tokens_to_credit: u64,
    /// Declared price in whole currency units, for mismatch auditing
    pub declared_amount: u64,
    pub rail: PaymentRail,
    pub initiated_at: DateTime<Utc>,
}

/// Push-style confirmation delivered by the instant-confirm rail.
/// The provider may redeliver it; crediting is gated by charge id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantPaymentEvent {
    pub charge_id: String,
    pub owner: AccountId,
    pub tokens_to_credit: u64,
    /// Amount the provider says was paid, in the rail's own unit
    pub total_amount: u64,
    pub currency: String,
    pub invoice_payload: String,
}

/// Result of applying an instant-confirm event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { tokens: u64 },
    AlreadyApplied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_and_orientation_mapping() {
        assert_eq!(Duration::Sec10.seconds(), 10);
        assert_eq!(Duration::Sec15.seconds(), 15);
        assert_eq!(Orientation::Portrait.label(), "9:16");
        assert_eq!(Orientation::Landscape.label(), "16:9");
    }

    #[test]
    fn orientation_serde_uses_ratio_labels() {
        let s = serde_json::to_string(&Orientation::Portrait).unwrap();
        assert_eq!(s, "\"9:16\"");
        let o: Orientation = serde_json::from_str("\"16:9\"").unwrap();
        assert_eq!(o, Orientation::Landscape);
    }
}
