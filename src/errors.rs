//! Central error taxonomy for the engine.
//!
//! Every provider/transport failure is converted into one of these
//! variants at the Submitter/Poller/Reconciler boundary; raw reqwest
//! errors never reach the user-facing layer.

use thiserror::Error;

/// High-level error categories for metrics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Debit refused, no side effect
    Balance,
    /// Render job could not be created
    Submission,
    /// Render provider errors (transient or terminal)
    Provider,
    /// Payment rail errors and duplicates
    Payment,
    /// Configuration errors
    Configuration,
    /// Network/transport errors
    Network,
}

impl ErrorCategory {
    /// Metric label for this category.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ErrorCategory::Balance => "balance",
            ErrorCategory::Submission => "submission",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Payment => "payment",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
        }
    }
}

/// Standardized engine errors with context and categorization.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },

    #[error("submission rejected: {reason}")]
    SubmissionRejected { reason: String },

    /// Polling continues on these; surfaced only if the budget runs out.
    #[error("provider transient error: {message}")]
    ProviderTransient { message: String },

    #[error("generation failed: {reason}")]
    ProviderTerminalFailure { reason: String },

    #[error("polling budget exhausted for {subject}")]
    PollTimeout { subject: String },

    #[error("payment {charge_id} already applied")]
    DuplicatePaymentEvent { charge_id: String },

    #[error("payment not completed: {status}")]
    PaymentNotCompleted { status: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("network error: {message}")]
    Network {
        message: String,
        cause: Option<anyhow::Error>,
    },
}

impl EngineError {
    /// Get the error category for metrics/classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::InsufficientBalance { .. } => ErrorCategory::Balance,
            EngineError::SubmissionRejected { .. } => ErrorCategory::Submission,
            EngineError::ProviderTransient { .. } => ErrorCategory::Provider,
            EngineError::ProviderTerminalFailure { .. } => ErrorCategory::Provider,
            EngineError::PollTimeout { .. } => ErrorCategory::Provider,
            EngineError::DuplicatePaymentEvent { .. } => ErrorCategory::Payment,
            EngineError::PaymentNotCompleted { .. } => ErrorCategory::Payment,
            EngineError::Configuration { .. } => ErrorCategory::Configuration,
            EngineError::Network { .. } => ErrorCategory::Network,
        }
    }

    pub fn submission_rejected<S: Into<String>>(reason: S) -> Self {
        Self::SubmissionRejected {
            reason: reason.into(),
        }
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::ProviderTransient {
            message: message.into(),
        }
    }

    pub fn terminal_failure<S: Into<String>>(reason: S) -> Self {
        Self::ProviderTerminalFailure {
            reason: reason.into(),
        }
    }

    pub fn timeout<S: Into<String>>(subject: S) -> Self {
        Self::PollTimeout {
            subject: subject.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
            cause: None,
        }
    }

    pub fn network_with_source<S: Into<String>>(message: S, cause: anyhow::Error) -> Self {
        Self::Network {
            message: message.into(),
            cause: Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categorization() {
        let err = EngineError::InsufficientBalance {
            needed: 30,
            available: 10,
        };
        assert_eq!(err.category(), ErrorCategory::Balance);
        assert_eq!(err.category().metric_label(), "balance");

        let err = EngineError::submission_rejected("createTask returned 502");
        assert_eq!(err.category(), ErrorCategory::Submission);
        assert!(err.to_string().contains("createTask returned 502"));

        let err = EngineError::timeout("job abc");
        assert_eq!(err.category(), ErrorCategory::Provider);

        let err = EngineError::DuplicatePaymentEvent {
            charge_id: "ch_1".into(),
        };
        assert_eq!(err.category().metric_label(), "payment");
    }
}
