//! Core error types
//!
//! Budget breaches are fatal for the environment that hit them; action-level
//! failures are surfaced back to the LM as an error turn and retried.

use thiserror::Error;

/// Result type for runtime operations
pub type RlmResult<T> = Result<T, RlmError>;

/// Which budget limit was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BudgetKind {
    #[serde(rename = "maxSteps")]
    MaxSteps,
    #[serde(rename = "maxSubCalls")]
    MaxSubCalls,
    #[serde(rename = "maxDepth")]
    MaxDepth,
    #[serde(rename = "maxPromptReadChars")]
    MaxPromptReadChars,
    #[serde(rename = "maxTimeMs")]
    MaxTimeMs,
}

impl BudgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetKind::MaxSteps => "maxSteps",
            BudgetKind::MaxSubCalls => "maxSubCalls",
            BudgetKind::MaxDepth => "maxDepth",
            BudgetKind::MaxPromptReadChars => "maxPromptReadChars",
            BudgetKind::MaxTimeMs => "maxTimeMs",
        }
    }
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the runtime
#[derive(Debug, Error)]
pub enum RlmError {
    #[error("budget exceeded: {kind} (limit {limit})")]
    BudgetExceeded { kind: BudgetKind, limit: u64 },

    /// Bad action shape, unknown op, or wrong field type
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// An action with valid shape failed during execution
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// No parseable JSON object in the model output
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("plan rejected: {0}")]
    Plan(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RlmError {
    pub fn budget(kind: BudgetKind, limit: u64) -> Self {
        Self::BudgetExceeded { kind, limit }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidAction(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::ActionFailed(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Recoverable errors become an `rlm_error` turn; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RlmError::InvalidAction(_) | RlmError::ActionFailed(_) | RlmError::MalformedOutput(_)
        )
    }
}
