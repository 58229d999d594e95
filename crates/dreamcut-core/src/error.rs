use thiserror::Error;

/// Top-level error type for the DreamCut service.
#[derive(Debug, Error)]
pub enum DreamcutError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by a hosted model provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Queued work that never reached a terminal state. Retrying would
    /// enqueue (and bill) it again.
    #[error("Did not finish: {0}")]
    Stalled(String),
}

impl ModelError {
    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } | ModelError::Timeout(_) => true,
            ModelError::ApiRequest(msg) => msg.starts_with("HTTP 5") || msg.contains("connect"),
            ModelError::InvalidResponse(_)
            | ModelError::Auth(_)
            | ModelError::Unsupported(_)
            | ModelError::Stalled(_) => false,
        }
    }
}

/// Failure of one pipeline step.
///
/// Every step boundary returns `Result<T, StepError>`; the `{success, error}`
/// envelope seen by HTTP clients is derived from it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Provider failure: {0}")]
    Provider(#[from] ModelError),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Step skipped: {0}")]
    Skipped(String),
}

impl StepError {
    /// True when the failure came from rejected credentials at the provider.
    pub fn is_auth(&self) -> bool {
        matches!(self, StepError::Provider(ModelError::Auth(_)))
    }
}

impl From<DreamcutError> for StepError {
    fn from(err: DreamcutError) -> Self {
        match err {
            DreamcutError::Model(e) => StepError::Provider(e),
            DreamcutError::Step(e) => e,
            DreamcutError::Serialization(e) => StepError::MalformedOutput(e.to_string()),
            DreamcutError::Other(msg) => StepError::MalformedOutput(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, DreamcutError>;
