use serde::Serialize;

/// Abstract error taxonomy for the delivery backbone (see design doc §7).
///
/// Handler/provider errors observed inside a dispatch loop are caught and
/// turned into an `Attempt`/`Execution` record — they never surface through
/// this type. Only management-layer calls return `Result<_, BackboneError>`.
#[derive(Debug, thiserror::Error)]
pub enum BackboneError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("rate limit exceeded for user {0}")]
    RateLimitExceeded(String),

    #[error("blocked by preferences: {0}")]
    PreferencesBlocked(String),

    #[error("no provider configured for channel {0}")]
    ProviderNotConfigured(String),

    #[error("provider authentication error: {0}")]
    ProviderAuthError(String),

    #[error("provider connection error: {0}")]
    ProviderConnectionError(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BackboneError {
    /// Status-code-equivalent hint for embedders that want to map a
    /// `BackboneError` onto their own HTTP ingress layer. This crate does
    /// not depend on an HTTP framework, so it returns a bare `u16` rather
    /// than an `IntoResponse` implementation.
    pub fn status_code_hint(&self) -> u16 {
        match self {
            BackboneError::NotFound(_) => 404,
            BackboneError::InvalidSchedule(_) => 400,
            BackboneError::InvalidPayload(_) => 422,
            BackboneError::RateLimitExceeded(_) => 429,
            BackboneError::PreferencesBlocked(_) => 422,
            BackboneError::ProviderNotConfigured(_) => 500,
            BackboneError::ProviderAuthError(_) => 401,
            BackboneError::ProviderConnectionError(_) => 502,
            BackboneError::Timeout(_) => 504,
            BackboneError::Cancelled => 499,
            BackboneError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BackboneError::NotFound(_) => "NOT_FOUND",
            BackboneError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            BackboneError::InvalidPayload(_) => "INVALID_PAYLOAD",
            BackboneError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            BackboneError::PreferencesBlocked(_) => "PREFERENCES_BLOCKED",
            BackboneError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            BackboneError::ProviderAuthError(_) => "PROVIDER_AUTH_ERROR",
            BackboneError::ProviderConnectionError(_) => "PROVIDER_CONNECTION_ERROR",
            BackboneError::Timeout(_) => "TIMEOUT",
            BackboneError::Cancelled => "CANCELLED",
            BackboneError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a failure of this kind should be retried by a dispatch loop.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            BackboneError::RateLimitExceeded(_)
                | BackboneError::ProviderConnectionError(_)
                | BackboneError::Timeout(_)
        )
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&BackboneError> for ErrorBody {
    fn from(err: &BackboneError) -> Self {
        ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type BackboneResult<T> = Result<T, BackboneError>;
