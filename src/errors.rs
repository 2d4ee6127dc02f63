//! Crate-wide error hierarchy for the context retrieval engine.
//!
//! Goals:
//! - Single root `Error` for the public entry point and for `InvariantViolation`-class bugs.
//! - Index-service-aware HTTP mapping (401→Unauthorized, 429→RateLimited, 5xx→Server, etc.).
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.
//!
//! Per-call remote failures inside the pipeline/impact analyzer are caught at the call
//! site and degrade to empty results (see `pipeline` and `impact`); they never reach a
//! caller as an `Err`. Only configuration/invariant problems do.
//!
//! Spec §7's four error classes map onto this module plus `lib::retrieve_context`:
//! *TransientRemote*/*MalformedResponse* are the `IndexServiceError` variants absorbed
//! at pipeline/impact call sites; *ServiceUnavailable* is not an `Error` variant at all —
//! it is `retrieve_context`'s pre-pipeline `client.health()` gate, which returns `None`
//! instead of surfacing an error; *InvariantViolation* is the `Error::InvariantViolation`
//! variant, the only class that actually propagates to a caller.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type EngineResult<T> = Result<T, Error>;

/// Root error type for the engine crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Index-service related failure that escaped call-site handling (rare — most
    /// remote failures are absorbed by the pipeline/impact analyzer instead).
    #[error(transparent)]
    IndexService(#[from] IndexServiceError),

    /// Configuration problems (zero/invalid budgets, bad base URL, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input validation errors (malformed caller input that isn't a diff-parse concern).
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal invariant violated — a programmer error, not a remote/transient one.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Generic catch-all when nothing else fits.
    #[error("other error: {0}")]
    Other(String),
}

/// Detailed error from a call to the external index service.
///
/// This is the taxonomy referenced by spec §7's "TransientRemote" /
/// "MalformedResponse" classes: transient variants are retried-at-zero (an empty
/// result) by callers; `InvalidResponse` maps to "MalformedResponse".
#[derive(Debug, Error)]
pub enum IndexServiceError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Gateway/server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Timeout at transport level or past the caller's deadline.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// JSON deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected/invalid shape of an index-service response (MalformedResponse class).
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl IndexServiceError {
    /// True for the "TransientRemote" class spec §7 says degrades silently to an
    /// empty result rather than propagating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexServiceError::Timeout
                | IndexServiceError::Network(_)
                | IndexServiceError::Server(_)
                | IndexServiceError::RateLimited { .. }
        )
    }
}

/// Configuration and setup errors (invalid pipeline budgets, bad base URL, etc.).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid pipeline config: {0}")]
    InvalidPipelineConfig(String),
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::IndexService(IndexServiceError::from(e))
    }
}

impl From<reqwest::Error> for IndexServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return IndexServiceError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => IndexServiceError::Unauthorized,
                403 => IndexServiceError::Forbidden,
                404 => IndexServiceError::NotFound,
                429 => IndexServiceError::RateLimited {
                    retry_after_secs: None,
                },
                500..=599 => IndexServiceError::Server(code),
                _ => IndexServiceError::HttpStatus(code),
            };
        }
        IndexServiceError::Network(e.to_string())
    }
}
