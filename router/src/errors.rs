use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for router operations
pub type Result<T, E = RouterError> = std::result::Result<T, E>;

/// Errors that can occur on the write path.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("failed to decode write request: {0}")]
    Decode(#[from] shared::wire::WireError),

    #[error("no tenant header and no default tenant configured")]
    MissingTenant,

    #[error("no ring matches tenant {0}")]
    TenantRouting(String),

    #[error("forward hop limit exceeded ({0})")]
    HopLimitExceeded(u32),

    #[error("forward to {endpoint} failed: {reason}")]
    Forward { endpoint: String, reason: String },

    #[error("forward to {0} timed out")]
    UpstreamTimeout(String),

    #[error("quorum not reached: {acked} of {required} required acks")]
    QuorumFailed { acked: usize, required: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// HTTP status surfaced to the original caller. Quorum failures are
    /// retryable and map to 503; routing and payload problems are the
    /// caller's to fix and map to 4xx.
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::RequestBody(_) | RouterError::Decode(_) => StatusCode::BAD_REQUEST,
            RouterError::MissingTenant => StatusCode::UNAUTHORIZED,
            RouterError::TenantRouting(_) => StatusCode::BAD_REQUEST,
            RouterError::HopLimitExceeded(_) => StatusCode::LOOP_DETECTED,
            RouterError::QuorumFailed { .. }
            | RouterError::Forward { .. }
            | RouterError::UpstreamTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            RouterError::Internal(_) | RouterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
