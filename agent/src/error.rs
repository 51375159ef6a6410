use thiserror::Error;

/// Typed failure modes of the remediation pipeline. Tool-level failures are
/// stringified into `ResultRecord.error`; everything that escapes a workflow
/// surfaces as one of these.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    #[error("unknown runbook: {0}")]
    UnknownRunbook(String),

    #[error("tool not allowed: expected {expected}, got {got}")]
    ToolNotAllowed { expected: String, got: String },

    #[error("owner resolution failed: {0}")]
    OwnerResolutionFailed(String),

    #[error("ambiguous container: {0}")]
    AmbiguousContainer(String),

    #[error("cluster API error: {message}")]
    ClusterApi { message: String, retryable: bool },

    #[error("llm error: {0}")]
    Llm(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("database pool saturated")]
    Backpressure,

    #[error("cancelled")]
    Cancelled,

    #[error("{0} deadline exceeded")]
    Timeout(&'static str),
}

impl From<kube::Error> for AgentError {
    fn from(e: kube::Error) -> Self {
        let retryable = match &e {
            kube::Error::Api(resp) => resp.code >= 500,
            _ => true,
        };
        AgentError::ClusterApi {
            message: e.to_string(),
            retryable,
        }
    }
}

impl From<tokio_postgres::Error> for AgentError {
    fn from(e: tokio_postgres::Error) -> Self {
        AgentError::Db(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AgentError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Timeout(_) => AgentError::Backpressure,
            other => AgentError::Db(other.to_string()),
        }
    }
}
