//! Error types for the tool automation core.

use thiserror::Error;

use crate::types::ExecutionStatus;

/// Failures of the durable store. These are the only fatal errors in the core.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid row in {table}: {message}")]
    Decode { table: &'static str, message: String },

    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(String),
}

impl StoreError {
    pub fn decode(table: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            table,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A dispatch that failed after its outcome was durably recorded.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("webhook call for '{tool_name}' timed out after {seconds}s")]
    Timeout {
        tool_name: String,
        execution_id: String,
        correlation_id: String,
        seconds: u64,
    },

    #[error("webhook call for '{tool_name}' failed: {message}")]
    Transport {
        tool_name: String,
        execution_id: String,
        correlation_id: String,
        message: String,
    },

    #[error("webhook for '{tool_name}' answered HTTP {status}")]
    Http {
        tool_name: String,
        execution_id: String,
        correlation_id: String,
        status: u16,
    },

    /// Another actor finalized the record first with a failure.
    #[error("execution for '{tool_name}' was already finalized as {status}: {message}")]
    Finalized {
        tool_name: String,
        execution_id: String,
        correlation_id: String,
        status: ExecutionStatus,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            DispatchError::Timeout { execution_id, .. }
            | DispatchError::Transport { execution_id, .. }
            | DispatchError::Http { execution_id, .. }
            | DispatchError::Finalized { execution_id, .. } => Some(execution_id),
            DispatchError::Store(_) => None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            DispatchError::Timeout { correlation_id, .. }
            | DispatchError::Transport { correlation_id, .. }
            | DispatchError::Http { correlation_id, .. }
            | DispatchError::Finalized { correlation_id, .. } => Some(correlation_id),
            DispatchError::Store(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution {0} is still pending")]
    StillPending(String),

    #[error("tool {0} no longer exists")]
    ToolMissing(String),

    #[error("tool {0} is inactive")]
    ToolInactive(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0} is not configured")]
    NotConfigured(String),

    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider response had empty content")]
    EmptyContent,
}
