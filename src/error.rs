//! Error types shared across the pipeline

use std::time::Duration;

use thiserror::Error;

/// Worker-side infrastructure fault while running a submission.
///
/// A submission exiting non-zero is a `RuntimeError` verdict, never one of these.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("language has an empty run command")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to capture child output: {0}")]
    Capture(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no message within {0:?}")]
    Timeout(Duration),

    #[error("transport closed")]
    Closed,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failure of one `Coordinator::dispatch` call. Nothing is retried or rolled back.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("no worker replied within {0:?}")]
    TransportTimeout(Duration),

    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(after) => DispatchError::TransportTimeout(after),
            other => DispatchError::Transport(other),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => DispatchError::NotFound(what),
            other => DispatchError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_timeout_maps_to_dispatch_timeout() {
        let err: DispatchError = TransportError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(err, DispatchError::TransportTimeout(d) if d == Duration::from_secs(3)));

        let err: DispatchError = TransportError::Closed.into();
        assert!(matches!(err, DispatchError::Transport(TransportError::Closed)));
    }

    #[test]
    fn test_store_not_found_maps_to_dispatch_not_found() {
        let err: DispatchError = StoreError::NotFound("submission 4".into()).into();
        assert_eq!(err.to_string(), "submission 4 not found");

        let err: DispatchError = StoreError::Backend(anyhow::anyhow!("disk full")).into();
        assert!(matches!(err, DispatchError::Storage(_)));
    }
}
