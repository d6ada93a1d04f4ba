//! Error taxonomy of the orchestration engine
//!
//! Chunk-level failures ([`ChunkFailure`]) stay inside the report of the
//! chunk that hit them. Job-level failures ([`OrchestrationError`]) abort
//! the run.

use serde::Serialize;
use thiserror::Error;

use crate::client::ServiceError;

/// Why one chunk pipeline ended without delivering all of its records
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkFailure {
    /// The service reported the chunk as failed
    #[error("chunk failed on the service: {}", .message.as_deref().unwrap_or("no detail"))]
    ChunkFailed { message: Option<String> },

    /// A service call made for this chunk failed
    #[error(transparent)]
    Service(ServiceError),

    /// The chunk did not reach a terminal state before the poll deadline
    #[error("gave up after polling for {waited_secs}s")]
    Abandoned { waited_secs: u64 },

    /// A result page could not be read as UTF-8 lines
    #[error("result page {page_id} is undecodable: {message}")]
    Decode { page_id: String, message: String },

    /// The merged output stopped accepting records
    #[error("result sink closed")]
    SinkClosed,

    /// The task driving the chunk died
    #[error("chunk task ended abnormally: {reason}")]
    Panicked { reason: String },
}

impl From<ServiceError> for ChunkFailure {
    fn from(err: ServiceError) -> Self {
        ChunkFailure::Service(err)
    }
}

/// Failure while streaming a result page
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to open result page: {0}")]
    Service(#[from] ServiceError),

    #[error("failed to decode result page {page_id}: {source}")]
    Decode {
        page_id: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<FetchError> for ChunkFailure {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Service(e) => ChunkFailure::Service(e),
            FetchError::Decode { page_id, source } => ChunkFailure::Decode {
                page_id,
                message: source.to_string(),
            },
        }
    }
}

/// Failure of the single consumer writing merged output
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open output {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write merged output: {0}")]
    Write(#[from] std::io::Error),

    #[error("sink writer task ended abnormally: {0}")]
    Panicked(String),
}

/// Chunk discovery failure
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no chunk batches appeared for job {job_id} after {attempts} attempts")]
    Timeout { job_id: String, attempts: u32 },

    #[error("original batch of job {job_id} failed: {}", .message.as_deref().unwrap_or("no detail"))]
    OriginalFailed {
        job_id: String,
        message: Option<String>,
    },

    #[error("failed to list batches: {0}")]
    Service(#[from] ServiceError),
}

/// Job-level failure that aborts a run
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("failed to set up job: {0}")]
    Setup(#[source] ServiceError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl OrchestrationError {
    /// True when discovery gave up waiting for chunks
    pub fn is_discovery_timeout(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Discovery(DiscoveryError::Timeout { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_failure_keeps_page_id() {
        let err = FetchError::Decode {
            page_id: "752x00000004CDE".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "stream did not contain valid UTF-8"),
        };
        match ChunkFailure::from(err) {
            ChunkFailure::Decode { page_id, .. } => assert_eq!(page_id, "752x00000004CDE"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_chunk_failed_message() {
        let failure = ChunkFailure::ChunkFailed { message: None };
        assert_eq!(failure.to_string(), "chunk failed on the service: no detail");
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(ChunkFailure::Abandoned { waited_secs: 3600 })
            .unwrap_or_default();
        assert_eq!(json["kind"], "abandoned");
        assert_eq!(json["waited_secs"], 3600);
    }
}
