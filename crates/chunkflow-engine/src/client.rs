//! Remote job service boundary
//!
//! The engine never speaks a wire protocol itself. Everything it needs from
//! the bulk query service goes through [`RemoteJobClient`]; implementations
//! own authentication, request encoding and transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::types::{Chunk, Job, JobSpec};

/// Raw bytes of one result page
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Failure reported by the remote service or its transport
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("service error {code}: {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Operations the orchestration engine needs from the bulk query service
///
/// Calls are stateless per invocation; one client is shared read-only by
/// every chunk pipeline of a run.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Create a query job
    async fn create_job(&self, spec: &JobSpec) -> Result<Job, ServiceError>;

    /// Submit the query text as the job's first batch
    ///
    /// For chunked jobs this batch carries no data: the service answers by
    /// creating the real chunk batches next to it.
    async fn submit_query(&self, job: &Job, query: &str) -> Result<Chunk, ServiceError>;

    /// List every batch of the job in service order, original batch first
    async fn list_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, ServiceError>;

    /// Fetch the current state of one batch
    async fn get_chunk_status(&self, job_id: &str, chunk_id: &str) -> Result<Chunk, ServiceError>;

    /// List result page ids of a completed batch
    async fn list_result_pages(
        &self,
        job_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<String>, ServiceError>;

    /// Open one result page for streaming
    async fn open_result_page(
        &self,
        job_id: &str,
        chunk_id: &str,
        page_id: &str,
    ) -> Result<ByteStream, ServiceError>;

    /// Close the job so the service stops accepting batches for it
    async fn close_job(&self, job_id: &str) -> Result<(), ServiceError>;
}
