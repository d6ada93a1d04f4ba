//! Chunk discovery
//!
//! With chunking enabled the service never runs the submitted batch. It
//! materializes the real chunk batches next to it some time later, so
//! discovery waits, lists the job's batches, and drops the original one.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::client::RemoteJobClient;
use crate::config::{DiscoveryConfig, DiscoveryStrategy};
use crate::error::DiscoveryError;
use crate::types::{Chunk, ChunkStatus, Job};

/// Finds the chunk batches the service created for a job
pub struct ChunkDiscovery {
    client: Arc<dyn RemoteJobClient>,
    config: DiscoveryConfig,
}

impl ChunkDiscovery {
    pub fn new(client: Arc<dyn RemoteJobClient>, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }

    /// Discover the processable chunks of `job`
    ///
    /// `original` is the batch returned when the query was submitted. For
    /// an unchunked job it is the only chunk and is returned immediately.
    #[instrument(skip_all, fields(job_id = %job.id, strategy = ?self.config.strategy))]
    pub async fn discover(&self, job: &Job, original: &Chunk) -> Result<Vec<Chunk>, DiscoveryError> {
        if !job.chunked {
            debug!(chunk_id = %original.id, "Job is not chunked, processing submitted batch");
            return Ok(vec![original.clone()]);
        }

        let chunks = match self.config.strategy {
            DiscoveryStrategy::FixedWait => self.discover_fixed_wait(job, original).await?,
            DiscoveryStrategy::AwaitOriginal => self.discover_await_original(job, original).await?,
        };

        info!(chunks = chunks.len(), "Discovered chunk batches");
        Ok(chunks)
    }

    async fn discover_fixed_wait(
        &self,
        job: &Job,
        original: &Chunk,
    ) -> Result<Vec<Chunk>, DiscoveryError> {
        sleep(self.config.initial_wait()).await;

        let max_attempts = self.config.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let batches = self.client.list_chunks(&job.id).await?;
            let chunks = data_chunks(batches, original);

            if !chunks.is_empty() {
                return Ok(chunks);
            }

            if attempts >= max_attempts {
                return Err(DiscoveryError::Timeout {
                    job_id: job.id.clone(),
                    attempts,
                });
            }

            warn!(attempt = attempts, max_attempts, "No chunk batches yet, retrying");
            sleep(self.config.retry_wait()).await;
        }
    }

    async fn discover_await_original(
        &self,
        job: &Job,
        original: &Chunk,
    ) -> Result<Vec<Chunk>, DiscoveryError> {
        sleep(self.config.initial_wait()).await;

        let max_attempts = self.config.max_attempts();

        for attempt in 1..=max_attempts {
            let batches = self.client.list_chunks(&job.id).await?;
            let origin_state = batches
                .iter()
                .find(|b| b.id == original.id)
                .map(|b| (b.status, b.state_message.clone()));

            match origin_state {
                Some((ChunkStatus::NotProcessed, _)) => {
                    let chunks = data_chunks(batches, original);
                    if chunks.is_empty() {
                        return Err(DiscoveryError::Timeout {
                            job_id: job.id.clone(),
                            attempts: attempt,
                        });
                    }
                    return Ok(chunks);
                },
                Some((ChunkStatus::Failed, message)) => {
                    return Err(DiscoveryError::OriginalFailed {
                        job_id: job.id.clone(),
                        message,
                    });
                },
                Some((status, _)) => {
                    debug!(attempt, %status, "Original batch still being split");
                },
                None => {
                    warn!(attempt, chunk_id = %original.id, "Original batch missing from listing");
                },
            }

            if attempt < max_attempts {
                sleep(self.config.retry_wait()).await;
            }
        }

        Err(DiscoveryError::Timeout {
            job_id: job.id.clone(),
            attempts: max_attempts,
        })
    }
}

/// Drop the original batch and order the rest by position
fn data_chunks(batches: Vec<Chunk>, original: &Chunk) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = batches.into_iter().filter(|b| b.id != original.id).collect();
    chunks.sort_by_key(|c| c.ordinal);
    chunks
}
