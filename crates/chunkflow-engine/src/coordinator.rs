//! Job coordinator
//!
//! Drives one bulk query job end to end:
//!
//! 1. Create the job and submit the query
//! 2. Discover the chunk batches
//! 3. Run one poll-then-fetch pipeline per chunk through the worker pool
//! 4. Drain the merged output and close the job
//!
//! Chunk failures are collected into the [`RunReport`]; only job creation,
//! discovery and the output sink can fail a run. Once the job exists it is
//! closed on every path.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::client::RemoteJobClient;
use crate::config::EngineConfig;
use crate::discovery::ChunkDiscovery;
use crate::error::{ChunkFailure, OrchestrationError};
use crate::fetcher::ResultFetcher;
use crate::poller::{BatchPoller, ChunkOutcome, PollSettings};
use crate::pool::WorkerPool;
use crate::report::{ChunkReport, RunReport};
use crate::sink::{OutputTarget, ResultSink, SinkOptions, SinkSender};
use crate::types::{Chunk, ConcurrencyMode, Job, JobSpec};

pub struct JobCoordinator {
    client: Arc<dyn RemoteJobClient>,
    config: EngineConfig,
}

impl JobCoordinator {
    pub fn new(client: Arc<dyn RemoteJobClient>, config: EngineConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Job parameters for `object` using the configured chunking and concurrency
    pub fn job_spec(&self, object: impl Into<String>) -> JobSpec {
        JobSpec::new(object)
            .with_chunk_size(self.config.chunk_size)
            .with_concurrency(self.config.concurrency)
    }

    /// Run a query job and write its merged results to `target`
    #[instrument(skip_all, fields(object = %spec.object, chunked = spec.is_chunked()))]
    pub async fn run(
        &self,
        spec: &JobSpec,
        query: &str,
        target: OutputTarget,
    ) -> Result<RunReport, OrchestrationError> {
        let job = self
            .client
            .create_job(spec)
            .await
            .map_err(OrchestrationError::Setup)?;
        info!(job_id = %job.id, "Job created");

        let result = self.execute(&job, query, target).await;
        let closed = self.close(&job).await;

        match result {
            Ok(mut report) => {
                report.job_closed = closed;
                Ok(report)
            },
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job run failed");
                Err(e)
            },
        }
    }

    async fn execute(
        &self,
        job: &Job,
        query: &str,
        target: OutputTarget,
    ) -> Result<RunReport, OrchestrationError> {
        let original = self
            .client
            .submit_query(job, query)
            .await
            .map_err(OrchestrationError::Setup)?;
        info!(job_id = %job.id, batch_id = %original.id, "Query submitted");

        let discovery = ChunkDiscovery::new(Arc::clone(&self.client), self.config.discovery.clone());
        let chunks = discovery.discover(job, &original).await?;

        let sink = ResultSink::open(target, SinkOptions::from(&self.config.output)).await?;
        let reports = self.process_chunks(job, chunks, &sink).await;
        let summary = sink.finish().await?;

        Ok(RunReport::new(job.id.clone(), reports, summary))
    }

    /// Run every chunk pipeline through a pool scoped to this call
    async fn process_chunks(&self, job: &Job, chunks: Vec<Chunk>, sink: &ResultSink) -> Vec<ChunkReport> {
        let total = chunks.len();
        let pool = WorkerPool::new(self.pool_size(job, total));
        let poller = BatchPoller::new(Arc::clone(&self.client), PollSettings::from(&self.config.poll));
        let fetcher = ResultFetcher::new(Arc::clone(&self.client));

        info!(job_id = %job.id, chunks = total, workers = pool.size(), "Starting chunk pipelines");

        let results = pool.run_all(chunks, |chunk| {
            let sender = sink.sender();
            let poller = &poller;
            let fetcher = &fetcher;
            async move { run_pipeline(poller, fetcher, job, chunk, sender).await }
        });
        let mut results = std::pin::pin!(results);

        // Watches the consumer so a dead sink stops pipelines still polling
        let watcher = sink.sender();

        let mut reports = Vec::with_capacity(total);
        loop {
            let report = tokio::select! {
                biased;
                next = results.next() => match next {
                    Some(report) => report,
                    None => break,
                },
                () = watcher.closed() => {
                    warn!(
                        job_id = %job.id,
                        pending = total - reports.len(),
                        "Output sink closed, dropping remaining chunk pipelines"
                    );
                    break;
                },
            };

            let sink_gone = matches!(report.failure, Some(ChunkFailure::SinkClosed));
            info!(
                chunk_id = %report.chunk_id,
                success = report.is_success(),
                records = report.records,
                done = reports.len() + 1,
                total,
                "Chunk pipeline finished"
            );
            reports.push(report);

            if sink_gone {
                warn!(job_id = %job.id, "Output sink closed, dropping remaining chunk pipelines");
                break;
            }
        }

        reports
    }

    fn pool_size(&self, job: &Job, chunk_count: usize) -> usize {
        match job.concurrency {
            ConcurrencyMode::Serial => 1,
            ConcurrencyMode::Parallel => self.config.effective_pool_size(chunk_count),
        }
    }

    /// Close the job, logging rather than failing on error
    async fn close(&self, job: &Job) -> bool {
        match self.client.close_job(&job.id).await {
            Ok(()) => {
                info!(job_id = %job.id, "Job closed");
                true
            },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to close job");
                false
            },
        }
    }
}

/// Poll one chunk, then forward its pages into the sink
async fn run_pipeline(
    poller: &BatchPoller,
    fetcher: &ResultFetcher,
    job: &Job,
    chunk: Chunk,
    sink: SinkSender,
) -> ChunkReport {
    match poller.watch(job, &chunk).await {
        ChunkOutcome::Success { chunk: done, pages } => {
            let forwarded = fetcher.forward(job, &done, &pages, &sink).await;
            ChunkReport {
                chunk_id: chunk.id,
                ordinal: chunk.ordinal,
                pages: forwarded.pages_done,
                records: forwarded.records,
                failure: forwarded.failure,
            }
        },
        ChunkOutcome::Failure { cause, .. } => ChunkReport {
            chunk_id: chunk.id,
            ordinal: chunk.ordinal,
            pages: 0,
            records: 0,
            failure: Some(cause),
        },
    }
}
