//! Result page retrieval
//!
//! Pages are read line by line straight off the service stream; a page is
//! never held in memory as a whole. Pages of one chunk are fetched one
//! after another so its records keep their order.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, instrument, warn};

use crate::client::RemoteJobClient;
use crate::error::{ChunkFailure, FetchError};
use crate::sink::SinkSender;
use crate::types::{Chunk, Job, Record};

/// Result of forwarding one chunk's pages into the sink
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardResult {
    /// Pages read to the end
    pub pages_done: usize,
    /// Records handed to the sink, including those of a page that later failed
    pub records: u64,
    pub failure: Option<ChunkFailure>,
}

/// Streams result pages of completed chunks
pub struct ResultFetcher {
    client: Arc<dyn RemoteJobClient>,
}

impl ResultFetcher {
    pub fn new(client: Arc<dyn RemoteJobClient>) -> Self {
        Self { client }
    }

    /// Open one result page as a lazy stream of records
    ///
    /// The first line of the page is flagged as its header.
    pub async fn fetch(
        &self,
        job: &Job,
        chunk: &Chunk,
        page_id: &str,
    ) -> Result<impl Stream<Item = Result<Record, FetchError>> + Send + 'static, FetchError> {
        let reader = self
            .client
            .open_result_page(&job.id, &chunk.id, page_id)
            .await?;

        let page_id = page_id.to_string();
        let lines = LinesStream::new(BufReader::new(reader).lines());

        Ok(lines.enumerate().map(move |(index, line)| match line {
            Ok(line) => Ok(Record {
                line,
                is_header: index == 0,
            }),
            Err(source) => Err(FetchError::Decode {
                page_id: page_id.clone(),
                source,
            }),
        }))
    }

    /// Fetch `pages` in order and push every record into `sink`
    ///
    /// Stops at the first failing page, or as soon as the sink is closed.
    #[instrument(skip_all, fields(job_id = %job.id, chunk_id = %chunk.id, pages = pages.len()))]
    pub async fn forward(
        &self,
        job: &Job,
        chunk: &Chunk,
        pages: &[String],
        sink: &SinkSender,
    ) -> ForwardResult {
        let mut result = ForwardResult::default();

        for page_id in pages {
            if let Err(failure) = self.forward_page(job, chunk, page_id, sink, &mut result.records).await {
                warn!(page_id = %page_id, error = %failure, "Stopped forwarding chunk results");
                result.failure = Some(failure);
                return result;
            }
            result.pages_done += 1;
            debug!(page_id = %page_id, records = result.records, "Result page forwarded");
        }

        result
    }

    async fn forward_page(
        &self,
        job: &Job,
        chunk: &Chunk,
        page_id: &str,
        sink: &SinkSender,
        records: &mut u64,
    ) -> Result<(), ChunkFailure> {
        let stream = self.fetch(job, chunk, page_id).await?;
        let mut stream = std::pin::pin!(stream);

        while let Some(record) = stream.next().await {
            sink.send(record?).await.map_err(|_| ChunkFailure::SinkClosed)?;
            *records += 1;
        }

        Ok(())
    }
}
