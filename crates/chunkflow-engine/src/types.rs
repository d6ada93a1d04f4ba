//! Core types for chunked bulk query jobs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content format requested for result pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentFormat {
    #[default]
    Csv,
}

/// How the service schedules the batches of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    #[default]
    Parallel,
    Serial,
}

/// Parameters for creating a query job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Target object, e.g. "Account"
    pub object: String,
    pub format: ContentFormat,
    pub concurrency: ConcurrencyMode,
    /// Rows per chunk; `None` submits an unchunked job
    pub chunk_size: Option<u32>,
}

impl JobSpec {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            format: ContentFormat::Csv,
            concurrency: ConcurrencyMode::Parallel,
            chunk_size: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<u32>) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_size.is_some()
    }
}

/// A job as acknowledged by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub object: String,
    pub format: ContentFormat,
    pub concurrency: ConcurrencyMode,
    pub chunked: bool,
}

/// Status of one batch as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    NotProcessed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::InProgress => "in_progress",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
            ChunkStatus::NotProcessed => "not_processed",
        }
    }

    /// Completed and Failed end a chunk's life; NotProcessed only marks the
    /// original batch of a chunked job and is not terminal for polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One batch of a job
///
/// For chunked jobs the service materializes these after the original
/// batch; chunkflow only ever discovers them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub job_id: String,
    pub status: ChunkStatus,
    /// Position in the service's batch list
    pub ordinal: usize,
    /// Service-provided detail, usually set on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_message: Option<String>,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        status: ChunkStatus,
        ordinal: usize,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            status,
            ordinal,
            state_message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.state_message = Some(message.into());
        self
    }
}

/// One line of a result page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: String,
    /// First line of its page (the CSV header row)
    pub is_header: bool,
}

impl Record {
    pub fn header(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            is_header: true,
        }
    }

    pub fn row(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            is_header: false,
        }
    }
}
