//! Run reports

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ChunkFailure;
use crate::sink::SinkSummary;

/// What happened to one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub chunk_id: String,
    pub ordinal: usize,
    /// Result pages forwarded completely
    pub pages: usize,
    /// Records handed to the sink
    pub records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChunkFailure>,
}

impl ChunkReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Summary of one job run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: String,
    pub total_chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub lines_written: u64,
    pub headers_dropped: u64,
    /// False when closing the job on the service failed
    pub job_closed: bool,
    /// One entry per chunk, by ordinal
    pub chunks: Vec<ChunkReport>,
}

impl RunReport {
    pub fn new(job_id: impl Into<String>, mut chunks: Vec<ChunkReport>, sink: SinkSummary) -> Self {
        chunks.sort_by_key(|c| c.ordinal);
        let succeeded = chunks.iter().filter(|c| c.is_success()).count();

        Self {
            job_id: job_id.into(),
            total_chunks: chunks.len(),
            succeeded,
            failed: chunks.len() - succeeded,
            lines_written: sink.lines_written,
            headers_dropped: sink.headers_dropped,
            job_closed: false,
            chunks,
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| !c.is_success())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Emit the summary and every failed chunk through tracing
    pub fn log_summary(&self) {
        info!(
            job_id = %self.job_id,
            total_chunks = self.total_chunks,
            succeeded = self.succeeded,
            failed = self.failed,
            lines_written = self.lines_written,
            headers_dropped = self.headers_dropped,
            job_closed = self.job_closed,
            "Run finished"
        );

        for chunk in self.failures() {
            if let Some(failure) = &chunk.failure {
                warn!(
                    chunk_id = %chunk.chunk_id,
                    ordinal = chunk.ordinal,
                    records = chunk.records,
                    error = %failure,
                    "Chunk failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn chunk(id: &str, ordinal: usize, failure: Option<ChunkFailure>) -> ChunkReport {
        ChunkReport {
            chunk_id: id.to_string(),
            ordinal,
            pages: usize::from(failure.is_none()),
            records: if failure.is_none() { 3 } else { 0 },
            failure,
        }
    }

    #[test]
    fn test_counts_and_order() {
        let report = RunReport::new(
            "750x001",
            vec![
                chunk("c", 3, None),
                chunk("a", 1, None),
                chunk("b", 2, Some(ChunkFailure::ChunkFailed { message: None })),
            ],
            SinkSummary {
                lines_written: 6,
                headers_dropped: 0,
            },
        );

        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.is_complete_success());

        let ids: Vec<&str> = report.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let failed: Vec<&str> = report.failures().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
    }

    #[test]
    fn test_json_omits_success_failure_field() {
        let report = RunReport::new(
            "750x001",
            vec![
                chunk("a", 1, None),
                chunk("b", 2, Some(ChunkFailure::SinkClosed)),
            ],
            SinkSummary::default(),
        );

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(json["chunks"][0].get("failure").is_none());
        assert_eq!(json["chunks"][1]["failure"]["kind"], "sink_closed");
    }
}
