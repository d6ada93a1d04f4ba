//! Scripted in-memory job service
//!
//! [`ScriptedClient`] plays back a [`Scenario`]: each chunk walks through a
//! list of statuses, one per status check, and serves canned result pages.
//! It backs the `simulate` command and the engine's tests, and records the
//! calls it receives so tests can assert on them.

use async_trait::async_trait;
use chunkflow_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use crate::client::{ByteStream, RemoteJobClient, ServiceError};
use crate::types::{Chunk, ChunkStatus, Job, JobSpec};

/// One scripted answer to a status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Queued,
    InProgress,
    Completed,
    Failed,
    NotProcessed,
    /// The status call itself fails
    Error,
}

impl Step {
    fn status(self) -> Option<ChunkStatus> {
        match self {
            Step::Queued => Some(ChunkStatus::Queued),
            Step::InProgress => Some(ChunkStatus::InProgress),
            Step::Completed => Some(ChunkStatus::Completed),
            Step::Failed => Some(ChunkStatus::Failed),
            Step::NotProcessed => Some(ChunkStatus::NotProcessed),
            Step::Error => None,
        }
    }
}

/// A canned result page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedPage {
    pub id: String,
    /// Page lines, header first
    #[serde(default)]
    pub lines: Vec<String>,
    /// Opening the page fails
    #[serde(default)]
    pub fail_open: bool,
    /// Invalid UTF-8 follows the first line
    #[serde(default)]
    pub corrupt: bool,
}

impl ScriptedPage {
    fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (index, line) in self.lines.iter().enumerate() {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
            if index == 0 && self.corrupt {
                bytes.extend_from_slice(&[0xff, 0xfe, 0xfd, b'\n']);
            }
        }
        bytes
    }
}

/// A scripted chunk batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedChunk {
    pub id: String,
    /// Status per check; the last step repeats. Empty means completed.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// State message attached when the chunk reports failed
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub pages: Vec<ScriptedPage>,
}

impl ScriptedChunk {
    fn step_at(&self, check: usize) -> Step {
        self.steps
            .get(check)
            .or(self.steps.last())
            .copied()
            .unwrap_or(Step::Completed)
    }
}

/// A complete job run to play back
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub job_id: String,
    pub object: String,
    pub query: String,
    /// Batch listings that show only the original batch, still running
    #[serde(default)]
    pub empty_listings: u32,
    /// The original batch fails with this message instead of splitting
    #[serde(default)]
    pub original_fails: Option<String>,
    #[serde(default)]
    pub fail_close: bool,
    /// Data chunks in service order
    #[serde(default)]
    pub chunks: Vec<ScriptedChunk>,
}

impl Scenario {
    /// Load a scenario from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn original_id(&self) -> String {
        format!("{}-origin", self.job_id)
    }
}

#[derive(Debug, Default)]
struct CallLog {
    listings: u32,
    status_checks: HashMap<String, usize>,
    resolved: HashSet<String>,
    checks_after_terminal: usize,
    /// Chunks between their first status check and the end of their pipeline
    in_flight: HashSet<String>,
    peak_in_flight: usize,
    pages_opened: Vec<String>,
    close_calls: usize,
}

impl CallLog {
    fn start(&mut self, chunk_id: &str) {
        self.in_flight.insert(chunk_id.to_string());
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());
    }

    fn end(&mut self, chunk_id: &str) {
        self.in_flight.remove(chunk_id);
    }
}

fn lock(calls: &Mutex<CallLog>) -> MutexGuard<'_, CallLog> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Page body that ends its chunk's pipeline when dropped
struct TrackedPage {
    body: std::io::Cursor<Vec<u8>>,
    release: Option<(Arc<Mutex<CallLog>>, String)>,
}

impl AsyncRead for TrackedPage {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.body).poll_read(cx, buf)
    }
}

impl Drop for TrackedPage {
    fn drop(&mut self) {
        if let Some((calls, chunk_id)) = self.release.take() {
            lock(&calls).end(&chunk_id);
        }
    }
}

/// In-memory [`RemoteJobClient`] playing back a [`Scenario`]
pub struct ScriptedClient {
    scenario: Scenario,
    calls: Arc<Mutex<CallLog>>,
}

impl ScriptedClient {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            calls: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    fn calls(&self) -> MutexGuard<'_, CallLog> {
        lock(&self.calls)
    }

    /// Status checks made for `chunk_id`
    pub fn status_checks(&self, chunk_id: &str) -> usize {
        self.calls().status_checks.get(chunk_id).copied().unwrap_or(0)
    }

    /// Status checks across every chunk
    pub fn total_status_checks(&self) -> usize {
        self.calls().status_checks.values().sum()
    }

    /// Status checks made for chunks that had already reported a terminal state
    pub fn checks_after_terminal(&self) -> usize {
        self.calls().checks_after_terminal
    }

    /// Most chunk pipelines in flight at the same time
    ///
    /// A pipeline starts at its chunk's first status check and ends when
    /// the chunk fails, has no pages, or its last page body is dropped.
    pub fn peak_in_flight(&self) -> usize {
        self.calls().peak_in_flight
    }

    pub fn batch_listings(&self) -> u32 {
        self.calls().listings
    }

    /// Result pages opened, in call order
    pub fn pages_opened(&self) -> Vec<String> {
        self.calls().pages_opened.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.calls().close_calls
    }

    fn find_chunk(&self, chunk_id: &str) -> std::result::Result<(usize, &ScriptedChunk), ServiceError> {
        self.scenario
            .chunks
            .iter()
            .enumerate()
            .find(|(_, c)| c.id == chunk_id)
            .ok_or_else(|| ServiceError::new("NOT_FOUND", format!("unknown batch {chunk_id}")))
    }

    fn check_job(&self, job_id: &str) -> std::result::Result<(), ServiceError> {
        if job_id == self.scenario.job_id {
            Ok(())
        } else {
            Err(ServiceError::new("NOT_FOUND", format!("unknown job {job_id}")))
        }
    }

    /// Current status of a chunk without counting a check
    fn peek(&self, index: usize, chunk: &ScriptedChunk) -> Chunk {
        let check = self.calls().status_checks.get(&chunk.id).copied().unwrap_or(0);
        let status = chunk
            .step_at(check)
            .status()
            .unwrap_or(ChunkStatus::Queued);
        Chunk::new(&chunk.id, &self.scenario.job_id, status, index + 1)
    }
}

#[async_trait]
impl RemoteJobClient for ScriptedClient {
    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<Job, ServiceError> {
        Ok(Job {
            id: self.scenario.job_id.clone(),
            object: spec.object.clone(),
            format: spec.format,
            concurrency: spec.concurrency,
            chunked: spec.is_chunked(),
        })
    }

    async fn submit_query(&self, job: &Job, _query: &str) -> std::result::Result<Chunk, ServiceError> {
        self.check_job(&job.id)?;

        if job.chunked {
            return Ok(Chunk::new(
                self.scenario.original_id(),
                &job.id,
                ChunkStatus::Queued,
                0,
            ));
        }

        // Unchunked jobs run the submitted batch itself
        self.scenario
            .chunks
            .first()
            .map(|c| Chunk::new(&c.id, &job.id, ChunkStatus::Queued, 1))
            .ok_or_else(|| ServiceError::new("INVALID_BATCH", "scenario has no batches"))
    }

    async fn list_chunks(&self, job_id: &str) -> std::result::Result<Vec<Chunk>, ServiceError> {
        self.check_job(job_id)?;

        let listing = {
            let mut calls = self.calls();
            calls.listings += 1;
            calls.listings
        };

        let original_id = self.scenario.original_id();
        if listing <= self.scenario.empty_listings {
            return Ok(vec![Chunk::new(original_id, job_id, ChunkStatus::InProgress, 0)]);
        }

        if let Some(message) = &self.scenario.original_fails {
            return Ok(vec![
                Chunk::new(original_id, job_id, ChunkStatus::Failed, 0).with_message(message),
            ]);
        }

        let mut batches = vec![Chunk::new(original_id, job_id, ChunkStatus::NotProcessed, 0)];
        batches.extend(
            self.scenario
                .chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| self.peek(index, chunk)),
        );
        Ok(batches)
    }

    async fn get_chunk_status(
        &self,
        job_id: &str,
        chunk_id: &str,
    ) -> std::result::Result<Chunk, ServiceError> {
        self.check_job(job_id)?;
        let (index, chunk) = self.find_chunk(chunk_id)?;

        let step = {
            let mut guard = self.calls();
            let calls = &mut *guard;
            if calls.resolved.contains(chunk_id) {
                calls.checks_after_terminal += 1;
            }

            let counter = calls.status_checks.entry(chunk_id.to_string()).or_insert(0);
            let step = chunk.step_at(*counter);
            *counter += 1;

            calls.start(chunk_id);
            match step.status() {
                Some(ChunkStatus::Completed) => {
                    calls.resolved.insert(chunk_id.to_string());
                },
                Some(status) if !status.is_terminal() => {},
                _ => {
                    calls.resolved.insert(chunk_id.to_string());
                    calls.end(chunk_id);
                },
            }
            step
        };

        let Some(status) = step.status() else {
            return Err(ServiceError::new(
                "SERVER_UNAVAILABLE",
                format!("status check for {chunk_id} failed"),
            ));
        };

        let observed = Chunk::new(chunk_id, job_id, status, index + 1);
        Ok(match (status, &chunk.message) {
            (ChunkStatus::Failed, Some(message)) => observed.with_message(message),
            _ => observed,
        })
    }

    async fn list_result_pages(
        &self,
        job_id: &str,
        chunk_id: &str,
    ) -> std::result::Result<Vec<String>, ServiceError> {
        self.check_job(job_id)?;
        let (_, chunk) = self.find_chunk(chunk_id)?;
        if chunk.pages.is_empty() {
            self.calls().end(chunk_id);
        }
        Ok(chunk.pages.iter().map(|p| p.id.clone()).collect())
    }

    async fn open_result_page(
        &self,
        job_id: &str,
        chunk_id: &str,
        page_id: &str,
    ) -> std::result::Result<ByteStream, ServiceError> {
        self.check_job(job_id)?;
        let (_, chunk) = self.find_chunk(chunk_id)?;
        let (position, page) = chunk
            .pages
            .iter()
            .enumerate()
            .find(|(_, p)| p.id == page_id)
            .ok_or_else(|| ServiceError::new("NOT_FOUND", format!("unknown result page {page_id}")))?;

        {
            let mut calls = self.calls();
            calls.pages_opened.push(page_id.to_string());
            if page.fail_open {
                calls.end(chunk_id);
                return Err(ServiceError::new(
                    "SERVER_UNAVAILABLE",
                    format!("result page {page_id} unavailable"),
                ));
            }
        }

        // Forwarding stops after the last page or a corrupt one
        let last = position + 1 == chunk.pages.len() || page.corrupt;
        Ok(Box::pin(TrackedPage {
            body: std::io::Cursor::new(page.bytes()),
            release: last.then(|| (Arc::clone(&self.calls), chunk_id.to_string())),
        }))
    }

    async fn close_job(&self, job_id: &str) -> std::result::Result<(), ServiceError> {
        self.calls().close_calls += 1;
        self.check_job(job_id)?;

        if self.scenario.fail_close {
            return Err(ServiceError::new("INVALID_STATE", "job could not be closed"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    fn scenario() -> Scenario {
        Scenario {
            job_id: "750x001".to_string(),
            object: "Account".to_string(),
            query: "SELECT Id FROM Account".to_string(),
            chunks: vec![ScriptedChunk {
                id: "751x001".to_string(),
                steps: vec![Step::Queued, Step::Completed],
                pages: vec![ScriptedPage {
                    id: "p1".to_string(),
                    lines: vec!["Id".to_string(), "001".to_string()],
                    ..ScriptedPage::default()
                }],
                ..ScriptedChunk::default()
            }],
            ..Scenario::default()
        }
    }

    #[tokio::test]
    async fn test_steps_advance_per_check_and_last_repeats() {
        let client = ScriptedClient::new(scenario());
        let statuses = [
            client.get_chunk_status("750x001", "751x001").await.unwrap().status,
            client.get_chunk_status("750x001", "751x001").await.unwrap().status,
            client.get_chunk_status("750x001", "751x001").await.unwrap().status,
        ];
        assert_eq!(
            statuses,
            [ChunkStatus::Queued, ChunkStatus::Completed, ChunkStatus::Completed]
        );
        assert_eq!(client.status_checks("751x001"), 3);
        assert_eq!(client.checks_after_terminal(), 1);
    }

    #[tokio::test]
    async fn test_listing_hides_chunks_until_split() {
        let mut scenario = scenario();
        scenario.empty_listings = 1;
        let client = ScriptedClient::new(scenario);

        let first = client.list_chunks("750x001").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, ChunkStatus::InProgress);

        let second = client.list_chunks("750x001").await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].status, ChunkStatus::NotProcessed);
        assert_eq!(second[1].id, "751x001");
    }

    #[tokio::test]
    async fn test_page_bytes() {
        let client = ScriptedClient::new(scenario());
        let mut reader = client.open_result_page("750x001", "751x001", "p1").await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "Id\n001\n");
        assert_eq!(client.pages_opened(), vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_pipeline_stays_in_flight_until_last_page_dropped() {
        let mut scenario = scenario();
        scenario.chunks[0].pages.push(ScriptedPage {
            id: "p2".to_string(),
            lines: vec!["Id".to_string(), "002".to_string()],
            ..ScriptedPage::default()
        });
        let client = ScriptedClient::new(scenario);

        client.get_chunk_status("750x001", "751x001").await.unwrap();
        assert_eq!(client.calls().in_flight.len(), 1);
        client.get_chunk_status("750x001", "751x001").await.unwrap();

        drop(client.open_result_page("750x001", "751x001", "p1").await.unwrap());
        assert_eq!(client.calls().in_flight.len(), 1);

        let last = client.open_result_page("750x001", "751x001", "p2").await.unwrap();
        assert_eq!(client.calls().in_flight.len(), 1);
        drop(last);
        assert!(client.calls().in_flight.is_empty());
        assert_eq!(client.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_leaves_flight() {
        let mut scenario = scenario();
        scenario.chunks[0].steps = vec![Step::InProgress, Step::Failed];
        let client = ScriptedClient::new(scenario);

        client.get_chunk_status("750x001", "751x001").await.unwrap();
        client.get_chunk_status("750x001", "751x001").await.unwrap();
        assert!(client.calls().in_flight.is_empty());
    }

    #[test]
    fn test_load_scenario_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"job_id":"750x9","object":"Contact","query":"SELECT Id FROM Contact",
                "chunks":[{{"id":"751x9","steps":["in_progress","failed"],"message":"timeout"}}]}}"#
        )
        .unwrap();

        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.chunks[0].steps, vec![Step::InProgress, Step::Failed]);
        assert_eq!(scenario.chunks[0].message.as_deref(), Some("timeout"));
        assert!(scenario.chunks[0].pages.is_empty());
    }
}
