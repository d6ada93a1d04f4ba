//! Shared helpers for chunkflow engine integration tests
//!
//! Scenarios are built in code with the helpers below and played back
//! through [`ScriptedClient`]. Output goes to an in-memory buffer unless a
//! test needs a real file.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chunkflow_engine::config::EngineConfig;
use chunkflow_engine::coordinator::JobCoordinator;
use chunkflow_engine::error::OrchestrationError;
use chunkflow_engine::report::RunReport;
use chunkflow_engine::scripted::{Scenario, ScriptedChunk, ScriptedClient, ScriptedPage, Step};
use chunkflow_engine::sink::OutputTarget;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

pub const JOB_ID: &str = "750x0000001";

// ============================================================================
// Scenario Builders
// ============================================================================

pub fn page(id: &str, lines: &[&str]) -> ScriptedPage {
    ScriptedPage {
        id: id.to_string(),
        lines: lines.iter().map(|l| l.to_string()).collect(),
        ..ScriptedPage::default()
    }
}

pub fn chunk(id: &str, steps: &[Step], pages: Vec<ScriptedPage>) -> ScriptedChunk {
    ScriptedChunk {
        id: id.to_string(),
        steps: steps.to_vec(),
        pages,
        ..ScriptedChunk::default()
    }
}

pub fn failed_chunk(id: &str, message: &str) -> ScriptedChunk {
    ScriptedChunk {
        id: id.to_string(),
        steps: vec![Step::Queued, Step::Failed],
        message: Some(message.to_string()),
        ..ScriptedChunk::default()
    }
}

pub fn scenario(chunks: Vec<ScriptedChunk>) -> Scenario {
    Scenario {
        job_id: JOB_ID.to_string(),
        object: "Account".to_string(),
        query: "SELECT Id, Name FROM Account".to_string(),
        chunks,
        ..Scenario::default()
    }
}

/// Defaults with chunking on and no poll deadline
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.poll.deadline_secs = None;
    config
}

// ============================================================================
// Running
// ============================================================================

pub async fn run_scenario(
    client: &Arc<ScriptedClient>,
    config: EngineConfig,
    target: OutputTarget,
) -> Result<RunReport, OrchestrationError> {
    let query = client.scenario().query.clone();
    let coordinator = JobCoordinator::new(client.clone(), config);
    let spec = coordinator.job_spec(client.scenario().object.clone());
    coordinator.run(&spec, &query, target).await
}

// ============================================================================
// Writers
// ============================================================================

/// In-memory output that stays readable after the sink is done with it
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn target(&self) -> OutputTarget {
        OutputTarget::Writer(Box::new(self.clone()))
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Output whose every write fails
pub struct BrokenPipe;

impl BrokenPipe {
    pub fn target() -> OutputTarget {
        OutputTarget::Writer(Box::new(BrokenPipe))
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "downstream closed",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
