//! Per-chunk status polling
//!
//! Polling is split in two:
//! - [`PollState::step`] is a pure transition over the observed status
//! - [`BatchPoller::watch`] drives it from a fixed-period timer
//!
//! The timer lives inside the `watch` future, so it is released the moment
//! the chunk resolves. No status query is issued after a terminal state.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::client::RemoteJobClient;
use crate::config::PollConfig;
use crate::error::ChunkFailure;
use crate::types::{Chunk, ChunkStatus, Job};

/// Polling progress of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not terminal yet; `checks` status reports seen so far
    Waiting { checks: u32 },
    Completed,
    Failed,
}

/// The transition that ends polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Failed { message: Option<String> },
}

impl PollState {
    pub fn start() -> Self {
        PollState::Waiting { checks: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Waiting { .. })
    }

    /// Advance on a freshly observed chunk
    ///
    /// Yields a [`Terminal`] exactly once, on the transition out of
    /// `Waiting`. Terminal states absorb every later observation.
    pub fn step(self, observed: &Chunk) -> (PollState, Option<Terminal>) {
        let checks = match self {
            PollState::Waiting { checks } => checks,
            terminal => return (terminal, None),
        };

        match observed.status {
            ChunkStatus::Completed => (PollState::Completed, Some(Terminal::Completed)),
            ChunkStatus::Failed => (
                PollState::Failed,
                Some(Terminal::Failed {
                    message: observed.state_message.clone(),
                }),
            ),
            ChunkStatus::Queued | ChunkStatus::InProgress | ChunkStatus::NotProcessed => (
                PollState::Waiting {
                    checks: checks.saturating_add(1),
                },
                None,
            ),
        }
    }
}

/// Terminal result of polling one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk completed; its result pages in service order
    Success { chunk: Chunk, pages: Vec<String> },
    Failure { chunk: Chunk, cause: ChunkFailure },
}

impl ChunkOutcome {
    pub fn chunk(&self) -> &Chunk {
        match self {
            ChunkOutcome::Success { chunk, .. } | ChunkOutcome::Failure { chunk, .. } => chunk,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChunkOutcome::Success { .. })
    }
}

/// Timing used by [`BatchPoller`]
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub initial_delay: Duration,
    pub period: Duration,
    pub deadline: Option<Duration>,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            period: config.period(),
            deadline: config.deadline(),
        }
    }
}

/// Watches chunks until they reach a terminal state
pub struct BatchPoller {
    client: Arc<dyn RemoteJobClient>,
    settings: PollSettings,
}

impl BatchPoller {
    pub fn new(client: Arc<dyn RemoteJobClient>, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    /// Poll `chunk` until it resolves
    ///
    /// Never fails: service errors, remote failure and deadline expiry all
    /// resolve to [`ChunkOutcome::Failure`] for this chunk only.
    #[instrument(skip_all, fields(job_id = %job.id, chunk_id = %chunk.id))]
    pub async fn watch(&self, job: &Job, chunk: &Chunk) -> ChunkOutcome {
        let started = Instant::now();
        sleep(self.settings.initial_delay).await;

        let mut ticker = interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = PollState::start();

        loop {
            ticker.tick().await;

            if let Some(deadline) = self.settings.deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    warn!(waited_secs = waited.as_secs(), "Chunk not terminal before deadline, abandoning");
                    return ChunkOutcome::Failure {
                        chunk: chunk.clone(),
                        cause: ChunkFailure::Abandoned {
                            waited_secs: waited.as_secs(),
                        },
                    };
                }
            }

            let observed = match self.client.get_chunk_status(&job.id, &chunk.id).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(error = %e, "Status check failed");
                    return ChunkOutcome::Failure {
                        chunk: chunk.clone(),
                        cause: e.into(),
                    };
                },
            };

            let (next, terminal) = state.step(&observed);
            state = next;

            match terminal {
                None => {
                    debug!(status = %observed.status, ?state, "Chunk still running");
                },
                Some(Terminal::Completed) => {
                    return match self.client.list_result_pages(&job.id, &chunk.id).await {
                        Ok(pages) => {
                            info!(pages = pages.len(), "Chunk completed");
                            ChunkOutcome::Success {
                                chunk: observed,
                                pages,
                            }
                        },
                        Err(e) => {
                            warn!(error = %e, "Failed to list result pages");
                            ChunkOutcome::Failure {
                                chunk: observed,
                                cause: e.into(),
                            }
                        },
                    };
                },
                Some(Terminal::Failed { message }) => {
                    warn!(detail = message.as_deref().unwrap_or(""), "Chunk failed on the service");
                    return ChunkOutcome::Failure {
                        chunk: observed,
                        cause: ChunkFailure::ChunkFailed { message },
                    };
                },
            }
        }
    }

    /// Start watching `chunk` in the background
    ///
    /// The returned handle resolves exactly once. Dropping it cancels the
    /// poll task together with its timer.
    pub fn spawn(self: &Arc<Self>, job: Job, chunk: Chunk) -> WatchHandle {
        let poller = Arc::clone(self);
        let watched = chunk.clone();
        let task = tokio::spawn(async move { poller.watch(&job, &chunk).await });
        WatchHandle { chunk: watched, task }
    }
}

/// Handle to a chunk being watched in the background
pub struct WatchHandle {
    chunk: Chunk,
    task: JoinHandle<ChunkOutcome>,
}

impl WatchHandle {
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the outcome, consuming the handle
    pub async fn outcome(mut self) -> ChunkOutcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => ChunkOutcome::Failure {
                chunk: self.chunk.clone(),
                cause: ChunkFailure::Panicked {
                    reason: e.to_string(),
                },
            },
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
