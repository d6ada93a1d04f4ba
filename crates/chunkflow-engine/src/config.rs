//! Engine configuration
//!
//! Loaded from `CHUNKFLOW_*` environment variables (a `.env` file is read
//! first when present). Every value has a default; the CLI overrides
//! individual settings on top.

use chunkflow_common::{ChunkflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::ConcurrencyMode;

// ============================================================================
// Defaults
// ============================================================================

/// Default rows per chunk requested from the service.
pub const DEFAULT_CHUNK_SIZE: u32 = 100_000;

/// Default delay before the first status check of a chunk.
pub const DEFAULT_POLL_INITIAL_DELAY_SECS: u64 = 1;

/// Default interval between status checks of a chunk.
pub const DEFAULT_POLL_PERIOD_SECS: u64 = 15;

/// Default time a chunk may stay non-terminal before it is abandoned.
pub const DEFAULT_POLL_DEADLINE_SECS: u64 = 3600;

/// Default wait before the first batch listing.
pub const DEFAULT_DISCOVERY_INITIAL_WAIT_SECS: u64 = 5;

/// Default wait between batch listings that found no chunks.
pub const DEFAULT_DISCOVERY_RETRY_WAIT_SECS: u64 = 5;

/// Default number of extra listings after the first empty one.
pub const DEFAULT_DISCOVERY_RETRIES: u32 = 1;

/// Default number of chunk pipelines running at once.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default number of records buffered between producers and the writer.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// How chunk batches are found after the query is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// Wait a fixed window, list, retry a bounded number of times if empty
    #[default]
    FixedWait,
    /// List until the original batch reports not-processed
    AwaitOriginal,
}

impl FromStr for DiscoveryStrategy {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fixed_wait" | "fixed" => Ok(DiscoveryStrategy::FixedWait),
            "await_original" | "await" => Ok(DiscoveryStrategy::AwaitOriginal),
            _ => Err(ChunkflowError::invalid_value("discovery strategy", s)),
        }
    }
}

/// Chunk discovery timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub strategy: DiscoveryStrategy,
    pub initial_wait_secs: u64,
    pub retry_wait_secs: u64,
    pub retries: u32,
}

impl DiscoveryConfig {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_secs(self.initial_wait_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    /// Total listings discovery may perform
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategy: DiscoveryStrategy::FixedWait,
            initial_wait_secs: DEFAULT_DISCOVERY_INITIAL_WAIT_SECS,
            retry_wait_secs: DEFAULT_DISCOVERY_RETRY_WAIT_SECS,
            retries: DEFAULT_DISCOVERY_RETRIES,
        }
    }
}

/// Per-chunk status polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub initial_delay_secs: u64,
    pub period_secs: u64,
    /// `None` polls until the chunk is terminal
    pub deadline_secs: Option<u64>,
}

impl PollConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: DEFAULT_POLL_INITIAL_DELAY_SECS,
            period_secs: DEFAULT_POLL_PERIOD_SECS,
            deadline_secs: Some(DEFAULT_POLL_DEADLINE_SECS),
        }
    }
}

/// Merged output destination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `None` writes to stdout
    pub path: Option<PathBuf>,
    /// gzip the output file
    pub gzip: bool,
    /// Keep only the first CSV header line across all pages
    pub dedupe_headers: bool,
    pub sink_capacity: usize,
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per chunk; `None` disables chunking
    pub chunk_size: Option<u32>,
    pub concurrency: ConcurrencyMode,
    pub worker_pool_size: usize,
    pub poll: PollConfig,
    pub discovery: DiscoveryConfig,
    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            concurrency: ConcurrencyMode::Parallel,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            poll: PollConfig::default(),
            discovery: DiscoveryConfig::default(),
            output: OutputConfig {
                sink_capacity: DEFAULT_SINK_CAPACITY,
                ..OutputConfig::default()
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChunkflowError::invalid_value(key, raw)),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// - `CHUNKFLOW_CHUNK_SIZE`: rows per chunk, `0` disables chunking
    /// - `CHUNKFLOW_CONCURRENCY`: `parallel` or `serial`
    /// - `CHUNKFLOW_WORKERS`: worker pool size
    /// - `CHUNKFLOW_POLL_INITIAL_DELAY_SECS`, `CHUNKFLOW_POLL_PERIOD_SECS`
    /// - `CHUNKFLOW_POLL_DEADLINE_SECS`: `0` disables the deadline
    /// - `CHUNKFLOW_DISCOVERY_STRATEGY`: `fixed_wait` or `await_original`
    /// - `CHUNKFLOW_DISCOVERY_INITIAL_WAIT_SECS`, `CHUNKFLOW_DISCOVERY_RETRY_WAIT_SECS`
    /// - `CHUNKFLOW_DISCOVERY_RETRIES`
    /// - `CHUNKFLOW_OUTPUT`: output file path (stdout when unset)
    /// - `CHUNKFLOW_OUTPUT_GZIP`, `CHUNKFLOW_DEDUPE_HEADERS`: true/false
    /// - `CHUNKFLOW_SINK_CAPACITY`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(size) = env_parse::<u32>("CHUNKFLOW_CHUNK_SIZE")? {
            config.chunk_size = (size > 0).then_some(size);
        }
        if let Ok(mode) = std::env::var("CHUNKFLOW_CONCURRENCY") {
            config.concurrency = match mode.to_lowercase().as_str() {
                "parallel" => ConcurrencyMode::Parallel,
                "serial" => ConcurrencyMode::Serial,
                _ => return Err(ChunkflowError::invalid_value("CHUNKFLOW_CONCURRENCY", mode)),
            };
        }
        if let Some(workers) = env_parse("CHUNKFLOW_WORKERS")? {
            config.worker_pool_size = workers;
        }
        if let Some(secs) = env_parse("CHUNKFLOW_POLL_INITIAL_DELAY_SECS")? {
            config.poll.initial_delay_secs = secs;
        }
        if let Some(secs) = env_parse("CHUNKFLOW_POLL_PERIOD_SECS")? {
            config.poll.period_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("CHUNKFLOW_POLL_DEADLINE_SECS")? {
            config.poll.deadline_secs = (secs > 0).then_some(secs);
        }
        if let Ok(strategy) = std::env::var("CHUNKFLOW_DISCOVERY_STRATEGY") {
            config.discovery.strategy = strategy.parse()?;
        }
        if let Some(secs) = env_parse("CHUNKFLOW_DISCOVERY_INITIAL_WAIT_SECS")? {
            config.discovery.initial_wait_secs = secs;
        }
        if let Some(secs) = env_parse("CHUNKFLOW_DISCOVERY_RETRY_WAIT_SECS")? {
            config.discovery.retry_wait_secs = secs;
        }
        if let Some(retries) = env_parse("CHUNKFLOW_DISCOVERY_RETRIES")? {
            config.discovery.retries = retries;
        }
        if let Ok(path) = std::env::var("CHUNKFLOW_OUTPUT") {
            config.output.path = Some(PathBuf::from(path));
        }
        if let Some(gzip) = env_parse("CHUNKFLOW_OUTPUT_GZIP")? {
            config.output.gzip = gzip;
        }
        if let Some(dedupe) = env_parse("CHUNKFLOW_DEDUPE_HEADERS")? {
            config.output.dedupe_headers = dedupe;
        }
        if let Some(capacity) = env_parse("CHUNKFLOW_SINK_CAPACITY")? {
            config.output.sink_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll.period_secs == 0 {
            return Err(ChunkflowError::config("poll period must be greater than 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(ChunkflowError::config("worker pool size must be greater than 0"));
        }
        if self.output.sink_capacity == 0 {
            return Err(ChunkflowError::config("sink capacity must be greater than 0"));
        }
        if let Some(deadline) = self.poll.deadline_secs {
            if deadline < self.poll.period_secs {
                return Err(ChunkflowError::config(format!(
                    "poll deadline ({deadline}s) is shorter than the poll period ({}s)",
                    self.poll.period_secs
                )));
            }
        }
        if self.output.gzip && self.output.path.is_none() {
            return Err(ChunkflowError::config("gzip output requires an output file"));
        }
        Ok(())
    }

    /// Pool size for a run over `chunk_count` chunks
    ///
    /// Serial jobs always use one worker; otherwise the configured size,
    /// never more than the number of chunks and never less than one.
    pub fn effective_pool_size(&self, chunk_count: usize) -> usize {
        let configured = match self.concurrency {
            ConcurrencyMode::Serial => 1,
            ConcurrencyMode::Parallel => self.worker_pool_size,
        };
        configured.min(chunk_count).max(1)
    }
}
