//! Chunkflow Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Orchestrates chunked bulk query jobs against a remote job service.
//!
//! A large query is split by the service into chunk batches. The engine
//! discovers those batches, polls each one until it is terminal, streams
//! the result pages of completed chunks and merges everything into a
//! single output. One failing chunk never stops the others.
//!
//! # Components
//!
//! - [`discovery::ChunkDiscovery`]: finds the chunk batches of a job
//! - [`poller::BatchPoller`]: polls one chunk to a terminal state
//! - [`pool::WorkerPool`]: bounded fan-out of chunk pipelines
//! - [`fetcher::ResultFetcher`]: streams result pages as records
//! - [`sink::ResultSink`]: single writer of the merged output
//! - [`coordinator::JobCoordinator`]: runs a job end to end
//!
//! The remote service sits behind [`client::RemoteJobClient`].
//! [`scripted::ScriptedClient`] is an in-memory implementation used by
//! the `simulate` command and tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chunkflow_engine::config::EngineConfig;
//! use chunkflow_engine::coordinator::JobCoordinator;
//! use chunkflow_engine::scripted::{Scenario, ScriptedClient};
//! use chunkflow_engine::sink::OutputTarget;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scenario = Scenario::load("scenarios/accounts.json")?;
//!     let query = scenario.query.clone();
//!     let object = scenario.object.clone();
//!
//!     let coordinator = JobCoordinator::new(
//!         Arc::new(ScriptedClient::new(scenario)),
//!         EngineConfig::from_env()?,
//!     );
//!     let spec = coordinator.job_spec(object);
//!     let report = coordinator.run(&spec, &query, OutputTarget::Stdout).await?;
//!     report.log_summary();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod poller;
pub mod pool;
pub mod report;
pub mod scripted;
pub mod sink;
pub mod types;

pub use client::{ByteStream, RemoteJobClient, ServiceError};
pub use config::EngineConfig;
pub use coordinator::JobCoordinator;
pub use error::{ChunkFailure, OrchestrationError};
pub use report::{ChunkReport, RunReport};
pub use sink::OutputTarget;
pub use types::{Chunk, ChunkStatus, Job, JobSpec, Record};
