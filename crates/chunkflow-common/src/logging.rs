//! Logging setup
//!
//! All chunkflow binaries log through `tracing`. Events go to stderr, to a
//! daily-rotated file, or both, as text or JSON.
//!
//! Console output is written to **stderr**: stdout is reserved for the
//! merged result stream when the sink targets the console.
//!
//! # Example
//!
//! ```no_run
//! use chunkflow_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> chunkflow_common::Result<()> {
//!     let config = LogConfig::for_cli(false).with_env()?;
//!     let _guard = init_logging(&config)?;
//!
//!     info!(job_id = "750x0000000005LAAQ", "Job submitted");
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{ChunkflowError, Result};

/// Default directory for rotated log files
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Default file name prefix for rotated log files
pub const DEFAULT_LOG_FILE_PREFIX: &str = "chunkflow";

/// Daily-rotated log files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLog {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for FileLog {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
        }
    }
}

/// Where and how events are written
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Write events to stderr
    pub console: bool,
    /// Also (or only) write events to rotated files
    pub file: Option<FileLog>,
    /// One JSON object per event instead of text lines
    pub json: bool,
    /// Extra `EnvFilter` directives, e.g. `chunkflow_engine::poller=trace`
    pub directives: Vec<String>,
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            console: true,
            file: None,
            json: false,
            directives: Vec::new(),
            source_location: false,
        }
    }
}

impl LogConfig {
    /// Console logging at info, or debug when `verbose`
    pub fn for_cli(verbose: bool) -> Self {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        Self::default().with_level(level)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_file(mut self, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.file = Some(FileLog {
            dir: dir.into(),
            prefix: prefix.into(),
        });
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Overlay `LOG_*` environment variables
    ///
    /// - `LOG_LEVEL`: trace, debug, info, warn, error
    /// - `LOG_OUTPUT`: console, file, both
    /// - `LOG_FORMAT`: text, json
    /// - `LOG_DIR`, `LOG_FILE_PREFIX`: rotated file location
    /// - `LOG_FILTER`: comma-separated filter directives
    /// - `LOG_INCLUDE_LOCATION`: true/false
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.level = Level::from_str(level.trim())
                .map_err(|_| ChunkflowError::invalid_value("LOG_LEVEL", level))?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            let (console, file) = match output.trim().to_lowercase().as_str() {
                "console" | "stderr" => (true, false),
                "file" => (false, true),
                "both" | "all" => (true, true),
                _ => return Err(ChunkflowError::invalid_value("LOG_OUTPUT", output)),
            };
            let existing = self.file.take();
            self.console = console;
            self.file = file.then(|| existing.unwrap_or_default());
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.json = match format.trim().to_lowercase().as_str() {
                "text" | "pretty" => false,
                "json" => true,
                _ => return Err(ChunkflowError::invalid_value("LOG_FORMAT", format)),
            };
        }

        if let Some(file) = self.file.as_mut() {
            if let Ok(dir) = std::env::var("LOG_DIR") {
                file.dir = PathBuf::from(dir);
            }
            if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
                file.prefix = prefix;
            }
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            self.directives.extend(
                filter
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            );
        }

        if let Ok(val) = std::env::var("LOG_INCLUDE_LOCATION") {
            self.source_location = val.trim().eq_ignore_ascii_case("true");
        }

        Ok(self)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());

        for raw in &self.directives {
            let directive: Directive = raw
                .parse()
                .map_err(|_| ChunkflowError::invalid_value("log filter directive", raw.as_str()))?;
            filter = filter.add_directive(directive);
        }

        Ok(filter)
    }
}

/// Keeps the non-blocking file writer alive
///
/// Dropping the guard flushes buffered log lines. Hold it until `main`
/// returns.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn event_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi && !config.json)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(FmtSpan::CLOSE);

    if config.json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Install the global tracing subscriber
///
/// Call once at startup. Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console {
        layers.push(event_layer(config, std::io::stderr, true));
    }

    if let Some(file) = &config.file {
        std::fs::create_dir_all(&file.dir)?;
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(&file.dir, &file.prefix));
        layers.push(event_layer(config, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ChunkflowError::config(format!("tracing subscriber already installed: {e}")))?;

    Ok(LoggingGuard { _file: guard })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_levels() {
        assert_eq!(LogConfig::for_cli(false).level, Level::INFO);
        assert_eq!(LogConfig::for_cli(true).level, Level::DEBUG);
        assert!(LogConfig::for_cli(true).console);
    }

    #[test]
    fn test_chained_settings() {
        let config = LogConfig::default()
            .with_json(true)
            .with_file("/var/log/chunkflow", "sim")
            .with_directive("chunkflow_engine::poller=trace");

        assert!(config.json);
        assert_eq!(
            config.file,
            Some(FileLog {
                dir: PathBuf::from("/var/log/chunkflow"),
                prefix: "sim".to_string(),
            })
        );
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_bad_filter_directive_is_rejected() {
        let config = LogConfig::default().with_directive("chunkflow_engine=notalevel");
        assert!(matches!(
            config.env_filter(),
            Err(ChunkflowError::InvalidValue { .. })
        ));
    }
}
