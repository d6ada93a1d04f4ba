//! Merged result output
//!
//! Every chunk pipeline pushes records into one bounded channel; a single
//! consumer task owns the writer and drains the channel. Records from
//! different chunks interleave in arrival order.
//!
//! When the writer fails the consumer exits and drops the receiver, so
//! blocked producers see the channel close instead of waiting forever.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::OutputConfig;
use crate::error::SinkError;
use crate::types::Record;

/// Compressed bytes buffered before they are written out
const GZIP_FLUSH_BYTES: usize = 64 * 1024;

/// Where merged output goes
pub enum OutputTarget {
    Stdout,
    File { path: PathBuf, gzip: bool },
    /// Any async writer, e.g. a pipe to a downstream process
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl OutputTarget {
    pub fn from_config(config: &OutputConfig) -> Self {
        match &config.path {
            Some(path) => OutputTarget::File {
                path: path.clone(),
                gzip: config.gzip,
            },
            None => OutputTarget::Stdout,
        }
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("Stdout"),
            OutputTarget::File { path, gzip } => f
                .debug_struct("File")
                .field("path", path)
                .field("gzip", gzip)
                .finish(),
            OutputTarget::Writer(_) => f.write_str("Writer"),
        }
    }
}

/// Sink behaviour
#[derive(Debug, Clone, Copy)]
pub struct SinkOptions {
    pub capacity: usize,
    pub dedupe_headers: bool,
}

impl From<&OutputConfig> for SinkOptions {
    fn from(config: &OutputConfig) -> Self {
        Self {
            capacity: config.sink_capacity.max(1),
            dedupe_headers: config.dedupe_headers,
        }
    }
}

/// What the consumer wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub lines_written: u64,
    pub headers_dropped: u64,
}

/// The sink stopped accepting records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Producer side of the sink; cheap to clone, one per pipeline
#[derive(Clone)]
pub struct SinkSender {
    tx: mpsc::Sender<Record>,
}

impl SinkSender {
    /// Queue one record, waiting while the channel is full
    pub async fn send(&self, record: Record) -> Result<(), SinkClosed> {
        self.tx.send(record).await.map_err(|_| SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has stopped
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Single-consumer writer of the merged stream
pub struct ResultSink {
    tx: mpsc::Sender<Record>,
    consumer: JoinHandle<Result<SinkSummary, SinkError>>,
}

impl ResultSink {
    /// Open `target` and start the consumer task
    pub async fn open(target: OutputTarget, options: SinkOptions) -> Result<Self, SinkError> {
        let (writer, gzip): (Box<dyn AsyncWrite + Send + Unpin>, bool) = match target {
            OutputTarget::Stdout => (Box::new(tokio::io::stdout()), false),
            OutputTarget::File { path, gzip } => {
                let file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|source| SinkError::Open {
                        path: path.display().to_string(),
                        source,
                    })?;
                info!(path = %path.display(), gzip, "Writing merged results to file");
                (Box::new(file), gzip)
            },
            OutputTarget::Writer(writer) => (writer, false),
        };

        Ok(Self::spawn(OutputWriter::new(writer, gzip), options))
    }

    fn spawn(writer: OutputWriter, options: SinkOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.capacity);
        let consumer = tokio::spawn(drain(rx, writer, options.dedupe_headers));
        Self { tx, consumer }
    }

    pub fn sender(&self) -> SinkSender {
        SinkSender {
            tx: self.tx.clone(),
        }
    }

    /// Close the producer side and wait for the consumer to flush
    ///
    /// Every [`SinkSender`] must be dropped first, otherwise this waits for
    /// them.
    pub async fn finish(self) -> Result<SinkSummary, SinkError> {
        let Self { tx, consumer } = self;
        drop(tx);

        match consumer.await {
            Ok(result) => result,
            Err(e) => Err(SinkError::Panicked(e.to_string())),
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Record>,
    mut writer: OutputWriter,
    dedupe_headers: bool,
) -> Result<SinkSummary, SinkError> {
    let mut summary = SinkSummary::default();
    let mut header_written = false;

    while let Some(record) = rx.recv().await {
        if dedupe_headers && record.is_header {
            if header_written {
                summary.headers_dropped += 1;
                continue;
            }
            header_written = true;
        }

        if let Err(e) = writer.write_line(&record.line).await {
            error!(error = %e, lines_written = summary.lines_written, "Merged output write failed");
            return Err(e.into());
        }
        summary.lines_written += 1;
    }

    writer.finish().await?;
    debug!(lines = summary.lines_written, dropped = summary.headers_dropped, "Sink drained");
    Ok(summary)
}

/// Line writer with optional gzip framing
///
/// Compression runs in memory; compressed bytes are handed to the async
/// writer in blocks.
struct OutputWriter {
    inner: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
    gzip: Option<GzEncoder<Vec<u8>>>,
}

impl OutputWriter {
    fn new(writer: Box<dyn AsyncWrite + Send + Unpin>, gzip: bool) -> Self {
        Self {
            inner: BufWriter::new(writer),
            gzip: gzip.then(|| GzEncoder::new(Vec::new(), Compression::default())),
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match &mut self.gzip {
            Some(encoder) => {
                encoder.write_all(line.as_bytes())?;
                encoder.write_all(b"\n")?;
                if encoder.get_ref().len() >= GZIP_FLUSH_BYTES {
                    let block = std::mem::take(encoder.get_mut());
                    self.inner.write_all(&block).await?;
                }
            },
            None => {
                self.inner.write_all(line.as_bytes()).await?;
                self.inner.write_all(b"\n").await?;
            },
        }
        Ok(())
    }

    async fn finish(mut self) -> std::io::Result<()> {
        if let Some(encoder) = self.gzip.take() {
            let tail = encoder.finish()?;
            self.inner.write_all(&tail).await?;
        }
        self.inner.flush().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer that rejects every write
    struct BrokenPipe;

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

    fn options(dedupe_headers: bool) -> SinkOptions {
        SinkOptions {
            capacity: 4,
            dedupe_headers,
        }
    }

    #[tokio::test]
    async fn test_file_sink_writes_lines_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.csv");
        let sink = ResultSink::open(
            OutputTarget::File {
                path: path.clone(),
                gzip: false,
            },
            options(false),
        )
        .await
        .unwrap();

        let sender = sink.sender();
        sender.send(Record::header("Id,Name")).await.unwrap();
        sender.send(Record::row("001,Acme")).await.unwrap();
        sender.send(Record::header("Id,Name")).await.unwrap();
        drop(sender);

        let summary = sink.finish().await.unwrap();
        assert_eq!(summary.lines_written, 3);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Id,Name\n001,Acme\nId,Name\n"
        );
    }

    #[tokio::test]
    async fn test_dedupe_keeps_first_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.csv");
        let sink = ResultSink::open(
            OutputTarget::File {
                path: path.clone(),
                gzip: false,
            },
            options(true),
        )
        .await
        .unwrap();

        let sender = sink.sender();
        for record in [
            Record::header("Id,Name"),
            Record::row("001,Acme"),
            Record::header("Id,Name"),
            Record::row("002,Globex"),
        ] {
            sender.send(record).await.unwrap();
        }
        drop(sender);

        let summary = sink.finish().await.unwrap();
        assert_eq!(summary.lines_written, 3);
        assert_eq!(summary.headers_dropped, 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Id,Name\n001,Acme\n002,Globex\n"
        );
    }

    #[tokio::test]
    async fn test_gzip_output_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.csv.gz");
        let sink = ResultSink::open(
            OutputTarget::File {
                path: path.clone(),
                gzip: true,
            },
            options(false),
        )
        .await
        .unwrap();

        let sender = sink.sender();
        sender.send(Record::header("Id,Phone")).await.unwrap();
        sender.send(Record::row("001,555-0100")).await.unwrap();
        drop(sender);
        sink.finish().await.unwrap();

        let compressed = std::fs::read(&path).unwrap();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "Id,Phone\n001,555-0100\n");
    }

    #[tokio::test]
    async fn test_write_fault_closes_producers() {
        let sink = ResultSink::open(OutputTarget::Writer(Box::new(BrokenPipe)), options(false))
            .await
            .unwrap();
        let sender = sink.sender();

        // BufWriter absorbs small writes; keep sending until the failure
        // surfaces and the consumer drops the receiver.
        let mut closed = false;
        for i in 0..100_000 {
            if sender.send(Record::row(format!("{i:08},{}", "x".repeat(64)))).await.is_err() {
                closed = true;
                break;
            }
        }
        assert!(closed, "producer never observed the closed sink");
        assert!(sender.is_closed());
        sender.closed().await;
        drop(sender);

        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, SinkError::Write(_)));
    }

    #[tokio::test]
    async fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("result.csv");
        let err = ResultSink::open(OutputTarget::File { path, gzip: false }, options(false))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SinkError::Open { .. }));
    }
}
