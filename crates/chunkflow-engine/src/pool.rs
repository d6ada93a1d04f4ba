//! Bounded fan-out of chunk pipelines
//!
//! Pipelines run as futures polled by one `buffer_unordered` stream, so at
//! most `size` of them are in flight and results arrive in completion
//! order. Dropping the stream drops every pipeline still running.

use futures::stream::{self, Stream, StreamExt};
use std::future::Future;

use crate::types::Chunk;

/// Per-run worker pool
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// Create a pool; a size of zero is raised to one
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `pipeline` once per chunk, yielding results as they complete
    ///
    /// A pipeline returns its result rather than an error, so one failing
    /// chunk never stops the others.
    pub fn run_all<F, Fut, T>(
        &self,
        chunks: Vec<Chunk>,
        pipeline: F,
    ) -> impl Stream<Item = T> + Send
    where
        F: FnMut(Chunk) -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        stream::iter(chunks).map(pipeline).buffer_unordered(self.size)
    }

    /// Run every pipeline and gather all results
    pub async fn collect_all<F, Fut, T>(&self, chunks: Vec<Chunk>, pipeline: F) -> Vec<T>
    where
        F: FnMut(Chunk) -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        self.run_all(chunks, pipeline).collect().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ChunkStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|i| Chunk::new(format!("751x{i:03}"), "750x001", ChunkStatus::Queued, i + 1))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_size() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .collect_all(chunks(10), |chunk| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(chunk.ordinal as u64)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    chunk.id
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let pool = WorkerPool::new(2);
        let results = pool
            .collect_all(chunks(2), |chunk| async move {
                // First chunk finishes last
                let secs = if chunk.ordinal == 1 { 30 } else { 1 };
                tokio::time::sleep(Duration::from_secs(secs)).await;
                chunk.ordinal
            })
            .await;

        assert_eq!(results, vec![2, 1]);
    }

    #[test]
    fn test_zero_size_is_raised() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
