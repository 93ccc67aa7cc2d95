//! Live per-file byte progress.
//!
//! A [`CountingReader`] sits between the download and the upload and bumps a
//! shared counter; a [`ProgressFlusher`] task copies that counter to the run
//! row on a fixed interval and once more when the file is done.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::RunStore;

/// Pass-through reader counting every byte handed to the consumer.
pub struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, counter: Arc<AtomicU64>) -> Self {
        Self { inner, counter }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                this.counter.fetch_add(read, Ordering::Relaxed);
            }
        }
        result
    }
}

/// Background task writing the current file's byte count to the run.
pub struct ProgressFlusher {
    counter: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    store: Arc<dyn RunStore>,
    run_id: String,
}

impl ProgressFlusher {
    pub fn start(store: Arc<dyn RunStore>, run_id: &str, interval: Duration) -> Self {
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task_counter = counter.clone();
        let task_cancel = cancel.clone();
        let task_store = store.clone();
        let task_run_id = run_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            let mut last = 0u64;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let bytes = task_counter.load(Ordering::Relaxed);
                        if bytes == last {
                            continue;
                        }
                        if let Err(e) = task_store.record_file_bytes(&task_run_id, bytes).await {
                            warn!(error = %e, "Failed to record transfer progress");
                        }
                        last = bytes;
                    }
                }
            }
        });

        Self {
            counter,
            cancel,
            handle,
            store,
            run_id: run_id.to_string(),
        }
    }

    pub fn counter(&self) -> Arc<AtomicU64> {
        self.counter.clone()
    }

    /// Stops the timer, writes the final count and returns it.
    pub async fn finish(self) -> u64 {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress flusher task failed");
        }
        let bytes = self.counter.load(Ordering::Relaxed);
        if let Err(e) = self.store.record_file_bytes(&self.run_id, bytes).await {
            warn!(error = %e, "Failed to record final transfer progress");
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseError;
    use crate::model::{
        Connection, Job, JobRun, JobStatus, NewTransferLog, RunOutcome, RunProgress,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct ByteRecorder {
        writes: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl RunStore for ByteRecorder {
        async fn find_job(&self, _: &str) -> Result<Option<Job>, DatabaseError> {
            Ok(None)
        }
        async fn find_connection(&self, _: &str) -> Result<Option<Connection>, DatabaseError> {
            Ok(None)
        }
        async fn set_job_status(&self, _: &str, _: JobStatus) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn create_run(&self, _: &JobRun) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn record_totals(&self, _: &str, _: u64, _: u64) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn record_progress(&self, _: &str, _: &RunProgress) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn record_file_bytes(&self, _: &str, bytes: u64) -> Result<(), DatabaseError> {
            self.writes.lock().unwrap().push(bytes);
            Ok(())
        }
        async fn complete_run(&self, _: &str, _: &RunOutcome) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn append_log(&self, _: &NewTransferLog) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_counting_reader_counts_every_byte() {
        let counter = Arc::new(AtomicU64::new(0));
        let data = vec![1u8; 100_000];
        let mut reader = CountingReader::new(std::io::Cursor::new(data), counter.clone());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();

        assert_eq!(sink.len(), 100_000);
        assert_eq!(counter.load(Ordering::Relaxed), 100_000);
    }

    #[tokio::test]
    async fn test_finish_writes_final_count() {
        let store = Arc::new(ByteRecorder::default());
        let flusher = ProgressFlusher::start(store.clone(), "run-1", Duration::from_secs(60));
        flusher.counter().fetch_add(42, Ordering::Relaxed);

        assert_eq!(flusher.finish().await, 42);
        assert_eq!(store.writes.lock().unwrap().last(), Some(&42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval_only_when_changed() {
        let store = Arc::new(ByteRecorder::default());
        let flusher = ProgressFlusher::start(store.clone(), "run-1", Duration::from_millis(500));
        let counter = flusher.counter();

        counter.fetch_add(10, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(600)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        counter.fetch_add(5, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let final_count = flusher.finish().await;
        assert_eq!(final_count, 15);
        assert_eq!(*store.writes.lock().unwrap(), vec![10, 15, 15]);
    }
}
