//! Batching span writer.
//!
//! Producers hand spans to a bounded queue; a single background task owns
//! the live batch and is the only code that touches it. The task flushes the
//! batch through a [`SpanPersister`] when:
//!
//! - the batch reaches `batch_size` spans,
//! - the flush timer fires, the batch is non-empty and more than
//!   `flush_interval` has passed since the last flush, or
//! - a close request arrives and the batch is non-empty.
//!
//! A failed flush is logged and the batch is dropped. Producers never see
//! storage errors: `submit` has already returned by the time a flush runs.
//!
//! Close requests travel through the same queue as spans, so every span
//! submitted before [`SpanWriter::close`] is flushed before the task exits.

use super::persister::SpanPersister;
use crate::core::{Result, Span, TraceStoreError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Flush thresholds for a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Spans per batch; also the hand-off queue capacity.
    pub batch_size: usize,
    /// Longest a partial batch waits for more spans.
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Counters describing a writer's lifetime activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Spans accepted by `submit`
    pub spans_received: u64,
    /// Spans persisted successfully
    pub spans_flushed: u64,
    /// Successful flushes
    pub batches_flushed: u64,
    /// Flushes that failed and were dropped
    pub failed_flushes: u64,
    /// Spans lost to failed flushes or submitted after shutdown began
    pub spans_dropped: u64,
}

#[derive(Default)]
struct Counters {
    spans_received: AtomicU64,
    spans_flushed: AtomicU64,
    batches_flushed: AtomicU64,
    failed_flushes: AtomicU64,
    spans_dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            spans_received: self.spans_received.load(Ordering::Relaxed),
            spans_flushed: self.spans_flushed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
        }
    }
}

enum WriterCommand {
    Span(Box<Span>),
    Close,
}

/// Asynchronous batching writer with one background worker.
pub struct SpanWriter {
    tx: mpsc::Sender<WriterCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl SpanWriter {
    /// Starts the background worker on the current tokio runtime.
    pub fn new(persister: SpanPersister, config: WriterConfig) -> Self {
        let config = WriterConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        let (tx, rx) = mpsc::channel(config.batch_size);
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_batch_writer(persister, rx, config, Arc::clone(&counters)));

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            counters,
        }
    }

    /// Queues a span for persistence.
    ///
    /// Waits only while the hand-off queue is full. Fails with
    /// [`TraceStoreError::WriterClosed`] once the writer is closed.
    pub async fn submit(&self, span: Span) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TraceStoreError::WriterClosed);
        }
        self.tx
            .send(WriterCommand::Span(Box::new(span)))
            .await
            .map_err(|_| TraceStoreError::WriterClosed)?;
        self.counters.spans_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes any partial batch, stops the worker and releases its store
    /// handle. Later calls return immediately.
    pub async fn close(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        self.closed.store(true, Ordering::Release);
        if self.tx.send(WriterCommand::Close).await.is_err() {
            tracing::warn!("Span writer worker stopped before close was requested");
        }
        handle.await?;
        Ok(())
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current counters.
    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }
}

async fn run_batch_writer(
    persister: SpanPersister,
    mut rx: mpsc::Receiver<WriterCommand>,
    config: WriterConfig,
    counters: Arc<Counters>,
) {
    let mut batch: Vec<Span> = Vec::with_capacity(config.batch_size);
    let mut timer =
        tokio::time::interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_flush = Instant::now();

    loop {
        let (flush, finish) = tokio::select! {
            command = rx.recv() => match command {
                Some(WriterCommand::Span(span)) => {
                    batch.push(*span);
                    let full = batch.len() >= config.batch_size;
                    if full {
                        tracing::debug!(size = batch.len(), "Flush due to batch size");
                    }
                    (full, false)
                }
                Some(WriterCommand::Close) | None => {
                    tracing::debug!(size = batch.len(), "Span writer shutting down");
                    (!batch.is_empty(), true)
                }
            },
            _ = timer.tick() => {
                let due = !batch.is_empty() && last_flush.elapsed() > config.flush_interval;
                if due {
                    tracing::debug!(size = batch.len(), "Flush due to timer");
                }
                (due, false)
            }
        };

        if flush {
            let spans = std::mem::replace(&mut batch, Vec::with_capacity(config.batch_size));
            flush_batch(&persister, &spans, &counters).await;
            last_flush = Instant::now();
        }

        if finish {
            break;
        }
    }

    // Anything still queued raced with close.
    rx.close();
    let mut late = 0u64;
    while rx.try_recv().is_ok() {
        late += 1;
    }
    if late > 0 {
        counters.spans_dropped.fetch_add(late, Ordering::Relaxed);
        tracing::warn!(count = late, "Dropped spans submitted during shutdown");
    }

    drop(persister);
    tracing::debug!("Span writer stopped");
}

async fn flush_batch(persister: &SpanPersister, spans: &[Span], counters: &Counters) {
    let size = spans.len() as u64;
    match persister.write_batch(spans).await {
        Ok(()) => {
            counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
            counters.spans_flushed.fetch_add(size, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
            counters.spans_dropped.fetch_add(size, Ordering::Relaxed);
            tracing::error!(error = %e, size, "Could not write a batch of spans");
        }
    }
}
