//! Background ingestion queue.
//!
//! A fixed worker pool drains a job channel, giving at-least-once
//! processing with bounded concurrency: the pool size caps in-flight work
//! while excess submissions queue up and are acknowledged immediately with
//! a job id. Failed jobs retry with bounded exponential backoff; jobs that
//! exhaust retries or blow the wall-clock budget stay `failed` with their
//! diagnostics preserved. Redelivery is safe because processing is
//! idempotent per document.

use crate::embedding::Embedder;
use crate::error::{Error, IngestError, Result};
use crate::ingest::process_document;
use crate::storage::SqliteStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Queue configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Worker threads (the in-flight cap).
    pub workers: usize,
    /// Retry attempts after the first failure.
    pub max_retries: u32,
    /// Base backoff delay; doubles per attempt.
    pub backoff: Duration,
    /// Total wall-clock budget per job.
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 2,
            backoff: Duration::from_millis(100),
            // Operational default: ten minutes per document
            timeout: Duration::from_secs(600),
        }
    }
}

/// An ingestion job: the document to process and its raw bytes.
#[derive(Debug)]
pub struct IngestJob {
    /// Job id assigned at submission.
    pub job_id: u64,
    /// Target document.
    pub document_id: i64,
    /// Raw document bytes.
    pub bytes: Vec<u8>,
}

/// Background ingestion queue with a fixed worker pool.
///
/// Each worker opens its own store connection against the shared database
/// path; the embedding client is shared.
pub struct IngestQueue {
    sender: Option<Sender<IngestJob>>,
    handles: Vec<JoinHandle<()>>,
    next_job_id: AtomicU64,
}

impl IngestQueue {
    /// Starts the queue with `config.workers` workers against the given
    /// database path.
    ///
    /// # Errors
    ///
    /// Returns an error when a worker store cannot be opened.
    pub fn start(
        db_path: PathBuf,
        embedder: Arc<dyn Embedder>,
        config: QueueConfig,
    ) -> Result<Self> {
        let (sender, receiver) = channel::<IngestJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(config.workers.max(1));
        for worker_id in 0..config.workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let embedder = Arc::clone(&embedder);
            let db_path = db_path.clone();
            // Open eagerly so startup surfaces connection errors
            let store = SqliteStore::open(&db_path)?;
            handles.push(std::thread::spawn(move || {
                worker_loop(worker_id, store, &receiver, embedder.as_ref(), config);
            }));
        }

        Ok(Self {
            sender: Some(sender),
            handles,
            next_job_id: AtomicU64::new(1),
        })
    }

    /// Submits a job. Returns immediately with the job id; the work is
    /// accepted for later processing when all workers are busy.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue has shut down.
    pub fn submit(&self, document_id: i64, bytes: Vec<u8>) -> Result<u64> {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let sender = self.sender.as_ref().ok_or_else(|| {
            Error::from(IngestError::QueueFull {
                capacity: self.handles.len(),
            })
        })?;
        sender
            .send(IngestJob {
                job_id,
                document_id,
                bytes,
            })
            .map_err(|_| {
                Error::from(IngestError::QueueFull {
                    capacity: self.handles.len(),
                })
            })?;
        Ok(job_id)
    }

    /// Stops accepting jobs, drains the channel, and joins the workers.
    pub fn shutdown(mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    mut store: SqliteStore,
    receiver: &Mutex<Receiver<IngestJob>>,
    embedder: &dyn Embedder,
    config: QueueConfig,
) {
    loop {
        let job = {
            let Ok(guard) = receiver.lock() else {
                return;
            };
            guard.recv()
        };
        let Ok(job) = job else {
            // Channel closed; drain complete
            return;
        };

        info!(worker_id, job.job_id, job.document_id, "ingest job started");
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            match process_document(&mut store, embedder, job.document_id, &job.bytes) {
                Ok(report) => {
                    info!(
                        worker_id,
                        job.job_id,
                        chunks = report.chunks_created,
                        "ingest job completed"
                    );
                    break;
                }
                Err(e) => {
                    if started.elapsed() >= config.timeout {
                        error!(worker_id, job.job_id, error = %e, "ingest job timed out");
                        record_timeout(&mut store, job.document_id, config.timeout);
                        break;
                    }
                    if attempt >= config.max_retries {
                        error!(
                            worker_id,
                            job.job_id,
                            attempts = attempt + 1,
                            error = %e,
                            "ingest job failed permanently"
                        );
                        break;
                    }
                    attempt += 1;
                    let delay = config.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(worker_id, job.job_id, attempt, error = %e, "ingest retry");
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

/// Records a timeout on the failed document row, preserving diagnostics.
fn record_timeout(store: &mut SqliteStore, document_id: i64, timeout: Duration) {
    use crate::core::DocumentStatus;
    use crate::storage::Store;

    let metadata = serde_json::json!({
        "error": Error::from(IngestError::Timeout {
            seconds: timeout.as_secs(),
        })
        .to_string(),
    });
    if let Err(e) = store.update_document_status(document_id, DocumentStatus::Failed, Some(&metadata))
    {
        // Nothing left to do but log; the row keeps its previous state
        error!(document_id, error = %e, "failed to record ingest timeout");
    }
}
