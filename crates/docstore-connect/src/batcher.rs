//! The insertion batcher.
//!
//! Turns a stream of individually-submitted documents into size- and
//! time-bounded batch writes against the store. Documents are enqueued
//! without blocking on network I/O; a coordinator task accumulates them
//! and hands full batches to a bounded worker pool. A periodic flush task
//! sweeps partial batches so documents never get stuck waiting for the
//! size threshold.
//!
//! Batch failures are asynchronous by design: `insert()` has already
//! returned by the time the physical write runs, so a failed batch is
//! logged with its URIs and cause and counted, never propagated. There is
//! no retry — callers needing at-least-once delivery must layer it above
//! this crate.

use crate::client::{DocumentStore, DocumentWrite, WriteBatch};
use crate::config::WriteConfig;
use crate::connection::Connection;
use crate::error::{ConnectorError, Result};
use crate::metadata::DocumentMetadata;
use crate::signature::BatcherSignature;
use crate::transform::ServerTransform;
use crate::types::JobTicket;
use bytes::Bytes;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

enum BatcherMessage {
    Document(DocumentWrite),
    Flush,
}

/// Buffers documents for one write configuration and drains them to the
/// store in batches.
///
/// Created lazily by
/// [`Connection::get_or_create_insertion_batcher`](crate::Connection::get_or_create_insertion_batcher);
/// at most one live batcher exists per distinct configuration per
/// connection.
#[derive(Debug)]
pub struct InsertionBatcher {
    signature: BatcherSignature,
    job: JobTicket,
    metadata: Arc<DocumentMetadata>,
    queue: Mutex<Option<mpsc::Sender<BatcherMessage>>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
    needs_reinit: AtomicBool,
    writes_so_far: Arc<AtomicU64>,
    batches_failed: Arc<AtomicU64>,
    connection: Weak<Connection>,
}

impl InsertionBatcher {
    /// Start a batcher for one write configuration.
    ///
    /// Validates the transform parameter list before anything is spawned
    /// or cached, builds the metadata template once, starts the
    /// coordinator and (when the interval is non-zero) the periodic flush
    /// task.
    pub(crate) fn new(
        connection: Weak<Connection>,
        store: Arc<dyn DocumentStore>,
        config: &WriteConfig,
        signature: BatcherSignature,
    ) -> Result<Self> {
        let transform = ServerTransform::from_write_config(config)?;
        let metadata = Arc::new(DocumentMetadata::from_delimited(
            &config.collections,
            &config.permissions,
            config.quality,
        ));
        let temporal_collection = config.temporal_collection().map(str::to_string);
        let job = JobTicket::new(&config.job_name);

        // Enough room for every worker to have a full batch in flight
        // plus one being accumulated, capped so a huge batch size cannot
        // balloon the queue.
        let capacity = config
            .batch_size
            .saturating_mul(config.thread_count + 1)
            .min(65_536)
            .max(config.batch_size);
        let (tx, rx) = mpsc::channel(capacity);

        let writes_so_far = Arc::new(AtomicU64::new(0));
        let batches_failed = Arc::new(AtomicU64::new(0));

        let coordinator = Coordinator {
            rx,
            store,
            metadata: metadata.clone(),
            transform,
            temporal_collection,
            batch_size: config.batch_size,
            workers: Arc::new(Semaphore::new(config.thread_count)),
            writes_so_far: writes_so_far.clone(),
            batches_failed: batches_failed.clone(),
            job_id: job.job_id().to_string(),
        };
        let coordinator = tokio::spawn(coordinator.run());

        let flush_task = if config.flush_interval_secs > 0 {
            info!(
                job_id = %job.job_id(),
                every_secs = config.flush_interval_secs,
                "scheduling periodic batch flush"
            );
            Some(tokio::spawn(run_periodic_flush(
                tx.downgrade(),
                Duration::from_secs(config.flush_interval_secs),
                job.job_id().to_string(),
            )))
        } else {
            None
        };

        info!(
            job_name = %job.job_name(),
            job_id = %job.job_id(),
            signature = %signature,
            batch_size = config.batch_size,
            thread_count = config.thread_count,
            "insertion batcher started"
        );

        Ok(Self {
            signature,
            job,
            metadata,
            queue: Mutex::new(Some(tx)),
            flush_task: Mutex::new(flush_task),
            coordinator: Mutex::new(Some(coordinator)),
            released: AtomicBool::new(false),
            needs_reinit: AtomicBool::new(false),
            writes_so_far,
            batches_failed,
            connection,
        })
    }

    /// Enqueue one document for insertion.
    ///
    /// Returns as soon as the document is buffered — the physical write
    /// happens later, when the batch-size threshold is reached or the
    /// periodic flush fires. The returned [`JobTicket`] correlates this
    /// document's batch job in logs. A failure of the eventual batch
    /// write is logged, not surfaced here.
    pub async fn insert(&self, uri: impl Into<String>, content: impl Into<Bytes>) -> Result<JobTicket> {
        if self.needs_reinit.load(Ordering::Acquire) {
            return Err(ConnectorError::state(
                "connection was invalidated; obtain a new batcher from a reconnected connection",
            ));
        }
        if self.released.load(Ordering::Acquire) {
            return Err(ConnectorError::state("insertion batcher already released"));
        }

        let tx = { self.queue.lock().clone() };
        let Some(tx) = tx else {
            return Err(ConnectorError::state("insertion batcher already released"));
        };

        tx.send(BatcherMessage::Document(DocumentWrite {
            uri: uri.into(),
            content: content.into(),
        }))
        .await
        .map_err(|_| ConnectorError::state("batch queue closed"))?;

        counter!("docstore.documents.enqueued").increment(1);
        Ok(self.job.clone())
    }

    /// Flush everything buffered, wait for acknowledgement of every
    /// in-flight batch, then stop the job.
    ///
    /// Must run before the owning connection releases its client handle.
    /// The periodic flush task is cancelled first, strictly before the
    /// queue it references is torn down. Idempotent: a batcher that is
    /// already stopped treats further calls as no-ops. There is no
    /// timeout — a store that stalls acknowledgement stalls this drain.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(job_id = %self.job.job_id(), "batcher already released");
            return;
        }

        if let Some(flush) = { self.flush_task.lock().take() } {
            flush.abort();
        }

        // Closing the queue lets the coordinator drain what is buffered
        // and exit once every worker has been acknowledged.
        drop(self.queue.lock().take());

        let coordinator = { self.coordinator.lock().take() };
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                warn!(job_id = %self.job.job_id(), error = %e, "coordinator task failed");
            }
        }

        if let Some(connection) = self.connection.upgrade() {
            connection.forget_batcher(&self.signature);
        }

        info!(
            job_id = %self.job.job_id(),
            writes_so_far = self.writes_so_far.load(Ordering::Acquire),
            batches_failed = self.batches_failed.load(Ordering::Acquire),
            "insertion batcher released"
        );
    }

    /// Mark the batcher as needing reinitialization.
    ///
    /// Called when the owning connection is invalidated. Deliberately
    /// does not flush or rebuild anything — the next `insert()` fails
    /// fast instead, because the client handle this batcher would need is
    /// gone.
    pub fn on_connection_invalidated(&self) {
        info!(
            job_id = %self.job.job_id(),
            "connection invalidated; insertion batcher requires reinitialization"
        );
        self.needs_reinit.store(true, Ordering::Release);
    }

    /// The signature this batcher is cached under
    pub fn signature(&self) -> &BatcherSignature {
        &self.signature
    }

    /// The ticket of the running batch job
    pub fn job_ticket(&self) -> &JobTicket {
        &self.job
    }

    /// The metadata template attached to every inserted document
    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// Documents acknowledged as written so far
    pub fn writes_so_far(&self) -> u64 {
        self.writes_so_far.load(Ordering::Acquire)
    }

    /// Batches the store rejected so far
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Acquire)
    }

    /// `true` once `release()` has begun
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// `true` once the owning connection was invalidated
    pub fn needs_reinitialization(&self) -> bool {
        self.needs_reinit.load(Ordering::Acquire)
    }
}

/// Periodic flush loop. Holds only a weak queue handle so it can never
/// keep the queue alive past `release()`; `flushing` an empty buffer is
/// cheap, so running indefinitely is safe.
async fn run_periodic_flush(
    queue: mpsc::WeakSender<BatcherMessage>,
    every: Duration,
    job_id: String,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick
    loop {
        ticker.tick().await;
        let Some(tx) = queue.upgrade() else { break };
        if tx.send(BatcherMessage::Flush).await.is_err() {
            break;
        }
        debug!(job_id, "periodic flush requested");
    }
}

struct Coordinator {
    rx: mpsc::Receiver<BatcherMessage>,
    store: Arc<dyn DocumentStore>,
    metadata: Arc<DocumentMetadata>,
    transform: Option<ServerTransform>,
    temporal_collection: Option<String>,
    batch_size: usize,
    workers: Arc<Semaphore>,
    writes_so_far: Arc<AtomicU64>,
    batches_failed: Arc<AtomicU64>,
    job_id: String,
}

impl Coordinator {
    async fn run(mut self) {
        let mut buffer: Vec<DocumentWrite> = Vec::with_capacity(self.batch_size);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        while let Some(message) = self.rx.recv().await {
            match message {
                BatcherMessage::Document(document) => {
                    buffer.push(document);
                    if buffer.len() >= self.batch_size {
                        self.dispatch(&mut buffer, &mut in_flight).await;
                    }
                }
                BatcherMessage::Flush => {
                    if !buffer.is_empty() {
                        debug!(
                            job_id = %self.job_id,
                            documents = buffer.len(),
                            "flushing partial batch"
                        );
                        self.dispatch(&mut buffer, &mut in_flight).await;
                    }
                }
            }
            // Reap finished workers so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        }

        // Queue closed: final drain, then wait for every acknowledgement.
        if !buffer.is_empty() {
            self.dispatch(&mut buffer, &mut in_flight).await;
        }
        while in_flight.join_next().await.is_some() {}
        debug!(job_id = %self.job_id, "batch queue drained");
    }

    async fn dispatch(&self, buffer: &mut Vec<DocumentWrite>, in_flight: &mut JoinSet<()>) {
        let documents = std::mem::replace(buffer, Vec::with_capacity(self.batch_size));
        let batch = WriteBatch {
            documents,
            metadata: self.metadata.clone(),
            transform: self.transform.clone(),
            temporal_collection: self.temporal_collection.clone(),
        };

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // pool torn down, nothing left to do
        };

        let store = self.store.clone();
        let writes_so_far = self.writes_so_far.clone();
        let batches_failed = self.batches_failed.clone();
        let job_id = self.job_id.clone();

        in_flight.spawn(async move {
            let _permit = permit;
            let documents = batch.len() as u64;
            gauge!("docstore.batch.size").set(documents as f64);

            let started = Instant::now();
            match store.write_batch(&batch).await {
                Ok(()) => {
                    let total = writes_so_far.fetch_add(documents, Ordering::AcqRel) + documents;
                    histogram!("docstore.batch.duration_ms")
                        .record(started.elapsed().as_millis() as f64);
                    counter!("docstore.batches.success").increment(1);
                    counter!("docstore.documents.written").increment(documents);
                    info!(
                        job_id,
                        batch_documents = documents,
                        writes_so_far = total,
                        "batch written"
                    );
                }
                Err(e) => {
                    histogram!("docstore.batch.duration_ms")
                        .record(started.elapsed().as_millis() as f64);
                    counter!("docstore.batches.failed").increment(1);
                    counter!("docstore.documents.failed").increment(documents);
                    batches_failed.fetch_add(1, Ordering::AcqRel);
                    // insert() already returned for these documents; the
                    // failure is visible only here and in job status.
                    error!(
                        job_id,
                        batch_documents = documents,
                        uris = ?batch.uris(),
                        error = %e,
                        "batch write failed; documents are not resubmitted"
                    );
                }
            }
        });
    }
}
