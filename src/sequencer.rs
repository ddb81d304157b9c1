//! Operation sequencer.
//!
//! Serializes asynchronous operations against one logical save file. Each
//! sequencer owns a single worker task draining an unbounded FIFO channel,
//! so operations run strictly in submission order and never overlap:
//!
//! ```text
//! submit(A) ─┐
//! submit(B) ─┼─► [ A | B | C ] ─► worker: run A to completion, then B, then C
//! submit(C) ─┘
//! ```
//!
//! A failing or panicking operation only fails its own handle; the worker
//! keeps draining the queue. Operations against different files go through
//! different sequencers (see [`SequencerPool`]) and run concurrently.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Sequencer failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    /// The worker is gone; nothing more can be queued.
    #[error("sequencer '{0}' is closed")]
    Closed(String),

    /// The operation panicked or was dropped before producing a result.
    #[error("operation {seq} on '{name}' aborted before completing")]
    Aborted {
        /// Sequencer name.
        name: String,
        /// Submission sequence number.
        seq: u64,
    },
}

/// FIFO executor for one logical file.
///
/// Must be created inside a tokio runtime. Cloning shares the queue.
#[derive(Clone)]
pub struct OperationSequencer {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
    next_seq: Arc<AtomicU64>,
}

/// Pending result of a submitted operation.
#[must_use = "an operation handle does nothing unless waited on"]
pub struct OperationHandle<T> {
    name: Arc<str>,
    seq: u64,
    rx: oneshot::Receiver<T>,
}

impl OperationSequencer {
    /// Spawn the worker for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(name.clone(), rx));
        Self {
            name,
            tx,
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Logical file this sequencer guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `operation`. It starts only after every earlier submission has
    /// finished; the returned handle resolves to its output.
    pub fn submit<F, T>(&self, operation: F) -> Result<OperationHandle<T>, SequencerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let output = operation.await;
            // Receiver may have been dropped by a fire-and-forget caller.
            let _ = done_tx.send(output);
        });

        self.tx
            .send(job)
            .map_err(|_| SequencerError::Closed(self.name.to_string()))?;
        debug!(sequencer = %self.name, seq, "operation queued");

        Ok(OperationHandle {
            name: self.name.clone(),
            seq,
            rx: done_rx,
        })
    }

    /// Number of operations ever submitted.
    pub fn submitted(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for OperationSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSequencer")
            .field("name", &self.name)
            .field("submitted", &self.submitted())
            .finish()
    }
}

async fn run_worker(name: Arc<str>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        // Spawned so a panic is contained to this job; awaited so the next
        // job cannot start early.
        if let Err(e) = tokio::spawn(job).await {
            error!(sequencer = %name, error = %e, "queued operation panicked");
        }
    }
    debug!(sequencer = %name, "sequencer drained and closed");
}

impl<T> OperationHandle<T> {
    /// Submission sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait for the operation to finish.
    pub async fn wait(self) -> Result<T, SequencerError> {
        self.rx.await.map_err(|_| SequencerError::Aborted {
            name: self.name.to_string(),
            seq: self.seq,
        })
    }
}

/// One sequencer per logical file name, created on first use.
#[derive(Debug, Clone, Default)]
pub struct SequencerPool {
    sequencers: Arc<Mutex<HashMap<String, OperationSequencer>>>,
}

impl SequencerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequencer for `name`. Must be called inside a tokio runtime.
    pub fn get(&self, name: &str) -> OperationSequencer {
        self.sequencers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| OperationSequencer::new(name))
            .clone()
    }

    /// Number of files with a sequencer.
    pub fn len(&self) -> usize {
        self.sequencers.lock().len()
    }

    /// Whether no sequencer has been created yet.
    pub fn is_empty(&self) -> bool {
        self.sequencers.lock().is_empty()
    }
}
