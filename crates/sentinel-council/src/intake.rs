//! Asynchronous intake queue.
//!
//! A bounded, single-consumer FIFO in front of a council. Producers never
//! block: a full queue drops the new submission and logs it. `submit`
//! hands back the id the finished bundle will carry, and completed bundles
//! are published on a broadcast channel so callers that care can match
//! them by that id; everyone else treats submission as fire-and-forget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::council::Council;
use crate::model::{CouncilBundle, InputBundle};

const RESULT_BUFFER: usize = 256;

/// Handle to a running intake queue.
#[derive(Debug)]
pub struct Intake {
    queue: mpsc::Sender<(Uuid, InputBundle)>,
    results: broadcast::Sender<Arc<CouncilBundle>>,
    processed: Arc<AtomicU64>,
    dropped: AtomicU64,
    worker: JoinHandle<()>,
}

impl Council {
    /// Starts an intake queue of `capacity` in front of this council.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_intake(self: &Arc<Self>, capacity: usize) -> Intake {
        let (queue, mut rx) = mpsc::channel::<(Uuid, InputBundle)>(capacity.max(1));
        let (results, _) = broadcast::channel(RESULT_BUFFER);
        let processed = Arc::new(AtomicU64::new(0));

        let council = Arc::clone(self);
        let publish = results.clone();
        let counter = Arc::clone(&processed);
        let worker = tokio::spawn(async move {
            while let Some((id, input)) = rx.recv().await {
                let bundle = council.dispatch_as(id, input).await;
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(id = %bundle.id, decision = %bundle.decision, "intake dispatch complete");
                // No subscribers is fine.
                let _ = publish.send(Arc::new(bundle));
            }
        });

        Intake {
            queue,
            results,
            processed,
            dropped: AtomicU64::new(0),
            worker,
        }
    }
}

impl Intake {
    /// Enqueues `input` without blocking.
    ///
    /// Returns the id the published bundle will carry, or `None` if the
    /// input was dropped.
    pub fn submit(&self, input: InputBundle) -> Option<Uuid> {
        let id = Uuid::new_v4();
        match self.queue.try_send((id, input)) {
            Ok(()) => Some(id),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%id, "intake queue full, dropping input");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%id, "intake queue closed, dropping input");
                None
            }
        }
    }

    /// Receives every bundle completed after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CouncilBundle>> {
        self.results.subscribe()
    }

    /// Inputs dispatched so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Inputs dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting input and waits for queued input to drain.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(err) = self.worker.await {
            warn!(error = %err, "intake worker ended abnormally");
        }
    }
}
