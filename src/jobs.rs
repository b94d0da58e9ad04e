// ABOUTME: Typed background jobs and the queue feeding the worker pool.
// ABOUTME: Supports deferred enqueue and cooperative per-job abort.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::model::Stage;
use crate::types::{DeploymentId, JobId, ProjectId};

/// The discrete units of work the coordinator stages run as. Stage chaining
/// is explicit: a stage enqueues the next stage instead of calling it, and
/// every handler is idempotent because the queue may redeliver.
#[derive(Debug, Clone)]
pub enum JobKind {
    StartDeployment(DeploymentId),
    FinalizeDeployment(DeploymentId),
    FailDeployment {
        deployment_id: DeploymentId,
        stage: Stage,
        reason: String,
    },
    DeleteContainer(DeploymentId),
    CleanupInactiveContainers(ProjectId),
    ReconcileDeployments {
        deployment_ids: Option<Vec<DeploymentId>>,
    },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
}

/// A watch receiver that flips to true when the job is asked to abort.
/// Stage handlers check it at their suspension points and unwind through
/// their own cleanup.
pub type AbortSignal = watch::Receiver<bool>;

pub fn is_aborted(signal: &AbortSignal) -> bool {
    *signal.borrow()
}

struct Registry {
    counter: AtomicU64,
    aborts: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

/// Handle for enqueuing jobs and requesting cooperative aborts. Cheap to
/// clone; all clones feed the same pool.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    registry: Arc<Registry>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            registry: Arc::new(Registry {
                counter: AtomicU64::new(0),
                aborts: Mutex::new(HashMap::new()),
            }),
        };
        (queue, rx)
    }

    fn next_id(&self) -> JobId {
        let n = self.registry.counter.fetch_add(1, Ordering::Relaxed);
        JobId::new(format!("job-{n}"))
    }

    pub fn enqueue(&self, kind: JobKind) -> JobId {
        let id = self.next_id();
        let (abort_tx, _) = watch::channel(false);
        self.registry.aborts.lock().insert(id.clone(), abort_tx);
        // Receiver dropped means the engine is shutting down; the job is lost
        // either way.
        let _ = self.tx.send(Job {
            id: id.clone(),
            kind,
        });
        id
    }

    /// Enqueue after a delay. Used for grace periods, e.g. deleting a
    /// stopped container only after its logs have drained.
    pub fn enqueue_after(&self, delay: Duration, kind: JobKind) -> JobId {
        let id = self.next_id();
        let (abort_tx, _) = watch::channel(false);
        self.registry.aborts.lock().insert(id.clone(), abort_tx);
        let tx = self.tx.clone();
        let job = Job {
            id: id.clone(),
            kind,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(job);
        });
        id
    }

    /// Request cooperative abort. Returns false when the job already
    /// finished (its handle was released). The flag is stored even when the
    /// job has not subscribed yet, so an abort cannot be lost to a race
    /// with job startup.
    pub fn abort(&self, id: &JobId) -> bool {
        match self.registry.aborts.lock().get(id) {
            Some(abort_tx) => {
                abort_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Abort signal for a running job. Defaults to a never-aborting signal
    /// when the job is unknown, so handlers need no special case.
    pub fn abort_signal(&self, id: &JobId) -> AbortSignal {
        match self.registry.aborts.lock().get(id) {
            Some(abort_tx) => abort_tx.subscribe(),
            None => watch::channel(false).1,
        }
    }

    /// Release a finished job's abort handle. After this, `abort` reports
    /// the job as already finished.
    pub fn finish(&self, id: &JobId) {
        self.registry.aborts.lock().remove(id);
    }
}
