//! Bounded validation worker pool.
//!
//! Jobs go through a bounded crossbeam channel; each carries its own reply
//! channel so results flow back to whoever scheduled them. Dropping the
//! sender closes the queue: workers drain what is queued, then exit.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
#[cfg(test)]
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::belief::BeliefId;
use crate::error::{ExecutionError, GroundError, GroundResult};

use super::{FilterCore, ValidationReport};

/// What a worker sends back for a scheduled validation. `None` means the
/// belief settled (or stopped being testable) before the worker got to it.
pub(crate) type JobResult = GroundResult<Option<ValidationReport>>;

pub(crate) enum Job {
    Validate {
        belief: BeliefId,
        reply: Sender<JobResult>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

pub(crate) struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub(crate) fn start(
        workers: usize,
        queue_capacity: usize,
        core: Arc<FilterCore>,
    ) -> GroundResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let core = Arc::clone(&core);
            let handle = thread::Builder::new()
                .name(format!("groundwork-validate-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Validate { belief, reply }) => {
                            let result = core.validate_scheduled(belief);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| GroundError::internal(format!("failed to spawn validation worker: {e}")))?;
            handles.push(handle);
        }
        debug!(workers, queue_capacity, "validation pool started");

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    pub(crate) fn try_submit(&self, job: Job) -> GroundResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    /// Schedules one validation and returns the channel its result arrives on.
    pub(crate) fn submit_validation(&self, belief: BeliefId) -> GroundResult<Receiver<JobResult>> {
        let (tx, rx) = bounded::<JobResult>(1);
        self.try_submit(Job::Validate { belief, reply: tx })?;
        Ok(rx)
    }

    #[cfg(test)]
    pub(crate) fn submit_sleep(&self, duration: Duration) -> GroundResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }

    pub(crate) fn shutdown(self) {
        drop(self.tx);
        let workers = self.workers.len();
        for handle in self.workers {
            let _ = handle.join();
        }
        debug!(workers, "validation pool stopped");
    }
}
