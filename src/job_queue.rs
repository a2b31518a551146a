use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use tokio::sync::Notify;

pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Boxes an async closure into a queueable job.
pub fn job<F, Fut>(f: F) -> Job
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || f().boxed())
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    busy: bool,
}

/// FIFO of whole runs with a single execution slot.
#[derive(Clone, Default)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
    idle: Arc<Notify>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `job` and returns how many jobs are ahead of it, the running one
    /// included. Urgent jobs jump to the front of the pending list. Must be
    /// called from within a tokio runtime.
    pub fn enqueue(&self, job: Job, urgent: bool) -> usize {
        let mut state = self.lock();
        let position = state.pending.len() + usize::from(state.busy);
        if !state.busy {
            // the runner takes the job directly; it is never pending
            state.busy = true;
            tokio::spawn(self.clone().run(job));
        } else if urgent {
            state.pending.push_front(job);
        } else {
            state.pending.push_back(job);
        }
        debug!("Queued job at position {} (urgent: {})", position, urgent);
        position
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Resolves once nothing is running and nothing is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    async fn run(self, first: Job) {
        let mut next = first;
        loop {
            // a panicking job must not take the runner down with it
            if let Err(err) = tokio::spawn(next()).await {
                warn!("Queued job failed: {}", err);
            }
            next = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.busy = false;
                        break;
                    }
                }
            };
        }
        self.idle.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
