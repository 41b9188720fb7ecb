//! Persistent compiler worker threads.

use crate::compiler::config::{MAX_WORKERS, WorkerPoolConfig, WorkerPriority};
use crate::compiler::error::{InvalidConfigErr, Result, SpawnWorkerErr};
use crate::compiler::token::TokenId;
use crate::program::Priority;
use parking_lot::{Condvar, Mutex};
use snafu::{ResultExt, ensure};
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

/// Identifies the worker a [`ContextProvider`] is called on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub index: usize,
    pub priority: WorkerPriority,
}

/// Sets up the graphics context a worker compiles on.
///
/// `make_current` runs on the worker thread before it takes its first job, `release` right before
/// the thread exits. The configured [`WorkerPriority`] is passed along so the platform can apply it.
pub trait ContextProvider: Send + Sync {
    fn make_current(&self, worker: &WorkerInfo);
    fn release(&self, _worker: &WorkerInfo) {}
}

/// For drivers that don't need a per-thread context.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn make_current(&self, _worker: &WorkerInfo) {}
}

pub struct Job {
    priority: Priority,
    token: TokenId,
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    pub fn new<F>(priority: Priority, token: TokenId, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            priority,
            token,
            work: Box::new(work),
        }
    }

    pub fn token(&self) -> TokenId {
        self.token
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn run(self) {
        (self.work)()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.priority)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Queues {
    urgent: VecDeque<Job>,
    normal: VecDeque<Job>,
    exit: bool,
}

impl Queues {
    fn tier(&mut self, priority: Priority) -> &mut VecDeque<Job> {
        match priority {
            Priority::Urgent => &mut self.urgent,
            Priority::Normal => &mut self.normal,
        }
    }

    fn pop(&mut self) -> Option<Job> {
        self.urgent.pop_front().or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }
}

struct PoolShared {
    queues: Mutex<Queues>,
    wake: Condvar,
}

impl PoolShared {
    /// Blocks until there's a job or the pool shuts down.
    fn next_job(&self) -> Option<Job> {
        let mut queues = self.queues.lock();
        loop {
            if queues.exit {
                return None;
            }
            if let Some(job) = queues.pop() {
                return Some(job);
            }
            self.wake.wait(&mut queues);
        }
    }
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, contexts: Arc<dyn ContextProvider>) -> Result<Self> {
        ensure!(
            (1..=MAX_WORKERS).contains(&config.max_workers),
            InvalidConfigErr {
                reason: format!(
                    "a worker pool needs between 1 and {MAX_WORKERS} workers, got {}",
                    config.max_workers
                ),
            }
        );

        let mut pool = WorkerPool {
            shared: Arc::new(PoolShared {
                queues: Mutex::new(Queues::default()),
                wake: Condvar::new(),
            }),
            workers: Vec::with_capacity(config.max_workers),
            config,
        };

        for index in 0..config.max_workers {
            let info = WorkerInfo {
                index,
                priority: config.worker_priority,
            };
            let shared = pool.shared.clone();
            let contexts = contexts.clone();

            // a failed spawn drops `pool`, which joins the workers spawned so far
            let handle = std::thread::Builder::new()
                .name(format!("kiln-compiler-{index}"))
                .spawn(move || worker_main(shared, contexts, info))
                .context(SpawnWorkerErr { index })?;

            pool.workers.push(handle);
        }

        debug!(
            "[Worker Pool] Started {} worker(s) at {:?} priority",
            config.max_workers, config.worker_priority
        );

        Ok(pool)
    }

    pub fn enqueue(&self, job: Job) {
        let mut queues = self.shared.queues.lock();
        if queues.exit {
            trace!("[Worker Pool] Dropping job for token {} after shutdown", job.token);
            return;
        }
        queues.tier(job.priority).push_back(job);
        self.shared.wake.notify_one();
    }

    /// Takes the job of `token` out of the queue if no worker picked it up yet.
    pub fn dequeue(&self, token: TokenId) -> Option<Job> {
        let mut guard = self.shared.queues.lock();
        let queues = &mut *guard;
        for tier in [&mut queues.urgent, &mut queues.normal] {
            if let Some(pos) = tier.iter().position(|job| job.token == token) {
                return tier.remove(pos);
            }
        }
        None
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queues.lock().len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> WorkerPoolConfig {
        self.config
    }

    /// Stops all workers after their current job and discards every job still queued.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        let discarded = {
            let mut queues = self.shared.queues.lock();
            queues.exit = true;
            let urgent = std::mem::take(&mut queues.urgent);
            let normal = std::mem::take(&mut queues.normal);
            self.shared.wake.notify_all();
            (urgent, normal)
        };

        let count = discarded.0.len() + discarded.1.len();
        if count > 0 {
            debug!("[Worker Pool] Discarded {count} pending job(s) on shutdown");
        }
        drop(discarded);

        for (index, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                error!("[Worker Pool] Worker #{index} panicked");
            }
        }

        debug!("[Worker Pool] Shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(shared: Arc<PoolShared>, contexts: Arc<dyn ContextProvider>, info: WorkerInfo) {
    contexts.make_current(&info);
    trace!("[Worker Pool] Worker #{} ready", info.index);

    while let Some(job) = shared.next_job() {
        trace!("[Worker Pool] Worker #{} runs token {}", info.index, job.token);
        job.run();
    }

    contexts.release(&info);
    trace!("[Worker Pool] Worker #{} exited", info.index);
}
