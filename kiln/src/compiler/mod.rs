//! The program compiler and the schedulers it runs on.
//!
//! A [`ProgramCompiler`] owns exactly one scheduler: a [`WorkerPool`] when the configuration
//! asks for workers, a [`TickScheduler`] otherwise. Submitting never blocks. Consuming a token
//! either waits for its worker, runs the job inline if no worker took it yet, or ticks the
//! cooperative scheduler until the program resolved.

mod cell;
mod config;
mod dispatch;
mod error;
mod notifier;
mod pool;
mod shared;
mod stats;
mod tick;
mod token;

pub use self::cell::ResultCell;
pub use self::config::*;
pub use self::dispatch::*;
pub use self::error::{CompilerError, Result};
pub use self::notifier::{CompletionHandle, CompletionNotifier};
pub use self::pool::{ContextProvider, Job, NoContext, WorkerInfo, WorkerPool};
pub use self::stats::CompilerStats;
pub use self::tick::{TickScheduler, TickStep};
pub use self::token::{Phase, ProgramToken, TokenId};

use crate::cache::BlobCache;
use crate::driver::{GraphicsDriver, ProgramHandle};
use crate::program::{CacheKey, ProgramDescription, specialize};
use self::shared::{CompileTask, CompilerShared};
use self::stats::StatCounters;
use self::token::{CompiledProgram, TokenState};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

enum Backend {
    Pool(WorkerPool),
    Cooperative(TickScheduler),
}

pub struct ProgramCompiler {
    shared: Arc<CompilerShared>,
    /// `None` once terminated.
    backend: Option<Backend>,
    dispatcher: Arc<dyn CallbackDispatcher>,
}

static_assertions::assert_impl_all!(ProgramCompiler: Send, Sync);

impl ProgramCompiler {
    pub fn new(driver: Arc<dyn GraphicsDriver>, config: CompilerConfig) -> Result<Self> {
        let backend = if config.pool.is_cooperative() {
            Backend::Cooperative(TickScheduler::new())
        } else {
            Backend::Pool(WorkerPool::new(config.pool, config.contexts.clone())?)
        };

        debug!(
            "[Program Compiler] Initialized with {}, {}",
            match &backend {
                Backend::Pool(pool) => format!("{} worker(s)", pool.worker_count()),
                Backend::Cooperative(_) => "cooperative scheduling".to_string(),
            },
            if config.cache.is_some() { "cached" } else { "uncached" }
        );

        Ok(Self {
            shared: Arc::new(CompilerShared {
                driver,
                cache: config.cache,
                notifier: CompletionNotifier::new(),
                stats: StatCounters::default(),
            }),
            backend: Some(backend),
            dispatcher: config.dispatcher,
        })
    }

    /// Hands `desc` off for compilation. Never blocks.
    ///
    /// Programs found in the cache come back already resolved and are never scheduled.
    pub fn submit(&self, desc: ProgramDescription) -> ProgramToken {
        self.shared.stats.record_submit();

        let key = CacheKey::for_description(&desc);
        if let Some(constant) = desc.constants.iter().find(|c| !c.value.is_expressible()) {
            error!(
                "[Program Compiler] Program {:?} sets constant {} to {:?}, which has no WGSL literal",
                desc.name, constant.id, constant.value
            );
            self.shared.stats.record_failure();
            return ProgramToken::new(Arc::new(TokenState::rejected(desc.name, key, desc.priority)));
        }

        if let Some(state) = self.load_cached(&desc, &key) {
            return ProgramToken::new(Arc::new(state));
        }

        let sources: SmallVec<_> = desc
            .stages
            .iter()
            .map(|(stage, source)| (stage, specialize(source, &desc.constants)))
            .collect();
        if sources.is_empty() {
            warn!("[Program Compiler] Program {:?} has no stages", desc.name);
        }

        let priority = desc.priority;
        let state = Arc::new(TokenState::new(
            desc.name,
            key,
            priority,
            sources,
            desc.attributes,
            Some(self.shared.notifier.acquire()),
        ));
        let task = CompileTask::new(self.shared.clone(), state.clone());

        match &self.backend {
            Some(Backend::Pool(pool)) => {
                pool.enqueue(Job::new(priority, state.id, move || task.run_blocking()));
            }
            Some(Backend::Cooperative(tick)) => {
                let mut task = task;
                tick.schedule(priority, state.id, Box::new(move || task.step()));
            }
            None => {
                warn!(
                    "[Program Compiler] Program {:?} submitted after termination, it will never compile",
                    state.name
                );
                drop(task);
            }
        }

        trace!("[Program Compiler] Submitted {:?} as token {}", state.name, state.id);
        ProgramToken::new(state)
    }

    fn load_cached(&self, desc: &ProgramDescription, key: &CacheKey) -> Option<TokenState> {
        if key.is_empty() {
            return None;
        }

        let binary = self.shared.cache.as_ref()?.get(key)?;
        let Some(program) = self.shared.driver.load_program_binary(&binary) else {
            debug!("[Program Compiler] Cached binary of {:?} was rejected, recompiling", desc.name);
            return None;
        };

        self.shared.stats.record_cache_hit();
        trace!("[Program Compiler] Loaded {:?} from cache as {program}", desc.name);

        Some(TokenState::resolved(
            desc.name.clone(),
            key.clone(),
            desc.priority,
            CompiledProgram {
                program,
                stages: SmallVec::new(),
                from_cache: true,
            },
        ))
    }

    #[inline]
    pub fn is_ready(&self, token: &ProgramToken) -> bool {
        token.is_ready()
    }

    /// Consumes `token` and returns its linked program, or `None` if compiling or linking failed.
    ///
    /// This is the first point at which the driver is asked whether the program is usable, so
    /// failures are logged here.
    pub fn get_result(&self, token: ProgramToken) -> Option<ProgramHandle> {
        let state = token.consume();
        self.wait_retired(&state);

        if !state.result.is_set() {
            if state.phase() == Phase::Resolved {
                return None;
            }
            warn!(
                "[Program Compiler] Program {:?} (token {}) never compiled",
                state.name, state.id
            );
            return None;
        }

        self.shared.finish(&state)
    }

    fn wait_retired(&self, state: &TokenState) {
        if state.retired.is_set() {
            return;
        }

        match &self.backend {
            Some(Backend::Pool(pool)) => {
                if let Some(job) = pool.dequeue(state.id) {
                    trace!("[Program Compiler] Compiling {:?} inline", state.name);
                    job.run();
                }
                state.retired.wait();
            }
            Some(Backend::Cooperative(tick)) => {
                while !state.retired.is_set() && tick.contains(state.id) {
                    tick.tick();
                    if !state.retired.is_set() {
                        std::thread::yield_now();
                    }
                }
            }
            None => {}
        }
    }

    /// Consumes `token` and frees everything that was created for it. Never waits on a compile.
    ///
    /// A job that hasn't started is dropped right away. One that is running finishes on its
    /// worker, which frees the program as soon as it's done.
    pub fn cancel(&self, token: ProgramToken) {
        let state = token.consume();
        self.shared.stats.record_cancel();

        if state.cancel() {
            if let Some(compiled) = state.result.try_get() {
                self.shared.release_program(compiled);
            }
            return;
        }

        match &self.backend {
            Some(Backend::Pool(pool)) => match pool.dequeue(state.id) {
                Some(job) => {
                    trace!("[Program Compiler] Canceled {:?} before it started", state.name);
                    drop(job);
                }
                None => trace!("[Program Compiler] Canceled {:?} while it compiles", state.name),
            },
            Some(Backend::Cooperative(tick)) => {
                if tick.cancel(state.id) {
                    trace!("[Program Compiler] Canceled {:?} before it resolved", state.name);
                }
            }
            None => {}
        }
    }

    /// Advances cooperative compiles by one step each. Returns how many finished.
    ///
    /// Does nothing when compiles run on a worker pool.
    pub fn tick(&self) -> usize {
        match &self.backend {
            Some(Backend::Cooperative(tick)) => tick.tick(),
            _ => 0,
        }
    }

    /// Calls `callback` once every program submitted so far resolved, using the configured
    /// dispatcher.
    pub fn notify_when_all_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .notifier
            .register(self.dispatcher.clone(), Box::new(callback));
    }

    pub fn notify_when_all_ready_on<F>(&self, dispatcher: Arc<dyn CallbackDispatcher>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.notifier.register(dispatcher, Box::new(callback));
    }

    /// Jobs the active scheduler still holds.
    pub fn pending_jobs(&self) -> usize {
        match &self.backend {
            Some(Backend::Pool(pool)) => pool.pending(),
            Some(Backend::Cooperative(tick)) => tick.len(),
            None => 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        match &self.backend {
            Some(Backend::Pool(pool)) => pool.worker_count(),
            _ => 0,
        }
    }

    pub fn is_cooperative(&self) -> bool {
        matches!(self.backend, Some(Backend::Cooperative(_)))
    }

    pub fn stats(&self) -> CompilerStats {
        self.shared.stats.snapshot()
    }

    pub fn driver(&self) -> &Arc<dyn GraphicsDriver> {
        &self.shared.driver
    }

    pub fn cache(&self) -> Option<&Arc<dyn BlobCache>> {
        self.shared.cache.as_ref()
    }

    /// Stops scheduling. Pending pool jobs are discarded, cooperative ones are run to completion.
    ///
    /// Tokens that resolved before can still be consumed afterwards.
    pub fn terminate(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };

        match backend {
            Backend::Pool(mut pool) => pool.shutdown(),
            Backend::Cooperative(tick) => tick.run_all(),
        }

        debug!("[Program Compiler] Terminated");
    }
}

impl Drop for ProgramCompiler {
    fn drop(&mut self) {
        self.terminate();
    }
}
