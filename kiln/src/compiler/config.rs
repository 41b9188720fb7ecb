use crate::cache::BlobCache;
use crate::compiler::dispatch::{CallbackDispatcher, InlineDispatcher};
use crate::compiler::pool::{ContextProvider, NoContext};
use crate::driver::DriverCaps;
use bon::Builder;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Upper bound for [`WorkerPoolConfig::max_workers`].
pub const MAX_WORKERS: usize = 16;

/// Largest pool [`WorkerPoolConfig::for_capabilities`] suggests. Drivers tend to serialize
/// compiles internally, and every extra context costs memory.
const SUGGESTED_MAX_WORKERS: usize = 2;

/// Scheduling priority the platform should give compiler worker threads.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum WorkerPriority {
    Background,
    #[default]
    Normal,
    Display,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Builder)]
pub struct WorkerPoolConfig {
    /// `0` disables the pool. Programs are then compiled cooperatively by
    /// [`ProgramCompiler::tick`](crate::ProgramCompiler::tick).
    #[builder(default = 1)]
    pub max_workers: usize,
    #[builder(default)]
    pub worker_priority: WorkerPriority,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::COOPERATIVE
    }
}

impl WorkerPoolConfig {
    pub const COOPERATIVE: WorkerPoolConfig = WorkerPoolConfig {
        max_workers: 0,
        worker_priority: WorkerPriority::Normal,
    };

    pub const fn single(worker_priority: WorkerPriority) -> Self {
        Self {
            max_workers: 1,
            worker_priority,
        }
    }

    /// Drivers that can overlap compiles get a small background pool, everything else compiles
    /// cooperatively on the caller's thread.
    pub fn for_capabilities(caps: DriverCaps) -> Self {
        if !caps.overlapped_compile {
            return Self::COOPERATIVE;
        }

        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        Self {
            max_workers: (cores / 2).clamp(1, SUGGESTED_MAX_WORKERS),
            worker_priority: WorkerPriority::Background,
        }
    }

    #[inline]
    pub fn is_cooperative(&self) -> bool {
        self.max_workers == 0
    }
}

#[derive(Clone, Builder)]
pub struct CompilerConfig {
    #[builder(default)]
    pub pool: WorkerPoolConfig,
    /// Linked programs are neither looked up nor stored without a cache.
    pub cache: Option<Arc<dyn BlobCache>>,
    #[builder(default = Arc::new(NoContext) as Arc<dyn ContextProvider>)]
    pub contexts: Arc<dyn ContextProvider>,
    /// Used by [`ProgramCompiler::notify_when_all_ready`](crate::ProgramCompiler::notify_when_all_ready).
    #[builder(default = Arc::new(InlineDispatcher) as Arc<dyn CallbackDispatcher>)]
    pub dispatcher: Arc<dyn CallbackDispatcher>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
