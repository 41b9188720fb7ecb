use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of what a [`ProgramCompiler`](crate::ProgramCompiler) did so far.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CompilerStats {
    pub submitted: usize,
    pub cache_hits: usize,
    /// Compile jobs that actually ran against the driver.
    pub compiled: usize,
    /// Programs that failed to link, found out in `get_result`.
    pub failed: usize,
    pub canceled: usize,
    pub cache_inserts: usize,
}

#[derive(Default)]
pub(crate) struct StatCounters {
    submitted: AtomicUsize,
    cache_hits: AtomicUsize,
    compiled: AtomicUsize,
    failed: AtomicUsize,
    canceled: AtomicUsize,
    cache_inserts: AtomicUsize,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl StatCounters {
            $(
                #[inline]
                pub fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    record_submit => submitted,
    record_cache_hit => cache_hits,
    record_compile => compiled,
    record_failure => failed,
    record_cancel => canceled,
    record_cache_insert => cache_inserts,
}

impl StatCounters {
    pub fn snapshot(&self) -> CompilerStats {
        CompilerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            compiled: self.compiled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            cache_inserts: self.cache_inserts.load(Ordering::Relaxed),
        }
    }
}
