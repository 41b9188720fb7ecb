use crate::compiler::token::TokenId;
use crate::program::Priority;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{trace, warn};

/// Passes in a row without any finished entry after which [`TickScheduler::run_all`] gives up.
const MAX_IDLE_PASSES: usize = 16;

/// One step of cooperative work. Returns `true` once the entry is done.
pub type TickStep = Box<dyn FnMut() -> bool + Send + 'static>;

struct TickEntry {
    priority: Priority,
    token: TokenId,
    step: TickStep,
}

/// Runs scheduled steps on whichever thread calls [`tick`](Self::tick).
///
/// Entries are kept sorted by priority, ties in scheduling order. A step may schedule more work;
/// those entries run on the next pass.
pub struct TickScheduler {
    entries: Mutex<Vec<TickEntry>>,
    /// Held for the length of a pass, so cancels from other threads never observe a half-run pass.
    pass: ReentrantMutex<()>,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pass: ReentrantMutex::new(()),
        }
    }

    pub fn schedule(&self, priority: Priority, token: TokenId, step: TickStep) {
        let mut entries = self.entries.lock();
        Self::insert_sorted(&mut entries, TickEntry { priority, token, step });
    }

    fn insert_sorted(entries: &mut Vec<TickEntry>, entry: TickEntry) {
        let rank = entry.priority.rank();
        let at = entries
            .iter()
            .position(|e| e.priority.rank() > rank)
            .unwrap_or(entries.len());
        entries.insert(at, entry);
    }

    /// Removes the entry of `token`. Returns `false` if there was none.
    ///
    /// The entry is dropped after every lock was given up, so its drop may call back into the
    /// scheduler.
    pub fn cancel(&self, token: TokenId) -> bool {
        let removed = {
            let _pass = self.pass.lock();
            let mut entries = self.entries.lock();
            entries
                .iter()
                .position(|e| e.token == token)
                .map(|pos| entries.remove(pos))
        };

        match removed {
            Some(entry) => {
                drop(entry);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, token: TokenId) -> bool {
        let _pass = self.pass.lock();
        self.entries.lock().iter().any(|e| e.token == token)
    }

    /// Runs every entry once. Returns how many finished.
    pub fn tick(&self) -> usize {
        let _pass = self.pass.lock();

        let mut running = std::mem::take(&mut *self.entries.lock());
        if running.is_empty() {
            return 0;
        }

        let before = running.len();
        running.retain_mut(|entry| !(entry.step)());
        let finished = before - running.len();

        let mut entries = self.entries.lock();
        let scheduled = std::mem::replace(&mut *entries, running);
        for entry in scheduled {
            Self::insert_sorted(&mut entries, entry);
        }

        trace!(
            "[Tick Scheduler] Pass finished {finished} of {before} entries, {} left",
            entries.len()
        );

        finished
    }

    /// Ticks until nothing is left or entries stop making progress.
    pub fn run_all(&self) {
        let mut idle = 0;
        while !self.is_empty() && idle < MAX_IDLE_PASSES {
            if self.tick() == 0 {
                idle += 1;
            } else {
                idle = 0;
            }
        }

        let left = self.len();
        if left > 0 {
            warn!("[Tick Scheduler] {left} entries made no progress in {MAX_IDLE_PASSES} passes");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
