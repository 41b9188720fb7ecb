//! Batch completion bookkeeping.
//!
//! Outstanding programs are counted in generations. Registering a callback closes the current
//! generation and opens a new one, so a callback only waits for programs that were outstanding
//! when it was registered. A closed generation fires once it and every older generation drained.

use crate::compiler::dispatch::{CallbackDispatcher, ReadyCallback};
use kiln_utils::debug_panic;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Ticket for one outstanding program. Must be released exactly once.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompletionHandle {
    generation: u64,
}

struct Generation {
    id: u64,
    outstanding: usize,
    callback: Option<(Arc<dyn CallbackDispatcher>, ReadyCallback)>,
}

struct NotifierState {
    /// The back generation is always the open one.
    generations: VecDeque<Generation>,
    next_id: u64,
}

impl NotifierState {
    fn open(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        self.generations.push_back(Generation {
            id,
            outstanding: 0,
            callback: None,
        });
    }

    fn current(&mut self) -> &mut Generation {
        if self.generations.is_empty() {
            self.open();
        }
        // always populated by the check above
        let last = self.generations.len() - 1;
        &mut self.generations[last]
    }

    fn drain_ready(&mut self) -> Vec<(Arc<dyn CallbackDispatcher>, ReadyCallback)> {
        let mut ready = Vec::new();
        while self.generations.len() > 1 {
            let Some(front) = self.generations.front() else {
                break;
            };
            if front.outstanding > 0 {
                break;
            }
            if let Some(generation) = self.generations.pop_front()
                && let Some(callback) = generation.callback
            {
                ready.push(callback);
            }
        }
        ready
    }
}

pub struct CompletionNotifier {
    state: Mutex<NotifierState>,
}

impl Default for CompletionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionNotifier {
    pub fn new() -> Self {
        let mut state = NotifierState {
            generations: VecDeque::new(),
            next_id: 0,
        };
        state.open();

        Self {
            state: Mutex::new(state),
        }
    }

    pub fn acquire(&self) -> CompletionHandle {
        let mut state = self.state.lock();
        let current = state.current();
        current.outstanding += 1;

        CompletionHandle {
            generation: current.id,
        }
    }

    pub fn release(&self, handle: CompletionHandle) {
        let ready = {
            let mut state = self.state.lock();
            match state
                .generations
                .iter_mut()
                .find(|g| g.id == handle.generation)
            {
                Some(generation) if generation.outstanding > 0 => generation.outstanding -= 1,
                _ => {
                    debug_panic!("Completion handle of generation {} released twice", handle.generation);
                    return;
                }
            }
            state.drain_ready()
        };

        Self::fire(ready);
    }

    /// Fires `callback` once everything acquired so far has been released.
    pub fn register(&self, dispatcher: Arc<dyn CallbackDispatcher>, callback: ReadyCallback) {
        let ready = {
            let mut state = self.state.lock();
            state.current().callback = Some((dispatcher, callback));
            state.open();
            state.drain_ready()
        };

        Self::fire(ready);
    }

    /// Handles acquired and not yet released, across all generations.
    pub fn outstanding(&self) -> usize {
        self.state
            .lock()
            .generations
            .iter()
            .map(|g| g.outstanding)
            .sum()
    }

    fn fire(ready: Vec<(Arc<dyn CallbackDispatcher>, ReadyCallback)>) {
        for (dispatcher, callback) in ready {
            trace!("[Completion Notifier] Programs ready, dispatching callback");
            dispatcher.dispatch(callback);
        }
    }
}
