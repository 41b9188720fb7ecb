use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Decides on which thread a "programs ready" callback runs.
pub trait CallbackDispatcher: Send + Sync {
    fn dispatch(&self, callback: ReadyCallback);
}

/// Runs callbacks right away on the thread that resolved the last program.
#[derive(Debug, Default, Copy, Clone)]
pub struct InlineDispatcher;

impl CallbackDispatcher for InlineDispatcher {
    fn dispatch(&self, callback: ReadyCallback) {
        callback();
    }
}

/// Marshals callbacks to whichever thread pumps the paired [`CallbackReceiver`].
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: Sender<ReadyCallback>,
}

pub struct CallbackReceiver {
    rx: Receiver<ReadyCallback>,
}

impl ChannelDispatcher {
    pub fn new() -> (Arc<Self>, CallbackReceiver) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), CallbackReceiver { rx })
    }
}

impl CallbackDispatcher for ChannelDispatcher {
    fn dispatch(&self, callback: ReadyCallback) {
        if self.tx.send(callback).is_err() {
            warn!("[Callback Dispatcher] Receiver is gone, dropping a ready callback");
        }
    }
}

impl CallbackReceiver {
    /// Runs every callback queued so far and returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Waits for one callback and runs it. Returns `false` on timeout.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(callback) => {
                callback();
                true
            }
            Err(_) => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
