use parking_lot::{Condvar, Mutex};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Write-once result slot that another thread can block on.
///
/// The resolved marker is the `OnceLock` itself, so readers never take the lock once a value is
/// visible. The lock only serializes sleeping waiters against the wake-up.
pub struct ResultCell<T> {
    value: OnceLock<T>,
    lock: Mutex<()>,
    ready: Condvar,
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultCell<T> {
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    pub fn resolved(value: T) -> Self {
        let cell = Self::new();
        let _ = cell.value.set(value);
        cell
    }

    /// Hands the value back if the cell was already set.
    pub fn try_set(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;

        let _guard = self.lock.lock();
        self.ready.notify_all();

        Ok(())
    }

    #[inline]
    pub fn try_get(&self) -> Option<&T> {
        self.value.get()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn wait(&self) -> &T {
        if let Some(value) = self.value.get() {
            return value;
        }

        let mut guard = self.lock.lock();
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }
            self.ready.wait(&mut guard);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<&T> {
        if let Some(value) = self.value.get() {
            return Some(value);
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if let Some(value) = self.value.get() {
                return Some(value);
            }
            if self.ready.wait_until(&mut guard, deadline).timed_out() {
                return self.value.get();
            }
        }
    }
}
