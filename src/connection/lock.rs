//! Exclusive lock with cancellable, optionally bounded waits
//!
//! The protected value lives in a one-slot channel: acquiring takes it out,
//! dropping the guard puts it back. Waiting is a `select!` over the slot, the
//! caller's cancel signal and an optional deadline.

use crossbeam::channel::{self, select, Receiver, Sender};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Why an acquisition gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    Cancelled,
    TimedOut(Duration),
}

/// A cancellation signal shared between a waiter and whoever may cancel it.
///
/// Cancelling disconnects an internal channel, which wakes every waiter at once.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    trigger: Mutex<Option<Sender<()>>>,
    fired: Receiver<()>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                trigger: Mutex::new(Some(tx)),
                fired: rx,
            }),
        }
    }

    pub fn cancel(&self) {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner
            .trigger
            .lock()
            .map(|t| t.is_none())
            .unwrap_or(true)
    }

    fn receiver(&self) -> Receiver<()> {
        self.inner.fired.clone()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExclusiveLock<T> {
    slot_tx: Sender<T>,
    slot_rx: Receiver<T>,
}

impl<T> ExclusiveLock<T> {
    pub fn new(value: T) -> Self {
        let (slot_tx, slot_rx) = channel::bounded(1);
        slot_tx
            .send(value)
            .unwrap_or_else(|_| unreachable!("fresh slot has capacity and a receiver"));
        Self { slot_tx, slot_rx }
    }

    /// Block until the lock is free, the signal fires, or the timeout elapses.
    ///
    /// A signal that has already fired wins even if the lock is free.
    pub fn acquire(
        &self,
        cancel: Option<&CancelSignal>,
        timeout: Option<Duration>,
    ) -> Result<LockGuard<'_, T>, AcquireError> {
        if cancel.is_some_and(CancelSignal::is_cancelled) {
            return Err(AcquireError::Cancelled);
        }

        let start = Instant::now();
        let cancelled = cancel.map(CancelSignal::receiver).unwrap_or_else(channel::never);
        let deadline = timeout.map(channel::after).unwrap_or_else(channel::never);

        let value = select! {
            recv(self.slot_rx) -> value => value.map_err(|_| AcquireError::Cancelled)?,
            recv(cancelled) -> _ => return Err(AcquireError::Cancelled),
            recv(deadline) -> _ => return Err(AcquireError::TimedOut(start.elapsed())),
        };

        let guard = LockGuard {
            value: Some(value),
            home: &self.slot_tx,
        };
        if cancel.is_some_and(CancelSignal::is_cancelled) {
            // Cancelled while the slot was being handed over; give it back untouched.
            return Err(AcquireError::Cancelled);
        }
        Ok(guard)
    }

    /// Take the lock only if it is free right now
    pub fn try_acquire(&self) -> Option<LockGuard<'_, T>> {
        self.slot_rx.try_recv().ok().map(|value| LockGuard {
            value: Some(value),
            home: &self.slot_tx,
        })
    }
}

/// Holds the protected value; returns it to the lock when dropped
pub struct LockGuard<'a, T> {
    value: Option<T>,
    home: &'a Sender<T>,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("guard holds its value until dropped")
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("guard holds its value until dropped")
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            // Cannot fail: the lock owns the receiver and the slot is empty.
            let _ = self.home.send(value);
        }
    }
}

pub type Registry<T> = Mutex<HashMap<PathBuf, Weak<ExclusiveLock<T>>>>;

/// The lock for `path`, shared by every caller in this process.
///
/// `path` must already be canonical: two spellings of one directory would
/// otherwise get two locks. `init` builds the protected value the first time
/// a path is seen (or after every previous holder of the lock has been dropped).
pub fn process_lock_for<T: Send + 'static>(
    registry: &'static OnceLock<Registry<T>>,
    path: &Path,
    init: impl FnOnce() -> T,
) -> Arc<ExclusiveLock<T>> {
    let key = path.to_path_buf();
    let mut map = registry
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    map.retain(|_, weak| weak.strong_count() > 0);
    if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
        return existing;
    }
    let lock = Arc::new(ExclusiveLock::new(init()));
    map.insert(key, Arc::downgrade(&lock));
    lock
}
