//! Expiry window for finding stale entries without a full scan
//!
//! The window is a queue of weak back-references into the entries owned by
//! the registry, appended in heartbeat order. Every register or update
//! pushes a reference to the tail, so scanning from the head visits entries
//! from the least to the most recently touched and can stop at the first
//! live one.
//!
//! A reference goes stale when its entry is dropped from the registry or
//! touched again (a newer reference then sits further back). Stale
//! references are skipped by scans and shed lazily when the window grows
//! past the registry's cardinality.

use crate::entry::ServiceEntry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Initial capacity of the window; the deque doubles from there
pub const INITIAL_CAPACITY: usize = 16;

struct BackRef {
    entry: Weak<ServiceEntry>,
    seq: u64,
}

impl BackRef {
    fn new(entry: &Arc<ServiceEntry>) -> Self {
        Self {
            entry: Arc::downgrade(entry),
            seq: entry.touch().seq,
        }
    }

    /// The entry if it is still alive and this is its newest reference
    fn current(&self) -> Option<Arc<ServiceEntry>> {
        self.entry
            .upgrade()
            .filter(|entry| entry.touch().seq == self.seq)
    }

    fn is_current(&self) -> bool {
        self.current().is_some()
    }
}

/// Approximately ordered window of back-references used by the cleanup loop
pub struct ExpiryManager {
    window: Mutex<VecDeque<BackRef>>,
    expire_time: Duration,
}

impl ExpiryManager {
    pub fn new(expire_time: Duration) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(INITIAL_CAPACITY)),
            expire_time,
        }
    }

    /// Record that `entry` was just registered or heartbeated.
    ///
    /// `target_size` is the registry's cardinality after the mutation. Once
    /// the window holds more references than that, stale references are
    /// dropped from the head; a full compaction runs only when the window
    /// has grown to twice the target, which keeps insertion amortized O(1).
    pub fn add(&self, entry: &Arc<ServiceEntry>, target_size: usize) {
        let mut window = self.lock();
        window.push_back(BackRef::new(entry));

        if window.len() <= target_size {
            return;
        }

        while window.front().is_some_and(|back_ref| !back_ref.is_current()) {
            window.pop_front();
        }

        if window.len() > target_size.saturating_mul(2).max(INITIAL_CAPACITY) {
            window.retain(BackRef::is_current);
        }
    }

    /// Entries whose last heartbeat is older than the expire time.
    ///
    /// Scans from the head and stops at the first live, unexpired entry.
    /// Entries past that point are picked up by a later sweep, so the result
    /// may miss stale entries but never contains a live one as of `now`.
    pub fn expired_entries(&self, now: Instant) -> Vec<Arc<ServiceEntry>> {
        let window = self.lock();
        let mut expired = Vec::new();

        for back_ref in window.iter() {
            let Some(entry) = back_ref.current() else {
                continue;
            };

            if entry.is_expired(self.expire_time, now) {
                expired.push(entry);
            } else {
                break;
            }
        }

        expired
    }

    /// Ids of the entries returned by [`expired_entries`](Self::expired_entries)
    pub fn get_expired_service_ids(&self, now: Instant) -> Vec<String> {
        self.expired_entries(now)
            .into_iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BackRef>> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of references currently held, stale ones included
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        matches!(
            self.window.try_lock(),
            Err(std::sync::TryLockError::WouldBlock)
        )
    }
}
