//! Trailing-edge throttle keyed by an arbitrary value.
//!
//! The first offer for a key opens a window; further offers for the same key
//! inside that window are coalesced. When the window closes the key is
//! reported once by [`KeyedThrottle::take_due`]. Keys never throttle each
//! other; keys due at the same instant come out in the order they were
//! first offered.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of [`KeyedThrottle::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// A new window opened; the caller must flush at this deadline.
    Scheduled(Instant),
    /// A window is already open for this key.
    Coalesced,
}

pub struct KeyedThrottle<K> {
    window: Duration,
    pending: HashMap<K, (Instant, u64)>,
    seq: u64,
}

impl<K: Eq + Hash + Clone> KeyedThrottle<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            seq: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn offer(&mut self, key: K, now: Instant) -> Offer {
        if self.pending.contains_key(&key) {
            return Offer::Coalesced;
        }
        let deadline = now + self.window;
        self.seq += 1;
        self.pending.insert(key, (deadline, self.seq));
        Offer::Scheduled(deadline)
    }

    /// Remove and return every key whose window has closed, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(K, (Instant, u64))> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, order)| (key.clone(), *order))
            .collect();
        due.sort_by_key(|(_, order)| *order);

        for (key, _) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(key, _)| key).collect()
    }

    /// Number of keys with an open window.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Drop all open windows without reporting them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
