//! Bounded set of already-processed data message fingerprints

use mesh_wire::Fingerprint;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Fingerprints older than the window or beyond the capacity are forgotten,
/// oldest first.
#[derive(Debug)]
pub struct SeenMessages {
    window: Duration,
    capacity: usize,
    set: HashSet<Fingerprint>,
    order: VecDeque<(Instant, Fingerprint)>,
}

impl SeenMessages {
    /// Create an empty set
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `fingerprint`; returns `false` if it was already present
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        let now = Instant::now();
        self.evict_expired(now);

        if self.set.contains(&fingerprint) {
            return false;
        }

        while self.set.len() >= self.capacity {
            match self.order.pop_front() {
                Some((_, oldest)) => {
                    self.set.remove(&oldest);
                }
                None => break,
            }
        }

        self.set.insert(fingerprint.clone());
        self.order.push_back((now, fingerprint));
        true
    }

    /// Whether `fingerprint` is currently remembered
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.set.contains(fingerprint)
    }

    /// Number of remembered fingerprints
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((seen_at, _)) = self.order.front() {
            if now.duration_since(*seen_at) < self.window {
                break;
            }
            if let Some((_, expired)) = self.order.pop_front() {
                self.set.remove(&expired);
            }
        }
    }
}
