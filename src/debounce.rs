//! Time-windowed gate suppressing duplicate cold-start triggers

use crate::identity::Identity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-identity debounce gate for provisioning triggers.
///
/// A live entry means a provisioning attempt for that identity was
/// triggered within the last TTL window; it does not imply the attempt
/// succeeded. Entries expire lazily at acquire time; there is no sweeper
/// task. The map is this crate's only mutable shared state.
pub struct StartupDebouncer {
    entries: DashMap<Identity, Instant>,
    ttl: Duration,
}

impl StartupDebouncer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Atomically check for a live entry and create one if absent.
    ///
    /// Returns true iff the caller acquired the window and may provision.
    /// The check-and-set happens under the map's per-key shard lock, so two
    /// concurrent callers for the same fresh identity cannot both see
    /// "no entry".
    pub fn try_acquire(&self, identity: &Identity) -> bool {
        match self.entries.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().elapsed() >= self.ttl {
                    entry.insert(Instant::now());
                    true
                } else {
                    debug!(identity = %identity, "Provisioning trigger suppressed by debounce window");
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                true
            }
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().elapsed() < self.ttl)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn alice() -> Identity {
        Identity::parse("alice").unwrap()
    }

    #[test]
    fn test_first_acquire_succeeds_second_is_suppressed() {
        let debouncer = StartupDebouncer::new(Duration::from_secs(300));

        assert!(debouncer.try_acquire(&alice()));
        assert!(!debouncer.try_acquire(&alice()));
        assert!(!debouncer.try_acquire(&alice()));
        assert_eq!(debouncer.len(), 1);
    }

    #[test]
    fn test_distinct_identities_acquire_independently() {
        let debouncer = StartupDebouncer::new(Duration::from_secs(300));

        assert!(debouncer.try_acquire(&alice()));
        assert!(debouncer.try_acquire(&Identity::parse("bob").unwrap()));
        assert_eq!(debouncer.len(), 2);
    }

    #[test]
    fn test_acquire_succeeds_again_after_ttl() {
        let debouncer = StartupDebouncer::new(Duration::from_millis(40));

        assert!(debouncer.try_acquire(&alice()));
        assert!(!debouncer.try_acquire(&alice()));

        std::thread::sleep(Duration::from_millis(60));

        assert!(debouncer.try_acquire(&alice()));
        // The fresh entry opens a new window
        assert!(!debouncer.try_acquire(&alice()));
    }

    #[test]
    fn test_expired_entries_not_counted() {
        let debouncer = StartupDebouncer::new(Duration::from_millis(40));

        assert!(debouncer.try_acquire(&alice()));
        assert_eq!(debouncer.len(), 1);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(debouncer.len(), 0);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_yields_exactly_one_winner() {
        let debouncer = Arc::new(StartupDebouncer::new(Duration::from_secs(300)));
        let threads = 16;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let debouncer = Arc::clone(&debouncer);
                std::thread::spawn(move || debouncer.try_acquire(&alice()))
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|acquired| *acquired)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(debouncer.len(), 1);
    }
}
