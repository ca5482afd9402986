//! Monomorphic call-site caches
//!
//! The cached (class id, dispatcher id) pair is packed into one `AtomicU64`
//! so readers always observe a consistent pair. Relaxed ordering is enough:
//! a stale read only costs a miss, and dispatchers are immutable once
//! registered.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CallSiteCache {
    cell: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
}

/// Counters for one site
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
}

fn pack(type_id: u32, dispatcher: u32) -> u64 {
    ((type_id as u64) << 32) | dispatcher as u64
}

impl CallSiteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher id cached for `type_id`, counting the hit or miss.
    /// Class ids start at 1, so an empty cell never matches.
    pub fn lookup(&self, type_id: u32) -> Option<u32> {
        let packed = self.cell.load(Ordering::Relaxed);
        if packed != 0 && (packed >> 32) as u32 == type_id {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(packed as u32)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn install(&self, type_id: u32, dispatcher: u32) {
        self.cell.store(pack(type_id, dispatcher), Ordering::Relaxed);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the cached pair so the next lookup misses
    pub fn invalidate(&self) {
        self.cell.store(0, Ordering::Relaxed);
    }

    /// The cached pair, if any
    pub fn entry(&self) -> Option<(u32, u32)> {
        match self.cell.load(Ordering::Relaxed) {
            0 => None,
            packed => Some(((packed >> 32) as u32, packed as u32)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_miss_install_hit() {
        let cache = CallSiteCache::new();
        assert_eq!(cache.lookup(5), None);
        cache.install(5, 9);
        assert_eq!(cache.lookup(5), Some(9));
        assert_eq!(cache.lookup(6), None);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                updates: 1
            }
        );
    }

    #[test]
    fn test_dispatcher_zero_is_cacheable() {
        let cache = CallSiteCache::new();
        cache.install(3, 0);
        assert_eq!(cache.lookup(3), Some(0));
        assert_eq!(cache.entry(), Some((3, 0)));
    }

    #[test]
    fn test_pairs_never_tear_under_contention() {
        let cache = Arc::new(CallSiteCache::new());
        let writers: Vec<_> = (1..=4u32)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        cache.install(t, t * 100);
                    }
                })
            })
            .collect();
        for _ in 0..10_000 {
            if let Some((t, d)) = cache.entry() {
                assert_eq!(d, t * 100);
            }
        }
        for w in writers {
            w.join().unwrap();
        }
    }
}
