//! Keyed memoization
//!
//! Decoded pages and FFT twiddle tables are expensive to rebuild, so the
//! pipeline routes them through a [`Cache`]. The default implementation is a
//! bounded LRU map behind a mutex; a poisoned lock degrades to a cache miss
//! rather than failing the page.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::trace;

/// Default number of entries kept by an [`LruMemo`]
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// A string-keyed cache of cloneable values
pub trait Cache<V: Clone>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn put(&self, key: &str, value: V);

    /// Drop every entry whose key starts with `prefix`; returns how many went
    fn invalidate(&self, prefix: &str) -> usize;

    /// Fetch `key`, computing and storing it on a miss
    fn get_or_insert_with(&self, key: &str, make: &mut dyn FnMut() -> V) -> V {
        if let Some(hit) = self.get(key) {
            return hit;
        }
        let value = make();
        self.put(key, value.clone());
        value
    }
}

/// Hit/miss counters for an [`LruMemo`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct MemoState<V> {
    entries: LruCache<String, V>,
    hits: u64,
    misses: u64,
}

/// Bounded LRU [`Cache`]
#[derive(Debug)]
pub struct LruMemo<V> {
    state: Mutex<MemoState<V>>,
}

impl<V> LruMemo<V> {
    /// Create a memo holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoState {
                entries: LruCache::new(cap),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self.state.lock() {
            Ok(state) => CacheStats {
                hits: state.hits,
                misses: state.misses,
                entries: state.entries.len(),
                capacity: state.entries.cap().get(),
            },
            Err(_) => CacheStats::default(),
        }
    }
}

impl<V> Default for LruMemo<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<V: Clone + Send> Cache<V> for LruMemo<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().ok()?;
        match state.entries.get(key).cloned() {
            Some(value) => {
                state.hits += 1;
                trace!(key, "cache hit");
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn put(&self, key: &str, value: V) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.put(key.to_string(), value);
        }
    }

    fn invalidate(&self, prefix: &str) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            state.entries.pop(key.as_str());
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_put_and_eviction() {
        let memo = LruMemo::new(2);
        memo.put("a", 1);
        memo.put("b", 2);
        assert_eq!(memo.get("a"), Some(1));
        memo.put("c", 3);
        // "b" was least recently used
        assert_eq!(memo.get("b"), None);
        assert_eq!(memo.get("c"), Some(3));

        let stats = memo.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.capacity, 2);
    }

    #[test]
    fn test_invalidate_prefix() {
        let memo = LruMemo::new(8);
        memo.put("page/1", 1);
        memo.put("page/2", 2);
        memo.put("fft/64", 3);
        assert_eq!(memo.invalidate("page/"), 2);
        assert_eq!(memo.get("page/1"), None);
        assert_eq!(memo.get("fft/64"), Some(3));
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let memo: LruMemo<Arc<Vec<u8>>> = LruMemo::new(4);
        let mut calls = 0;
        let first = memo.get_or_insert_with("k", &mut || {
            calls += 1;
            Arc::new(vec![1, 2, 3])
        });
        let second = memo.get_or_insert_with("k", &mut || {
            calls += 1;
            Arc::new(vec![])
        });
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let memo = LruMemo::new(0);
        memo.put("x", 'x');
        assert_eq!(memo.get("x"), Some('x'));
    }
}
