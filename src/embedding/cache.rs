//! Bounded in-process embedding cache.
//!
//! Keyed by `(content sha256, model id)` so a model upgrade can never
//! serve stale vectors. The lock is a short synchronous critical section;
//! it is never held across an await point.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct EmbeddingCache {
    inner: Mutex<LruCache<(String, String), Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, content_hash: &str, model: &str) -> Option<Vec<f32>> {
        self.inner
            .lock()
            .get(&(content_hash.to_string(), model.to_string()))
            .cloned()
    }

    pub fn put(&self, content_hash: &str, model: &str, vector: Vec<f32>) {
        self.inner
            .lock()
            .put((content_hash.to_string(), model.to_string()), vector);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", "m", vec![1.0]);
        cache.put("b", "m", vec![2.0]);
        assert!(cache.get("a", "m").is_some());
        cache.put("c", "m", vec![3.0]);
        // "b" was least recently used.
        assert!(cache.get("b", "m").is_none());
        assert!(cache.get("a", "m").is_some());
        assert!(cache.get("c", "m").is_some());
    }

    #[test]
    fn model_id_is_part_of_the_key() {
        let cache = EmbeddingCache::new(4);
        cache.put("a", "model-1", vec![1.0]);
        assert!(cache.get("a", "model-2").is_none());
    }
}
