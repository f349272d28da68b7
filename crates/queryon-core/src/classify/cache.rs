// Classification cache - avoids repeated LLM calls for identical queries

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::ClassificationResult;

const DEFAULT_MAX_SIZE: usize = 500;
const DEFAULT_TTL_SECONDS: u64 = 3600;

struct Entry {
    result: ClassificationResult,
    stored_at: Instant,
    /// Monotone counter stamp for LRU ordering
    touched: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    clock: u64,
}

/// LRU cache keyed on the normalised (trimmed, lowercased) query string, with
/// TTL expiry. Process-wide and shared across in-flight turns, so all access
/// goes through one lock; entries are small and contention is low.
pub struct ClassificationCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl Default for ClassificationCache {
    fn default() -> Self {
        ClassificationCache::new(DEFAULT_MAX_SIZE, Duration::from_secs(DEFAULT_TTL_SECONDS))
    }
}

impl ClassificationCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        ClassificationCache {
            max_size,
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn get(&self, query: &str) -> Option<ClassificationResult> {
        let key = normalise(query);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.clock += 1;
        let clock = inner.clock;

        let entry = inner.entries.get_mut(&key)?;
        if entry.stored_at.elapsed() > self.ttl {
            inner.entries.remove(&key);
            return None;
        }
        entry.touched = clock;
        tracing::debug!(query = %truncate_chars(query, 60), "ClassificationCache: hit");
        let mut result = entry.result.clone();
        result.classifier_layer = Some("cache".to_string());
        Some(result)
    }

    pub fn put(&self, query: &str, result: ClassificationResult) {
        let key = normalise(query);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.clock += 1;
        let clock = inner.clock;
        inner.entries.insert(
            key,
            Entry {
                result,
                stored_at: Instant::now(),
                touched: clock,
            },
        );
        while inner.entries.len() > self.max_size {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalise(query: &str) -> String {
    query.trim().to_lowercase()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentType;

    fn result(intent: IntentType) -> ClassificationResult {
        ClassificationResult::new(intent, 0.9, "llm")
    }

    #[test]
    fn hit_is_keyed_on_normalised_query() {
        let cache = ClassificationCache::default();
        cache.put("  Fiyat Listesi ", result(IntentType::Rule));
        let hit = cache.get("fiyat listesi").unwrap();
        assert_eq!(hit.intent, IntentType::Rule);
        assert_eq!(hit.classifier_layer.as_deref(), Some("cache"));
    }

    #[test]
    fn miss_returns_none() {
        let cache = ClassificationCache::default();
        assert!(cache.get("hiç sorulmadı").is_none());
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let cache = ClassificationCache::new(10, Duration::from_millis(0));
        cache.put("soru", result(IntentType::Direct));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("soru").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn lru_evicts_least_recently_used_at_capacity() {
        let cache = ClassificationCache::new(2, Duration::from_secs(3600));
        cache.put("a", result(IntentType::Rag));
        cache.put("b", result(IntentType::Direct));
        // touch "a" so "b" becomes the LRU entry
        assert!(cache.get("a").is_some());
        cache.put("c", result(IntentType::Tool));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }
}
