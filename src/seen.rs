//! Process-wide seen set (spec §3 `SeenSet`) as a standalone primitive.
//!
//! [`Frontier`](crate::frontier::Frontier) does not delegate to this type:
//! spec §4.7 requires `{contains, insert, enqueue}` run under a *single*
//! critical section, so the frontier keeps its own `HashSet` under the same
//! lock that guards its queue rather than taking a second lock here. This
//! type exists for callers that want seen-set semantics decoupled from a
//! frontier, e.g. `crawl_single` dedup across repeated calls, or tests that
//! exercise the seen-set contract in isolation.

use std::collections::HashSet;

use tokio::sync::Mutex;

/// Monotone-growing set of canonical URLs. Once a canonical URL is present
/// it is never removed; the set is discarded with the engine.
#[derive(Debug, Default)]
pub struct SeenSet {
    inner: Mutex<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashSet::new()),
        }
    }

    /// Atomically test-and-set: returns `true` if `canonical` was newly
    /// inserted (i.e. the caller won the race and should enqueue), `false`
    /// if it was already present.
    pub async fn insert_if_absent(&self, canonical: &str) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.contains(canonical) {
            false
        } else {
            guard.insert(canonical.to_string());
            true
        }
    }

    pub async fn contains(&self, canonical: &str) -> bool {
        self.inner.lock().await.contains(canonical)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_one_caller_wins_the_race() {
        let seen = SeenSet::new();
        assert!(seen.insert_if_absent("https://example.com/a").await);
        assert!(!seen.insert_if_absent("https://example.com/a").await);
        assert_eq!(seen.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_inserts_produce_exactly_one_winner() {
        use std::sync::Arc;
        let seen = Arc::new(SeenSet::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let seen = seen.clone();
            handles.push(tokio::spawn(async move {
                seen.insert_if_absent("https://example.com/dup").await
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
