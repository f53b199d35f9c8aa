//! Frontier: bounded, breadth-first-by-depth queue of [`CrawlTask`]s (spec
//! §4.7).
//!
//! Seen-set membership and queue insertion share one lock so that two
//! workers racing to enqueue the same discovered link produce exactly one
//! enqueue (spec §4.7's "single critical section {check, insert, enqueue}").
//! `outstanding` counts every task that exists anywhere in the system,
//! queued or mid-processing by a worker, and is decremented exactly once,
//! when a task reaches a terminal state (spec §4.8); that is what lets the
//! worker pool detect termination race-free (spec §4.8 step 1, §5).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::config::QUEUE_SIZE_THRESHOLD;
use crate::types::CrawlTask;

struct FrontierState {
    seen: HashSet<String>,
    queue: BTreeMap<usize, VecDeque<CrawlTask>>,
}

/// Bounded FIFO-within-depth, breadth-first-by-depth work queue.
pub struct Frontier {
    state: Mutex<FrontierState>,
    capacity: Semaphore,
    not_empty: Notify,
    outstanding: AtomicUsize,
}

/// What happened when a caller tried to enqueue a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Newly admitted: the caller won the seen-set race.
    Enqueued,
    /// Already present in the seen set; no-op.
    Duplicate,
}

impl Frontier {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_SIZE_THRESHOLD)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(FrontierState {
                seen: HashSet::new(),
                queue: BTreeMap::new(),
            }),
            capacity: Semaphore::new(capacity),
            not_empty: Notify::new(),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Enqueue `task`, blocking the caller (backpressure) if the queue is
    /// at capacity. Idempotent against the seen set: only the first caller
    /// for a given canonical URL is told `Enqueued`.
    pub async fn enqueue(&self, task: CrawlTask) -> EnqueueOutcome {
        // Reserve capacity before taking the lock so we never hold the lock
        // across an await that can block indefinitely.
        let permit = self
            .capacity
            .acquire()
            .await
            .expect("frontier semaphore is never closed");
        permit.forget();

        let mut state = self.state.lock().await;
        if state.seen.contains(&task.url) {
            drop(state);
            self.capacity.add_permits(1);
            return EnqueueOutcome::Duplicate;
        }
        state.seen.insert(task.url.clone());
        state.queue.entry(task.depth).or_default().push_back(task);
        drop(state);

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.not_empty.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Pop the lowest-depth, earliest-enqueued task, waiting up to
    /// `timeout` for one to appear.
    pub async fn acquire_task(&self, timeout: std::time::Duration) -> Option<CrawlTask> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some((&depth, bucket)) = state.queue.iter_mut().next() {
                    let task = bucket.pop_front();
                    if bucket.is_empty() {
                        state.queue.remove(&depth);
                    }
                    if let Some(task) = task {
                        drop(state);
                        self.capacity.add_permits(1);
                        return Some(task);
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let wait = tokio::time::timeout(remaining, self.not_empty.notified());
            if wait.await.is_err() {
                return None;
            }
        }
    }

    /// Record that a dequeued task has reached a terminal state. Must be
    /// called exactly once per task that was ever returned by
    /// `acquire_task`.
    pub fn mark_terminal(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.values().map(VecDeque::len).sum()
    }

    pub async fn seen_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn task(url: &str, depth: usize) -> CrawlTask {
        CrawlTask {
            url: url.to_string(),
            depth,
            metadata: HashMap::new(),
            parent_url: None,
            is_retry: false,
        }
    }

    #[tokio::test]
    async fn breadth_first_fifo_within_depth() {
        let frontier = Frontier::new();
        frontier.enqueue(task("a", 1)).await;
        frontier.enqueue(task("b", 0)).await;
        frontier.enqueue(task("c", 1)).await;
        frontier.enqueue(task("d", 0)).await;

        let first = frontier.acquire_task(std::time::Duration::from_millis(100)).await.unwrap();
        let second = frontier.acquire_task(std::time::Duration::from_millis(100)).await.unwrap();
        let third = frontier.acquire_task(std::time::Duration::from_millis(100)).await.unwrap();
        let fourth = frontier.acquire_task(std::time::Duration::from_millis(100)).await.unwrap();

        assert_eq!(first.url, "b");
        assert_eq!(second.url, "d");
        assert_eq!(third.url, "a");
        assert_eq!(fourth.url, "c");
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_no_op() {
        let frontier = Frontier::new();
        assert_eq!(frontier.enqueue(task("a", 0)).await, EnqueueOutcome::Enqueued);
        assert_eq!(frontier.enqueue(task("a", 1)).await, EnqueueOutcome::Duplicate);
        assert_eq!(frontier.len().await, 1);
    }

    #[tokio::test]
    async fn acquire_times_out_on_empty_queue() {
        let frontier = Frontier::new();
        let result = frontier.acquire_task(std::time::Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn outstanding_decrements_only_on_terminal() {
        let frontier = Frontier::new();
        frontier.enqueue(task("a", 0)).await;
        assert_eq!(frontier.outstanding(), 1);
        let _task = frontier.acquire_task(std::time::Duration::from_millis(100)).await.unwrap();
        assert_eq!(frontier.outstanding(), 1, "dequeue alone must not decrement outstanding");
        frontier.mark_terminal();
        assert_eq!(frontier.outstanding(), 0);
    }

    #[tokio::test]
    async fn concurrent_duplicate_enqueues_admit_exactly_once() {
        let frontier = Arc::new(Frontier::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let frontier = frontier.clone();
            handles.push(tokio::spawn(async move {
                frontier.enqueue(task("dup", 0)).await
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() == EnqueueOutcome::Enqueued {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
