//! Bounded warmup task queue.
//!
//! Tasks are ordered by `(scheduled_time, -priority)` with an insertion
//! sequence as the final tie-break. A key has at most one queued task; a new
//! task for the same key replaces the old one. When the queue is full the
//! lowest-priority task is evicted, or the incoming task is rejected if it
//! ranks below everything already queued.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// A scheduled predictive pre-fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupTask {
    pub key: String,
    pub data_type: String,
    pub scheduled_time: DateTime<Utc>,
    pub priority: u32,
    pub loader_name: String,
    pub loader_params: Value,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Result of offering a task to the queue
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// An existing task for the same key was replaced
    Replaced,
    /// Queue was full; the returned lower-priority task was evicted
    Evicted(WarmupTask),
    /// Queue was full and the incoming task ranked lowest
    Rejected(WarmupTask),
}

type QueueKey = (DateTime<Utc>, Reverse<u32>, u64);

#[derive(Debug, Default)]
struct QueueInner {
    tasks: BTreeMap<QueueKey, WarmupTask>,
    by_key: HashMap<String, QueueKey>,
    seq: u64,
}

impl QueueInner {
    fn remove_key(&mut self, key: &str) -> Option<WarmupTask> {
        let slot = self.by_key.remove(key)?;
        self.tasks.remove(&slot)
    }

    /// Lowest priority first, latest scheduled among equals
    fn lowest_priority_slot(&self) -> Option<QueueKey> {
        self.tasks
            .keys()
            .min_by(|a, b| {
                a.1 .0
                    .cmp(&b.1 .0)
                    .then_with(|| b.0.cmp(&a.0))
                    .then_with(|| b.2.cmp(&a.2))
            })
            .copied()
    }
}

#[derive(Debug)]
pub struct WarmupQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl WarmupQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn push(&self, task: WarmupTask) -> PushOutcome {
        let mut inner = self.inner.lock();
        let replaced = inner.remove_key(&task.key).is_some();

        let mut evicted = None;
        if inner.tasks.len() >= self.capacity {
            if let Some(slot) = inner.lowest_priority_slot() {
                let lowest_priority = slot.1 .0;
                if task.priority < lowest_priority {
                    return PushOutcome::Rejected(task);
                }
                if let Some(victim) = inner.tasks.remove(&slot) {
                    inner.by_key.remove(&victim.key);
                    evicted = Some(victim);
                }
            }
        }

        inner.seq += 1;
        let slot = (task.scheduled_time, Reverse(task.priority), inner.seq);
        inner.by_key.insert(task.key.clone(), slot);
        inner.tasks.insert(slot, task);

        match (evicted, replaced) {
            (Some(victim), _) => PushOutcome::Evicted(victim),
            (None, true) => PushOutcome::Replaced,
            (None, false) => PushOutcome::Queued,
        }
    }

    /// Remove and return up to `limit` tasks due at or before `now`, earliest first
    pub fn pop_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<WarmupTask> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();

        while due.len() < limit {
            let Some(entry) = inner.tasks.first_entry() else {
                break;
            };
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            inner.by_key.remove(&task.key);
            due.push(task);
        }
        due
    }

    pub fn remove(&self, key: &str) -> Option<WarmupTask> {
        self.inner.lock().remove_key(key)
    }

    pub fn get(&self, key: &str) -> Option<WarmupTask> {
        let inner = self.inner.lock();
        let slot = inner.by_key.get(key)?;
        inner.tasks.get(slot).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().by_key.contains_key(key)
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().tasks.keys().next().map(|slot| slot.0)
    }

    /// Queued tasks in execution order
    pub fn snapshot(&self) -> Vec<WarmupTask> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tasks.clear();
        inner.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn task(key: &str, offset_secs: i64, priority: u32) -> WarmupTask {
        WarmupTask {
            key: key.to_string(),
            data_type: "price".to_string(),
            scheduled_time: Utc::now() + Duration::seconds(offset_secs),
            priority,
            loader_name: "prices".to_string(),
            loader_params: json!({}),
            retry_count: 0,
            max_retries: 3,
        }
    }

    #[test]
    fn test_orders_by_time_then_priority() {
        let queue = WarmupQueue::new(10);
        let base = Utc::now() - Duration::seconds(10);
        let mut low = task("low", 0, 1);
        let mut high = task("high", 0, 9);
        low.scheduled_time = base;
        high.scheduled_time = base;
        queue.push(low);
        queue.push(high);
        queue.push(task("earliest", -60, 1));

        let keys: Vec<String> = queue
            .pop_due(Utc::now(), 10)
            .into_iter()
            .map(|t| t.key)
            .collect();
        assert_eq!(keys, vec!["earliest", "high", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_due_leaves_future_tasks() {
        let queue = WarmupQueue::new(10);
        queue.push(task("now", -1, 1));
        queue.push(task("later", 3_600, 1));

        assert_eq!(queue.pop_due(Utc::now(), 10).len(), 1);
        assert!(queue.contains_key("later"));
        assert!(queue.next_due().unwrap() > Utc::now());
    }

    #[test]
    fn test_same_key_replaces() {
        let queue = WarmupQueue::new(10);
        assert_eq!(queue.push(task("k", 100, 1)), PushOutcome::Queued);
        assert_eq!(queue.push(task("k", 50, 5)), PushOutcome::Replaced);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("k").unwrap().priority, 5);
    }

    #[test]
    fn test_full_queue_evicts_lowest_priority() {
        let queue = WarmupQueue::new(2);
        queue.push(task("a", 10, 5));
        queue.push(task("b", 20, 2));

        match queue.push(task("c", 30, 4)) {
            PushOutcome::Evicted(victim) => assert_eq!(victim.key, "b"),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(queue.len(), 2);

        assert!(matches!(
            queue.push(task("d", 5, 1)),
            PushOutcome::Rejected(_)
        ));
        assert!(!queue.contains_key("d"));
    }
}
