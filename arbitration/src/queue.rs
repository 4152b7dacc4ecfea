//! Priority Queue: thread-safe, totally ordered claim heap
//!
//! Every operation takes the single internal lock for the structural
//! mutation only. Inserts wake the arbitration loop through a shared
//! [`Notify`] so a new claim is observed without waiting for a poll.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::model::{Claim, ClaimSummary};

/// Shared reference to ClaimQueue
pub type SharedClaimQueue = Arc<ClaimQueue>;

/// Max-heap of claims; the greatest claim is served first.
#[derive(Debug, Default)]
pub struct ClaimQueue {
    heap: Mutex<BinaryHeap<Claim>>,
    changed: Arc<Notify>,
}

impl ClaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that signals `changed` on every insert.
    pub fn with_notify(changed: Arc<Notify>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            changed,
        }
    }

    /// Create a shared reference to this queue
    pub fn shared(self) -> SharedClaimQueue {
        Arc::new(self)
    }

    /// Handle the arbitration loop waits on.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }

    // Every critical section leaves the heap valid, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Claim>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a claim. Duplicate requester ids are independent claims.
    pub fn insert(&self, claim: Claim) {
        self.lock().push(claim);
        self.changed.notify_one();
    }

    /// Highest-priority claim without removing it.
    pub fn peek_highest(&self) -> Option<Claim> {
        self.lock().peek().cloned()
    }

    /// Remove and return the highest-priority claim.
    pub fn pop_highest(&self) -> Option<Claim> {
        self.lock().pop()
    }

    /// Pop the top claim only if `pred` holds for it, in one critical section.
    pub fn pop_highest_if(&self, pred: impl FnOnce(&Claim) -> bool) -> Option<Claim> {
        let mut heap = self.lock();
        if pred(heap.peek()?) {
            heap.pop()
        } else {
            None
        }
    }

    /// Remove every claim matching `pred`, returning them.
    pub fn remove_where(&self, pred: impl Fn(&Claim) -> bool) -> Vec<Claim> {
        let mut heap = self.lock();
        let (removed, kept): (Vec<Claim>, Vec<Claim>) = std::mem::take(&mut *heap)
            .into_vec()
            .into_iter()
            .partition(|c| pred(c));
        *heap = BinaryHeap::from(kept);
        removed
    }

    /// Claims in service order. Copied out so callers never hold the lock.
    pub fn snapshot(&self) -> Vec<Claim> {
        let mut claims = self.lock().clone().into_vec();
        claims.sort_unstable_by(|a, b| b.cmp(a));
        claims
    }

    /// Serializable view of [`ClaimQueue::snapshot`].
    pub fn summaries(&self) -> Vec<ClaimSummary> {
        self.snapshot().iter().map(Claim::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClaimClock, Severity, SeverityScale};
    use std::time::Duration;

    fn sev(v: i64) -> Severity {
        SeverityScale::default().parse(v).unwrap()
    }

    #[test]
    fn test_empty_queue() {
        let queue = ClaimQueue::new();
        assert!(queue.is_empty());
        assert!(queue.peek_highest().is_none());
        assert!(queue.pop_highest().is_none());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();
        queue.insert(Claim::new("amb-1", sev(3), clock.stamp()));

        assert_eq!(queue.peek_highest().unwrap().requester_id(), "amb-1");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_highest().unwrap().requester_id(), "amb-1");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_order_severity_then_time() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();

        queue.insert(Claim::new("low-early", sev(1), clock.stamp()));
        tokio::time::advance(Duration::from_millis(100)).await;
        queue.insert(Claim::new("mid-early", sev(3), clock.stamp()));
        tokio::time::advance(Duration::from_millis(100)).await;
        queue.insert(Claim::new("high", sev(5), clock.stamp()));
        tokio::time::advance(Duration::from_millis(100)).await;
        queue.insert(Claim::new("mid-late", sev(3), clock.stamp()));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_highest())
            .map(|c| c.requester_id().to_string())
            .collect();
        assert_eq!(order, ["high", "mid-early", "mid-late", "low-early"]);
    }

    #[test]
    fn test_duplicate_requesters_are_independent() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();
        queue.insert(Claim::new("amb-1", sev(2), clock.stamp()));
        queue.insert(Claim::new("amb-1", sev(4), clock.stamp()));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_highest().unwrap().severity(), sev(4));
        assert_eq!(queue.pop_highest().unwrap().severity(), sev(2));
    }

    #[test]
    fn test_pop_highest_if_leaves_queue_untouched_on_reject() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();
        queue.insert(Claim::new("amb-1", sev(2), clock.stamp()));

        assert!(queue.pop_highest_if(|c| c.severity() > sev(3)).is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_highest_if(|c| c.severity() >= sev(2)).is_some());
        assert!(queue.pop_highest_if(|_| true).is_none());
    }

    #[test]
    fn test_remove_where_keeps_others_ordered() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();
        queue.insert(Claim::new("amb-1", sev(2), clock.stamp()));
        queue.insert(Claim::new("amb-2", sev(5), clock.stamp()));
        queue.insert(Claim::new("amb-1", sev(4), clock.stamp()));
        queue.insert(Claim::new("amb-3", sev(3), clock.stamp()));

        let removed = queue.remove_where(|c| c.requester_id() == "amb-1");
        assert_eq!(removed.len(), 2);

        let remaining: Vec<_> = queue
            .snapshot()
            .iter()
            .map(|c| c.requester_id().to_string())
            .collect();
        assert_eq!(remaining, ["amb-2", "amb-3"]);
    }

    #[test]
    fn test_snapshot_is_service_order() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new();
        for (id, s) in [("a", 2), ("b", 5), ("c", 1), ("d", 4)] {
            queue.insert(Claim::new(id, sev(s), clock.stamp()));
        }
        let ids: Vec<_> = queue
            .summaries()
            .into_iter()
            .map(|c| c.requester_id)
            .collect();
        assert_eq!(ids, ["b", "d", "a", "c"]);
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test]
    async fn test_insert_notifies_waiter() {
        let notify = Arc::new(Notify::new());
        let queue = ClaimQueue::with_notify(Arc::clone(&notify)).shared();
        let clock = ClaimClock::new();

        let waiter = tokio::spawn({
            let notify = Arc::clone(&notify);
            async move { notify.notified().await }
        });
        queue.insert(Claim::new("amb-1", sev(3), clock.stamp()));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }

    #[test]
    fn test_concurrent_inserts_are_all_observed() {
        let clock = ClaimClock::new();
        let queue = ClaimQueue::new().shared();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let s = SeverityScale::default().parse(1 + (i % 5)).unwrap();
                        queue.insert(Claim::new(format!("t{t}-{i}"), s, clock.stamp()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        let mut prev: Option<Claim> = None;
        while let Some(claim) = queue.pop_highest() {
            if let Some(p) = &prev {
                assert!(p.is_before(&claim));
            }
            prev = Some(claim);
        }
    }
}
