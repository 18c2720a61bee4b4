//! Flow-control queues for subscriptions.
//!
//! Each subscription owns one [`PolicyQueue`]. The producer side is the
//! transport delivery hook; the consumer is the subscription's worker.
//! Four policies:
//!
//! | Policy | Producer | Consumer |
//! |--------|----------|----------|
//! | Unbounded | never waits | FIFO |
//! | Drop-after(N) | overflow drops the newest arrival | FIFO over kept items |
//! | Block-after(N) | waits for space | FIFO |
//! | Coalesce | replaces the single slot | last-wins |
//!
//! A queue can be closed at any time: waiting producers wake with
//! [`QueueClosed`], the consumer's [`dequeue`](PolicyQueue::dequeue)
//! returns `None`, and whatever was queued but undelivered is recovered
//! with [`drain`](PolicyQueue::drain) so a policy swap can move it into
//! the replacement queue ([`absorb`](PolicyQueue::absorb)).

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Error returned to a producer whose queue was closed underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueClosed;

#[derive(Debug, Clone, Copy)]
enum Policy {
    Unbounded,
    DropAfter(usize),
    BlockAfter(usize),
    Coalesce,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<String>,
    closed: bool,
}

/// A closable FIFO with a fixed flow-control policy.
#[derive(Debug)]
pub(crate) struct PolicyQueue {
    policy: Policy,
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
}

impl PolicyQueue {
    pub fn unbounded() -> Self {
        Self::with_policy(Policy::Unbounded)
    }

    pub fn drop_after(limit: usize) -> Self {
        Self::with_policy(Policy::DropAfter(limit))
    }

    pub fn block_after(limit: usize) -> Self {
        Self::with_policy(Policy::BlockAfter(limit))
    }

    pub fn coalesced() -> Self {
        Self::with_policy(Policy::Coalesce)
    }

    fn with_policy(policy: Policy) -> Self {
        Self {
            policy,
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Adds an item under the queue's policy. Suspends only under
    /// Block-after when the queue is full.
    pub async fn enqueue(&self, item: String) -> Result<(), QueueClosed> {
        match self.policy {
            Policy::Unbounded => self.push(item),
            Policy::DropAfter(limit) => {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                // Overflow drops the newest arrival, i.e. this one.
                if state.items.len() < limit {
                    state.items.push_back(item);
                    self.not_empty.notify_one();
                }
                Ok(())
            }
            Policy::Coalesce => {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                state.items.clear();
                state.items.push_back(item);
                self.not_empty.notify_one();
                Ok(())
            }
            Policy::BlockAfter(limit) => {
                loop {
                    let waiter = self.not_full.notified();
                    tokio::pin!(waiter);
                    {
                        let mut state = self.state.lock();
                        if state.closed {
                            return Err(QueueClosed);
                        }
                        if state.items.len() < limit {
                            state.items.push_back(item);
                            self.not_empty.notify_one();
                            return Ok(());
                        }
                        // Register interest before releasing the lock so a
                        // wakeup between unlock and await is not lost.
                        waiter.as_mut().enable();
                    }
                    waiter.await;
                }
            }
        }
    }

    fn push(&self, item: String) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the next item in FIFO order, suspending while the queue is
    /// open and empty. Returns `None` once the queue is closed; items
    /// still queued at close time are left for [`drain`](Self::drain).
    pub async fn dequeue(&self) -> Option<String> {
        loop {
            let waiter = self.not_empty.notified();
            tokio::pin!(waiter);
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(item);
                }
                waiter.as_mut().enable();
            }
            waiter.await;
        }
    }

    /// Closes the queue, waking every waiting producer and the consumer.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Removes and returns everything still queued, in order.
    pub fn drain(&self) -> Vec<String> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.items).into()
    }

    /// Moves items (a closed predecessor's backlog) into this queue in
    /// order, applying this queue's policy without ever suspending:
    /// Drop-after keeps the oldest `N`, Coalesce keeps the last item, and
    /// Block-after admits the whole backlog (its limit binds producers,
    /// not the swap).
    pub fn absorb(&self, items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        match self.policy {
            Policy::Unbounded | Policy::BlockAfter(_) => state.items.extend(items),
            Policy::DropAfter(limit) => {
                for item in items {
                    if state.items.len() >= limit {
                        break;
                    }
                    state.items.push_back(item);
                }
            }
            Policy::Coalesce => {
                state.items.clear();
                if let Some(last) = items.into_iter().next_back() {
                    state.items.push_back(last);
                }
            }
        }
        drop(state);
        self.not_empty.notify_one();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn unbounded_is_fifo() {
        let q = PolicyQueue::unbounded();
        for item in ["a", "b", "c"] {
            q.enqueue(item.into()).await.unwrap();
        }
        assert_eq!(q.dequeue().await.as_deref(), Some("a"));
        assert_eq!(q.dequeue().await.as_deref(), Some("b"));
        assert_eq!(q.dequeue().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn dequeue_waits_for_an_item() {
        let q = Arc::new(PolicyQueue::unbounded());
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::task::yield_now().await;
        q.enqueue("late".into()).await.unwrap();
        let got = timeout(TICK, consumer).await.expect("consumer should wake");
        assert_eq!(got.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn drop_after_keeps_the_oldest() {
        let q = PolicyQueue::drop_after(2);
        for item in ["a", "b", "c", "d", "e"] {
            q.enqueue(item.into()).await.unwrap();
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.dequeue().await.as_deref(), Some("a"));
        assert_eq!(q.dequeue().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn coalesce_keeps_the_newest() {
        let q = PolicyQueue::coalesced();
        for item in ["a", "b", "c", "d", "e"] {
            q.enqueue(item.into()).await.unwrap();
        }
        assert_eq!(q.len(), 1);
        assert_eq!(q.dequeue().await.as_deref(), Some("e"));
    }

    #[tokio::test]
    async fn block_after_blocks_the_producer() {
        let q = Arc::new(PolicyQueue::block_after(2));
        q.enqueue("a".into()).await.unwrap();
        q.enqueue("b".into()).await.unwrap();

        let producer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.enqueue("c".into()).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished(), "producer should be waiting");

        assert_eq!(q.dequeue().await.as_deref(), Some("a"));
        let result = timeout(TICK, producer).await.expect("producer should wake");
        assert_eq!(result.unwrap(), Ok(()));
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_producer_with_an_error() {
        let q = Arc::new(PolicyQueue::block_after(1));
        q.enqueue("a".into()).await.unwrap();
        let producer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.enqueue("b".into()).await })
        };
        tokio::task::yield_now().await;
        q.close();
        let result = timeout(TICK, producer).await.expect("producer should wake");
        assert_eq!(result.unwrap(), Err(QueueClosed));
    }

    #[tokio::test]
    async fn close_stops_the_consumer_and_preserves_the_backlog() {
        let q = PolicyQueue::unbounded();
        q.enqueue("a".into()).await.unwrap();
        q.enqueue("b".into()).await.unwrap();
        q.close();
        assert_eq!(q.dequeue().await, None);
        assert_eq!(q.drain(), vec!["a".to_string(), "b".to_string()]);
        assert!(q.enqueue("c".into()).await.is_err());
    }

    #[tokio::test]
    async fn absorb_applies_the_new_policy() {
        let backlog = vec!["a".to_string(), "b".into(), "c".into()];

        let unbounded = PolicyQueue::unbounded();
        unbounded.absorb(backlog.clone());
        assert_eq!(unbounded.len(), 3);
        assert_eq!(unbounded.dequeue().await.as_deref(), Some("a"));

        let dropping = PolicyQueue::drop_after(2);
        dropping.absorb(backlog.clone());
        assert_eq!(dropping.dequeue().await.as_deref(), Some("a"));
        assert_eq!(dropping.dequeue().await.as_deref(), Some("b"));
        assert_eq!(dropping.len(), 0);

        let coalesced = PolicyQueue::coalesced();
        coalesced.absorb(backlog.clone());
        assert_eq!(coalesced.dequeue().await.as_deref(), Some("c"));

        // The backlog may exceed a blocking queue's limit; producers are
        // bounded afterwards, the move is not.
        let blocking = PolicyQueue::block_after(2);
        blocking.absorb(backlog);
        assert_eq!(blocking.len(), 3);
    }
}
