//! Bounded drop-oldest queue
//!
//! Producers never block: pushing into a full queue evicts the oldest item.
//! A single consumer awaits items until the queue is closed and drained.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    evicted: u64,
}

pub struct DropOldestQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                evicted: 0,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Push an item, returning the evicted oldest item if the queue was full.
    ///
    /// Items pushed after `close` are handed straight back.
    pub fn push(&self, item: T) -> Result<Option<T>, T> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(item);
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.evicted += 1;
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(item);
            evicted
        };
        self.notify.notify_one();
        Ok(evicted)
    }

    /// Wait for the next item; `None` once closed and empty
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Stop accepting items; queued items remain poppable
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items evicted by overflow
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_evicts_oldest_when_full() {
        let queue = DropOldestQueue::new(2);
        assert_eq!(queue.push(1), Ok(None));
        assert_eq!(queue.push(2), Ok(None));
        assert_eq!(queue.push(3), Ok(Some(1)));
        assert_eq!(queue.evicted(), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let queue = DropOldestQueue::new(2);
        queue.close();
        assert_eq!(queue.push(7), Err(7));
    }

    #[tokio::test]
    async fn test_pop_drains_then_ends_after_close() {
        let queue = DropOldestQueue::new(4);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.close();
        assert_eq!(queue.pop().await, Some("a"));
        assert_eq!(queue.pop().await, Some("b"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(DropOldestQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(42).unwrap();
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue: Arc<DropOldestQueue<u8>> = Arc::new(DropOldestQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(consumer.await.unwrap(), None);
    }
}
