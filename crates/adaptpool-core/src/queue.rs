//! Bounded FIFO queue whose admission capacity can change at runtime.
//!
//! The capacity is an atomic kept apart from the item storage. Shrinking it
//! below the current occupancy never evicts anything: later offers are simply
//! refused until consumers catch up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{PoolError, PoolResult};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded, blocking FIFO queue with a mutable capacity.
pub struct ResizableBoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: AtomicUsize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> ResizableBoundedQueue<T> {
    /// Create a queue admitting at most `capacity` items.
    pub fn new(capacity: usize) -> PoolResult<Self> {
        if capacity == 0 {
            return Err(PoolError::invalid("queue capacity must be positive"));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: AtomicUsize::new(capacity),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Enqueue `item` unless the queue is at capacity or closed.
    ///
    /// Hands the item back on refusal.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || state.items.len() >= self.capacity() {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Like [`offer`](Self::offer) but waits up to `timeout` for room.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if state.items.len() < self.capacity() {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out() {
                return Err(item);
            }
        }
    }

    /// Dequeue the head, waiting up to `timeout` for one to arrive.
    ///
    /// Returns early with `None` when the queue is closed and empty, or when
    /// [`wake_all`](Self::wake_all) is called.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.closed {
            self.not_empty.wait_for(&mut state, timeout);
        }
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Dequeue the head without waiting.
    pub fn try_poll(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Change the admission capacity. Takes effect for the next offer.
    pub fn set_capacity(&self, capacity: usize) -> PoolResult<()> {
        if capacity == 0 {
            return Err(PoolError::invalid("queue capacity must be positive"));
        }
        self.capacity.store(capacity, Ordering::Release);
        // Blocked producers may now fit.
        self.not_full.notify_all();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slots left, never negative even after a shrink.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Refuse all further offers and wake every waiter.
    ///
    /// Items already queued stay available to `poll`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Remove and return every queued item.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.state.lock().items.drain(..).collect();
        self.not_full.notify_all();
        drained
    }

    /// Wake every consumer blocked in `poll` so it can re-check its state.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            ResizableBoundedQueue::<u32>::new(0),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn offer_refused_at_capacity() {
        let q = ResizableBoundedQueue::new(2).unwrap();
        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        assert_eq!(q.offer(3), Err(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.remaining_capacity(), 0);
    }

    #[test]
    fn fifo_order() {
        let q = ResizableBoundedQueue::new(4).unwrap();
        for i in 0..4 {
            q.offer(i).unwrap();
        }
        let out: Vec<_> = std::iter::from_fn(|| q.try_poll()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn grow_takes_effect_immediately() {
        let q = ResizableBoundedQueue::new(1).unwrap();
        q.offer(1).unwrap();
        assert!(q.offer(2).is_err());

        q.set_capacity(3).unwrap();
        assert!(q.offer(2).is_ok());
        assert_eq!(q.remaining_capacity(), 1);
    }

    #[test]
    fn shrink_below_occupancy_keeps_items() {
        let q = ResizableBoundedQueue::new(5).unwrap();
        for i in 0..4 {
            q.offer(i).unwrap();
        }

        q.set_capacity(2).unwrap();

        // Nothing evicted, remaining capacity clamps at zero.
        assert_eq!(q.len(), 4);
        assert_eq!(q.remaining_capacity(), 0);
        assert!(q.offer(9).is_err());

        // Admission resumes once occupancy drops below the new capacity.
        q.try_poll();
        q.try_poll();
        q.try_poll();
        assert!(q.offer(9).is_ok());
    }

    #[test]
    fn set_capacity_zero_rejected() {
        let q = ResizableBoundedQueue::<u8>::new(3).unwrap();
        assert!(q.set_capacity(0).is_err());
        assert_eq!(q.capacity(), 3);
    }

    #[test]
    fn poll_times_out_when_empty() {
        let q = ResizableBoundedQueue::<u8>::new(1).unwrap();
        assert_eq!(q.poll(Duration::from_millis(10)), None);
    }

    #[test]
    fn poll_receives_from_other_thread() {
        let q = Arc::new(ResizableBoundedQueue::new(1).unwrap());
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.offer(7).unwrap();
            })
        };
        assert_eq!(q.poll(Duration::from_secs(5)), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn offer_timeout_waits_for_room() {
        let q = Arc::new(ResizableBoundedQueue::new(1).unwrap());
        q.offer(1).unwrap();
        let consumer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.try_poll()
            })
        };
        assert!(q.offer_timeout(2, Duration::from_secs(5)).is_ok());
        assert_eq!(consumer.join().unwrap(), Some(1));
        assert_eq!(q.try_poll(), Some(2));
    }

    #[test]
    fn offer_timeout_gives_item_back() {
        let q = ResizableBoundedQueue::new(1).unwrap();
        q.offer(1).unwrap();
        assert_eq!(q.offer_timeout(2, Duration::from_millis(10)), Err(2));
    }

    #[test]
    fn closed_queue_refuses_but_drains() {
        let q = ResizableBoundedQueue::new(3).unwrap();
        q.offer(1).unwrap();
        q.close();

        assert!(q.is_closed());
        assert_eq!(q.offer(2), Err(2));
        assert_eq!(q.poll(Duration::from_secs(5)), Some(1));
        assert_eq!(q.poll(Duration::from_secs(5)), None);
    }

    #[test]
    fn drain_empties_queue() {
        let q = ResizableBoundedQueue::new(3).unwrap();
        q.offer('a').unwrap();
        q.offer('b').unwrap();
        assert_eq!(q.drain(), vec!['a', 'b']);
        assert!(q.is_empty());
    }
}
