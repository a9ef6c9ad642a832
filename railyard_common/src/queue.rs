//! Blocking FIFO queue used to wake automode runners.
//!
//! Feedback events for a locomotive are processed in delivery order;
//! the runner blocks with a timeout so it can also observe its tick,
//! the manual-mode request and the terminate flag.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct EventQueue<T> {
    items: Mutex<VecDeque<T>>,
    wakeup: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
        }
    }

    /// Append an item and wake one waiter.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock().expect("event queue poisoned");
        items.push_back(item);
        self.wakeup.notify_one();
    }

    /// Re-queue an item at the front, preserving delivery order after
    /// a consumer had to back off (e.g. booster stop).
    pub fn push_front(&self, item: T) {
        let mut items = self.items.lock().expect("event queue poisoned");
        items.push_front(item);
        self.wakeup.notify_one();
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().expect("event queue poisoned");
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(items, deadline - now)
                .expect("event queue poisoned");
            items = guard;
        }
    }

    pub fn clear(&self) {
        self.items.lock().expect("event queue poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("event queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = EventQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(1));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(2));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(3));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn push_front_requeues() {
        let q = EventQueue::new();
        q.push(2);
        q.push_front(1);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(1));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(2));
    }

    #[test]
    fn timeout_expires_empty() {
        let q: EventQueue<u8> = EventQueue::new();
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn wakes_blocked_consumer() {
        let q = Arc::new(EventQueue::new());
        let producer = Arc::clone(&q);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.push(42u32);
        });
        let got = q.pop_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(got, Some(42));
    }
}
