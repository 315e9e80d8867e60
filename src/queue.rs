//! Profile queue (C5, §4.5): a bounded FIFO ring of completed profiles with a
//! blocking "wait until N available" consumer primitive.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::profile::Profile;

pub const QUEUE_CAPACITY: usize = 1_000;

struct Inner {
    ring: VecDeque<Profile>,
    /// Set when the owning receiver transitions to Stopped, to release
    /// consumers blocked in `wait_until_available`.
    stopped: bool,
}

/// A bounded ring of completed profiles, produced by the receiver task and
/// consumed by arbitrary caller threads.
pub struct ProfileQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for ProfileQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileQueue {
    pub fn new() -> Self {
        ProfileQueue {
            inner: Mutex::new(Inner { ring: VecDeque::with_capacity(QUEUE_CAPACITY), stopped: false }),
            condvar: Condvar::new(),
        }
    }

    /// Appends a profile, evicting the oldest if the ring is already full.
    pub fn push(&self, profile: Profile) {
        let mut inner = self.inner.lock().unwrap();
        if inner.ring.len() >= QUEUE_CAPACITY {
            inner.ring.pop_front();
        }
        inner.ring.push_back(profile);
        self.condvar.notify_all();
    }

    /// Current depth, non-blocking.
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap().ring.len()
    }

    /// Blocks until at least `n` profiles are available or `timeout` elapses,
    /// also waking (and returning early) once the receiver stops. Returns the
    /// depth observed at wake time, which may be less than `n`.
    pub fn wait_until_available(&self, n: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.ring.len() >= n || inner.stopped {
                return inner.ring.len();
            }
            let now = Instant::now();
            if now >= deadline {
                return inner.ring.len();
            }
            let (guard, timeout_result) = self
                .condvar
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
            if timeout_result.timed_out() && inner.ring.len() < n && !inner.stopped {
                return inner.ring.len();
            }
        }
    }

    /// Hands out up to `n` profiles in FIFO order.
    pub fn pop(&self, n: usize) -> Vec<Profile> {
        let mut inner = self.inner.lock().unwrap();
        let take = n.min(inner.ring.len());
        inner.ring.drain(..take).collect()
    }

    /// Discards all queued profiles.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ring.clear();
    }

    /// Marks the queue's receiver as stopped, waking any blocked consumers.
    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        self.condvar.notify_all();
    }

    /// Clears the stopped flag, e.g. when the receiver restarts.
    pub fn mark_running(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CameraId;
    use std::sync::Arc;
    use std::thread;

    fn dummy_profile(timestamp: u64) -> Profile {
        Profile::new(1, CameraId::A, 0, timestamp, 0)
    }

    #[test]
    fn s4_eviction_keeps_only_last_capacity_profiles() {
        let q = ProfileQueue::new();
        for i in 0..1_200u64 {
            q.push(dummy_profile(i));
        }
        assert_eq!(q.available(), QUEUE_CAPACITY);
        let popped = q.pop(1);
        // The first 200 produced (timestamps 0..200) must have been evicted.
        assert!(popped[0].timestamp_ns >= 200);
    }

    #[test]
    fn wait_until_available_returns_immediately_when_satisfied() {
        let q = ProfileQueue::new();
        q.push(dummy_profile(1));
        q.push(dummy_profile(2));
        let depth = q.wait_until_available(2, Duration::from_millis(10));
        assert_eq!(depth, 2);
    }

    #[test]
    fn wait_until_available_times_out_when_unsatisfied() {
        let q = ProfileQueue::new();
        let start = Instant::now();
        let depth = q.wait_until_available(5, Duration::from_millis(50));
        assert_eq!(depth, 0);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn wait_until_available_wakes_on_push_from_another_thread() {
        let q = Arc::new(ProfileQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.push(dummy_profile(1));
        });
        let depth = q.wait_until_available(1, Duration::from_secs(2));
        assert_eq!(depth, 1);
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_available_wakes_on_stop() {
        let q = Arc::new(ProfileQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.mark_stopped();
        });
        let start = Instant::now();
        let depth = q.wait_until_available(5, Duration::from_secs(2));
        assert_eq!(depth, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn clear_discards_all() {
        let q = ProfileQueue::new();
        q.push(dummy_profile(1));
        q.clear();
        assert_eq!(q.available(), 0);
    }
}
