//! Countdown latch: the one blocking point of a transaction's control thread.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrement, saturating at zero. Wakes every waiter on reaching zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Drop the count straight to zero.
    pub fn release_all(&self) {
        let mut count = self.count.lock();
        *count = 0;
        self.zero.notify_all();
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Returns false if the timeout passed with the count still positive.
    /// Spurious wakeups do not extend the bound.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_after_last_count_down() {
        let latch = Arc::new(CountDownLatch::new(3));
        let worker = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || {
                for _ in 0..3 {
                    latch.count_down();
                }
            })
        };
        latch.wait();
        worker.join().expect("worker");
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn count_down_saturates() {
        let latch = CountDownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn timeout_bounded_across_wakeups() {
        let latch = CountDownLatch::new(2);
        let started = Instant::now();
        thread::scope(|s| {
            s.spawn(|| {
                // each wakeup leaves the count positive
                for _ in 0..5 {
                    thread::sleep(Duration::from_millis(15));
                    latch.zero.notify_all();
                }
            });
            assert!(!latch.wait_timeout(Duration::from_millis(40)));
            assert!(started.elapsed() < Duration::from_millis(100));
        });
        assert_eq!(latch.count(), 2);
    }

    #[test]
    fn timeout_reports_pending_count() {
        let latch = CountDownLatch::new(2);
        latch.count_down();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
        latch.release_all();
        assert!(latch.wait_timeout(Duration::from_millis(5)));
    }
}
