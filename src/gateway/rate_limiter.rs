use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

// -----------------------------------------------------------------------------
// ----- RateLimiter -----------------------------------------------------------

/// Token bucket admitting at most `capacity` operations per rolling
/// `interval`.
///
/// The bucket starts full and every consumed token comes back exactly
/// `interval` after it was taken, so no window of length `interval` ever
/// sees more than `capacity` admissions. Waiters are served in arrival
/// order: the lock is FIFO and is held while the head waiter sleeps.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    interval: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Static ---------------------------------------------------

impl RateLimiter {
    /// `capacity` is raised to 1 if zero.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            interval,
            admitted: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Public ---------------------------------------------------

impl RateLimiter {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until a token is free, then consume it.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            self.expire(&mut admitted, now);

            if admitted.len() < self.capacity {
                admitted.push_back(now);
                return;
            }

            let Some(&oldest) = admitted.front() else {
                continue;
            };
            let ready_at = oldest + self.interval;
            trace!("rate limited for {:?}", ready_at - now);
            sleep_until(ready_at).await;
        }
    }

    /// Tokens that could be taken right now without waiting.
    pub async fn available(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        self.expire(&mut admitted, Instant::now());
        self.capacity - admitted.len()
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Private --------------------------------------------------

impl RateLimiter {
    fn expire(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) < self.interval {
                break;
            }
            admitted.pop_front();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
