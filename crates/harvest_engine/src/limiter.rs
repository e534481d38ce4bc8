use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Sliding-window admission gate: at most `limit` acquisitions in any
/// rolling `period`, shared by every caller holding the same limiter.
///
/// The window lock is only held while inspecting timestamps, never across
/// the wait.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    period: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, period: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            period,
            window: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit as usize, Duration::from_secs(1))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waits until a slot is free and claims it.
    pub async fn acquire(&self) {
        loop {
            match self.try_claim(Instant::now()) {
                Ok(()) => return,
                Err(wait) => sleep(wait).await,
            }
        }
    }

    /// Claims a slot if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.try_claim(Instant::now()).is_ok()
    }

    /// Returns how long to wait when the window is full.
    fn try_claim(&self, now: Instant) -> Result<(), Duration> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() < self.limit {
            window.push_back(now);
            return Ok(());
        }
        let oldest = window.front().copied().unwrap_or(now);
        Err((oldest + self.period).saturating_duration_since(now).max(Duration::from_millis(1)))
    }
}
