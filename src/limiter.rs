use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimit;

/// Sliding-window limiter: at most `amount` acquisitions start within any `period`.
///
/// Each acquisition reserves its slot while holding the lock and sleeps only
/// after releasing it, so concurrent callers never observe the same free slot.
pub struct Limiter {
    name: String,
    amount: usize,
    period: Duration,
    dynamic: bool,
    events: Mutex<VecDeque<Instant>>,
}

impl Limiter {
    pub fn new(name: impl Into<String>, amount: usize, period: Duration) -> Self {
        let name = name.into();
        let amount = amount.max(1);
        debug!(
            "limiter {} created ({} events per {:?})",
            name, amount, period
        );
        Limiter {
            name,
            amount,
            period,
            dynamic: false,
            events: Mutex::new(VecDeque::with_capacity(amount)),
        }
    }

    /// Falls back to one second for a period `Config::validate` would reject.
    pub fn from_config(name: impl Into<String>, limit: RateLimit) -> Self {
        let name = name.into();
        let period = Duration::try_from_secs_f64(limit.period_secs)
            .ok()
            .filter(|period| !period.is_zero())
            .unwrap_or_else(|| {
                warn!(
                    "limiter {}: bad period {}s, using 1s",
                    name, limit.period_secs
                );
                Duration::from_secs(1)
            });
        Limiter::new(name, limit.amount, period)
    }

    /// Marks the limiter as disposable once idle for a full period.
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how long the caller has to wait and books the slot.
    async fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut events = self.events.lock().await;
        let delay = if events.len() < self.amount {
            Duration::ZERO
        } else {
            let oldest = events.pop_front().unwrap_or(now);
            (oldest + self.period).saturating_duration_since(now)
        };
        events.push_back(now + delay);
        delay
    }

    pub async fn acquire(&self) {
        let delay = self.reserve().await;
        debug!("limiter {}: delay {:.3}s", self.name, delay.as_secs_f64());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// True for a dynamic limiter whose last booked slot is a full period old.
    pub async fn is_old(&self) -> bool {
        if !self.dynamic {
            return false;
        }
        let events = self.events.lock().await;
        match events.back() {
            Some(last) => Instant::now().saturating_duration_since(*last) >= self.period,
            None => true,
        }
    }
}
