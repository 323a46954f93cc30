// scrim_stats/server/src/persistence/circuit_breaker.rs
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Counts consecutive repository failures and, past the threshold, refuses
/// calls until the cooldown has elapsed. The first call after the cooldown is
/// a trial: success closes the breaker, failure re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
    opens: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner { state: BreakerState::Closed, consecutive_failures: 0 }),
            opens: AtomicU64::new(0),
        }
    }

    /// Whether a repository call may be attempted at `now`. Moves an expired
    /// open breaker to half-open.
    pub fn allow_request(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { until } if now >= until => {
                inner.state = BreakerState::HalfOpen;
                info!("Circuit breaker cooldown elapsed, allowing a trial flush");
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!("Circuit breaker closed after successful flush");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
    }

    /// Returns `true` when this failure opened the breaker.
    pub fn record_failure(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.threshold,
            BreakerState::Open { .. } => false,
        };
        if should_open {
            inner.state = BreakerState::Open { until: now + self.cooldown };
            self.opens.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Circuit breaker opened after {} consecutive failures; pausing flushes for {:?}",
                inner.consecutive_failures, self.cooldown
            );
        }
        should_open
    }

    pub fn is_open(&self, now: Instant) -> bool {
        matches!(self.inner.lock().state, BreakerState::Open { until } if now < until)
    }

    pub fn is_half_open(&self) -> bool {
        self.inner.lock().state == BreakerState::HalfOpen
    }

    pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
        match self.inner.lock().state {
            BreakerState::Open { until } if now < until => Some(until - now),
            _ => None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }
}
