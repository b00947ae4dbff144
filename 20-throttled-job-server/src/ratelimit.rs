//! Global token-bucket admission control.
//!
//! Every inbound request consults the same bucket before doing anything else.
//! Tokens refill continuously in proportion to elapsed time and never exceed
//! the bucket's capacity, so an arbitrarily long idle period simply leaves the
//! bucket full.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of the current time for [`TokenBucket`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and pass another
/// to the bucket.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with real-valued, continuously refilling tokens.
///
/// The whole refill-then-take sequence runs under one mutex, so two callers
/// can never consume the same token.
#[derive(Debug)]
pub struct TokenBucket<C: Clock = SystemClock> {
    capacity: f64,
    fill_per_second: f64,
    clock: C,
    state: Mutex<BucketState>,
}

impl TokenBucket<SystemClock> {
    /// Creates a full bucket holding `capacity` tokens that regains
    /// `fill_per_second` tokens every second.
    pub fn new(capacity: u32, fill_per_second: f64) -> Self {
        Self::with_clock(capacity, fill_per_second, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    pub fn with_clock(capacity: u32, fill_per_second: f64, clock: C) -> Self {
        let fill_per_second = if fill_per_second.is_finite() && fill_per_second > 0.0 {
            fill_per_second
        } else {
            0.0
        };
        let capacity = f64::from(capacity);
        let last_refill = clock.now();
        Self {
            capacity,
            fill_per_second,
            clock,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill,
            }),
        }
    }

    /// Takes one token if available. Returns `false` and leaves the bucket
    /// untouched (apart from refill) when fewer than one token is left.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Tokens currently available after applying any pending refill.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.fill_per_second).min(self.capacity);
        state.last_refill = now;
    }
}
