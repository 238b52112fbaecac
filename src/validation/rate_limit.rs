//! Rate limiting
//!
//! Exact sliding window per `actor:operation` key, where the operation is
//! the one actually executed. Each key keeps the times of its last
//! `ceiling` grants in a ring of `AtomicU64` slots; a call is granted only
//! if the oldest of those left the window.
//!
//! Claims advance by compare-and-swap on the slot, so concurrent calls for
//! the same key serialize on the atomic rather than a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::Validator;
use crate::config::RateLimitConfig;
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::CriticalOperation;

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

/// Wall clock anchored at construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// Slot layout: [lap:16][stamp+1:48]; a zero stamp marks a slot never claimed
const STAMP_MASK: u64 = (1 << 48) - 1;

fn pack(lap: u16, stamp_ms: u64) -> u64 {
    (u64::from(lap) << 48) | ((stamp_ms + 1) & STAMP_MASK)
}

fn unpack(slot: u64) -> (u16, Option<u64>) {
    ((slot >> 48) as u16, (slot & STAMP_MASK).checked_sub(1))
}

/// Ring of the last `ceiling` grant times for one key
///
/// Grant `seq` lands in slot `seq % ceiling`, tagged with lap
/// `seq / ceiling + 1`. Before claiming, the slot still holds grant
/// `seq - ceiling`; the claim succeeds only when that grant has left the
/// window, so no window ever holds more than `ceiling` grants.
#[derive(Debug)]
struct KeyState {
    slots: Box<[AtomicU64]>,
    next: AtomicU64,
    last_ms: AtomicU64,
}

impl KeyState {
    fn new(ceiling: u32, now_ms: u64) -> Self {
        Self {
            slots: (0..ceiling).map(|_| AtomicU64::new(0)).collect(),
            next: AtomicU64::new(0),
            last_ms: AtomicU64::new(now_ms),
        }
    }

    fn try_claim(&self, now_ms: u64, window_ms: u64) -> bool {
        let len = self.slots.len() as u64;
        loop {
            let seq = self.next.load(Ordering::Acquire);
            let slot = &self.slots[(seq % len) as usize];
            let lap = (seq / len) as u16;
            let observed = slot.load(Ordering::Acquire);
            let (slot_lap, stamp) = unpack(observed);

            if slot_lap == lap.wrapping_add(1) {
                // Claimed by another caller that has not advanced `next` yet
                let _ = self
                    .next
                    .compare_exchange(seq, seq + 1, Ordering::AcqRel, Ordering::Acquire);
                continue;
            }
            if slot_lap != lap {
                continue;
            }
            if let Some(stamp) = stamp {
                if now_ms.saturating_sub(stamp) < window_ms {
                    return false;
                }
            }

            let claimed = pack(lap.wrapping_add(1), now_ms);
            if slot
                .compare_exchange(observed, claimed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let _ = self
                    .next
                    .compare_exchange(seq, seq + 1, Ordering::AcqRel, Ordering::Acquire);
                self.last_ms.fetch_max(now_ms, Ordering::AcqRel);
                return true;
            }
        }
    }
}

/// Sliding-window limiter keyed by actor and operation
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    keys: RwLock<HashMap<String, Arc<KeyState>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.clone(),
            clock,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Count one call against `key`; `false` when `ceiling` calls already
    /// fell inside the trailing window
    ///
    /// A ceiling of 0 disables the limit.
    pub fn try_acquire(&self, key: &str, ceiling: u32) -> bool {
        if ceiling == 0 {
            return true;
        }

        let now_ms = self.clock.now().as_millis() as u64;
        self.state_for(key, ceiling, now_ms)
            .try_claim(now_ms, self.window_millis())
    }

    /// Check the caller's bucket for `operation`
    pub fn check(&self, context: &SecurityContext, operation: &str) -> Result<(), GuardError> {
        let ceiling = self.config.ceiling_for(operation);
        let key = context.rate_limit_key(operation);
        if self.try_acquire(&key, ceiling) {
            Ok(())
        } else {
            Err(GuardError::RateLimited {
                key,
                limit: ceiling,
                window_secs: self.config.window_secs,
            })
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn window_millis(&self) -> u64 {
        (self.config.window().as_millis() as u64).max(1)
    }

    fn state_for(&self, key: &str, ceiling: u32, now_ms: u64) -> Arc<KeyState> {
        if let Some(state) = self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .filter(|s| s.slots.len() == ceiling as usize)
        {
            return Arc::clone(state);
        }

        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if keys.len() >= self.config.max_tracked_keys {
            // No grant inside the window: nothing left to count
            let window_ms = self.window_millis();
            keys.retain(|_, s| now_ms.saturating_sub(s.last_ms.load(Ordering::Acquire)) < window_ms);
        }
        let state = keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new(ceiling, now_ms)));
        if state.slots.len() != ceiling as usize {
            *state = Arc::new(KeyState::new(ceiling, now_ms));
        }
        Arc::clone(state)
    }
}

/// Rate-limit step of the validation chain
pub struct RateLimitValidator {
    limiter: Arc<RateLimiter>,
}

impl RateLimitValidator {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Validator for RateLimitValidator {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn validate(
        &self,
        context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        self.limiter.check(context, operation.name())
    }
}
