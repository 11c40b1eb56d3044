//! Bounded exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Base delay before retry `attempt` (1-based): initial doubling to max
    pub fn base(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Base delay plus up to 25% random jitter, never above max
    ///
    /// A server-supplied hint raises the delay but is still capped.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base = self.base(attempt).max(hint.unwrap_or_default());
        let spread = base.as_millis() as u64 / 4;
        let jitter = if spread > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
        } else {
            Duration::ZERO
        };
        (base + jitter).min(self.max)
    }
}
