//! Auto-reconnect scheduling with capped exponential backoff.

use std::time::{Duration, Instant};

/// Reconnect state for one peer.
///
/// After failed attempt `k` (0-indexed) the next attempt is scheduled
/// `min(base * 2^k, max)` later. The attempt counter resets on success and
/// whenever the policy is re-armed.
#[derive(Debug, Clone, Default)]
pub struct ReconnectPolicy {
    enabled: bool,
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
    next_attempt_at: Option<Instant>,
}

impl ReconnectPolicy {
    /// Arm reconnection with the given delays
    pub fn arm(&mut self, base_delay: Duration, max_delay: Duration) {
        self.enabled = true;
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self.attempt = 0;
    }

    /// Disarm reconnection and forget any schedule
    pub fn disarm(&mut self) {
        self.enabled = false;
        self.attempt = 0;
        self.next_attempt_at = None;
    }

    /// Whether reconnection is armed
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Failed attempts since the last success or re-arm
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the next attempt is due, if one is scheduled
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Delay that follows failed attempt `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Schedule the first attempt one base delay after a disconnect
    pub fn schedule_initial(&mut self, now: Instant) {
        self.attempt = 0;
        self.next_attempt_at = Some(now + self.base_delay);
    }

    /// Record a failed attempt and schedule the next one; returns the delay
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.next_attempt_at = Some(now + delay);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Record a successful reconnect
    pub fn record_success(&mut self) {
        self.attempt = 0;
        self.next_attempt_at = None;
    }

    /// Whether an attempt should be made at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.enabled && self.next_attempt_at.map_or(false, |at| now >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(base_ms: u64, max_ms: u64) -> ReconnectPolicy {
        let mut policy = ReconnectPolicy::default();
        policy.arm(Duration::from_millis(base_ms), Duration::from_millis(max_ms));
        policy
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let mut policy = armed(500, 10_000);
        let now = Instant::now();
        let delays: Vec<u128> = (0..7).map(|_| policy.record_failure(now).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000]);
        assert_eq!(policy.attempt(), 7);
    }

    #[test]
    fn test_large_attempt_never_exceeds_max() {
        let policy = armed(500, 10_000);
        for attempt in [20, 31, 32, 64, u32::MAX] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(10_000));
        }
    }

    #[test]
    fn test_success_and_rearm_reset_counter() {
        let mut policy = armed(100, 1000);
        let now = Instant::now();
        policy.record_failure(now);
        policy.record_failure(now);
        policy.record_success();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.record_failure(now), Duration::from_millis(100));

        policy.arm(Duration::from_millis(200), Duration::from_millis(1000));
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.record_failure(now), Duration::from_millis(200));
    }

    #[test]
    fn test_schedule_and_due() {
        let mut policy = armed(500, 10_000);
        let now = Instant::now();
        assert!(!policy.is_due(now));

        policy.schedule_initial(now);
        assert!(!policy.is_due(now));
        assert!(policy.is_due(now + Duration::from_millis(500)));

        policy.disarm();
        assert!(!policy.is_due(now + Duration::from_secs(60)));
        assert_eq!(policy.next_attempt_at(), None);
    }
}
