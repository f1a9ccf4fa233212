use std::time::Duration;

use bon::Builder;
use rand::Rng;
use tokio::time::Instant;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 8;
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;
const JITTER_FRACTION: f64 = 0.25;
const MIN_JITTERED_DELAY: Duration = Duration::from_secs(1);

/// Limits and pacing for automatic reconnection.
#[derive(Debug, Clone, Builder)]
pub struct ReconnectPolicy {
    #[builder(default = DEFAULT_BASE_DELAY)]
    base_delay: Duration,
    #[builder(default = DEFAULT_MAX_DELAY)]
    max_delay: Duration,
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,
    #[builder(default = DEFAULT_MAX_CONSECUTIVE_ERRORS)]
    max_consecutive_errors: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    #[must_use]
    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    /// Un-jittered delay before attempt `attempt` (0-indexed): `base * 2^attempt`
    /// clamped to `[base, max]`.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let max = self.max_delay.max(self.base_delay);
        self.base_delay.saturating_mul(factor).clamp(self.base_delay, max)
    }

    /// Nominal delay with ±25 % uniform jitter, clamped to `[min(1s, max), max]`.
    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let factor = rng.gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
        let floor = MIN_JITTERED_DELAY.min(self.max_delay);
        Duration::try_from_secs_f64(nominal * factor)
            .unwrap_or(self.max_delay)
            .clamp(floor, self.max_delay.max(floor))
    }

    pub(crate) fn is_exhausted(&self, state: &ReconnectState) -> bool {
        state.attempt_count >= self.max_reconnect_attempts
            || state.consecutive_error_count >= self.max_consecutive_errors
    }
}

/// Reconnect bookkeeping owned by the supervisor.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReconnectState {
    attempt_count: u32,
    consecutive_error_count: u32,
    last_success_at: Option<Instant>,
    last_error_at: Option<Instant>,
    is_reconnecting: bool,
}

impl ReconnectState {
    /// Attempts made since the last successful connection.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    #[must_use]
    pub fn consecutive_error_count(&self) -> u32 {
        self.consecutive_error_count
    }

    #[must_use]
    pub fn last_success_at(&self) -> Option<Instant> {
        self.last_success_at
    }

    #[must_use]
    pub fn last_error_at(&self) -> Option<Instant> {
        self.last_error_at
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    pub(crate) fn begin_recovery(&mut self) {
        self.is_reconnecting = true;
    }

    pub(crate) fn end_recovery(&mut self) {
        self.is_reconnecting = false;
    }

    /// Records the start of an attempt and returns its 1-based number.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub(crate) fn record_success(&mut self) {
        *self = Self {
            last_success_at: Some(Instant::now()),
            last_error_at: self.last_error_at,
            ..Self::default()
        };
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_error_count += 1;
        self.last_error_at = Some(Instant::now());
    }

    /// Clears counters and the reconnecting flag.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            last_success_at: self.last_success_at,
            last_error_at: self.last_error_at,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, Duration::from_secs(2))]
    #[case(1, Duration::from_secs(4))]
    #[case(3, Duration::from_secs(16))]
    #[case(7, Duration::from_secs(256))]
    #[case(8, Duration::from_secs(300))]
    #[case(40, Duration::from_secs(300))]
    fn nominal_delay_doubles_up_to_max(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(expected, ReconnectPolicy::default().nominal_delay(attempt));
    }

    #[rstest]
    fn jittered_delay_stays_within_bounds(#[values(0, 1, 2, 5, 8, 20, 64)] attempt: u32) {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(u64::from(attempt));
        let nominal = policy.nominal_delay(attempt).as_secs_f64();

        for _ in 0..200 {
            let delay = policy.jittered_delay(attempt, &mut rng);
            assert!(delay >= Duration::from_secs(1), "{delay:?} below floor");
            assert!(delay <= policy.max_delay(), "{delay:?} above max");
            assert!(delay.as_secs_f64() >= nominal * 0.75 - 1e-9);
            assert!(delay.as_secs_f64() <= (nominal * 1.25).min(300.0) + 1e-9);
        }
    }

    #[test]
    fn tiny_max_delay_caps_the_floor() {
        let policy = ReconnectPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(400))
            .build();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..10 {
            assert_eq!(Duration::from_millis(400), policy.jittered_delay(attempt, &mut rng));
        }
    }

    #[test]
    fn exhaustion_follows_either_limit() {
        let policy = ReconnectPolicy::builder()
            .max_reconnect_attempts(3)
            .max_consecutive_errors(2)
            .build();
        let mut state = ReconnectState::default();

        state.begin_attempt();
        state.record_failure();
        assert!(!policy.is_exhausted(&state));

        state.begin_attempt();
        state.record_failure();
        assert!(policy.is_exhausted(&state));
    }

    #[test]
    fn success_resets_counters() {
        let mut state = ReconnectState::default();
        state.begin_recovery();
        state.begin_attempt();
        state.record_failure();

        state.record_success();

        assert_eq!(0, state.attempt_count());
        assert_eq!(0, state.consecutive_error_count());
        assert!(!state.is_reconnecting());
        assert!(state.last_success_at().is_some());
        assert!(state.last_error_at().is_some());
    }
}
