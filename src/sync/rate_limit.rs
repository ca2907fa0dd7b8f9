//! Input rate ceiling.
//!
//! Inputs arriving faster than the configured rate are dropped, not queued:
//! an accepted input must be at least `1000 / rate` ms after the previous
//! accepted one.

/// Why an input was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitViolation {
    #[error("Input rate exceeded: next input allowed in {0}ms")]
    InputRateExceeded(u64),
}

#[derive(Debug)]
pub struct InputRateLimiter {
    min_interval_ms: u64,
    last_accepted: Option<u64>,
    accepted: u64,
    dropped: u64,
}

impl InputRateLimiter {
    /// `max_per_second` of 0 is treated as 1
    pub fn new(max_per_second: u32) -> Self {
        Self {
            min_interval_ms: 1000 / u64::from(max_per_second.max(1)),
            last_accepted: None,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Admit or refuse an input submitted at `now_ms`
    pub fn check(&mut self, now_ms: u64) -> Result<(), RateLimitViolation> {
        if let Some(last) = self.last_accepted {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.min_interval_ms {
                self.dropped += 1;
                return Err(RateLimitViolation::InputRateExceeded(
                    self.min_interval_ms - elapsed,
                ));
            }
        }
        self.last_accepted = Some(now_ms);
        self.accepted += 1;
        Ok(())
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.accepted = 0;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_input_always_allowed() {
        let mut limiter = InputRateLimiter::new(20);
        assert!(limiter.check(0).is_ok());
    }

    #[test]
    fn test_inputs_at_rate_are_allowed() {
        let mut limiter = InputRateLimiter::new(20);
        for i in 0..20 {
            assert!(limiter.check(i * 50).is_ok());
        }
        assert_eq!(limiter.accepted(), 20);
    }

    #[test]
    fn test_burst_is_dropped() {
        let mut limiter = InputRateLimiter::new(20);
        assert!(limiter.check(100).is_ok());
        assert_eq!(
            limiter.check(120),
            Err(RateLimitViolation::InputRateExceeded(30))
        );
        assert!(limiter.check(150).is_ok());
        assert_eq!(limiter.dropped(), 1);
    }

    #[test]
    fn test_n_inputs_in_short_window_are_capped() {
        // 10 inputs in 100ms at 20/s: a window shorter than 10 / 20 s
        let mut limiter = InputRateLimiter::new(20);
        let accepted = (0..10).filter(|i| limiter.check(i * 10).is_ok()).count();
        assert!(accepted < 10);
        assert_eq!(accepted, 2);
    }

    #[test]
    fn test_zero_rate_treated_as_one() {
        let limiter = InputRateLimiter::new(0);
        assert_eq!(limiter.min_interval_ms(), 1000);
    }

    #[test]
    fn test_reset() {
        let mut limiter = InputRateLimiter::new(10);
        limiter.check(0).unwrap();
        assert!(limiter.check(10).is_err());
        limiter.reset();
        assert!(limiter.check(10).is_ok());
    }
}
