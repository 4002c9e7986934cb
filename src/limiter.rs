use crate::error::ChurnError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Token-bucket admission gate.
///
/// Tokens accrue continuously at `permits_per_second` and are capped at
/// `burst_capacity`, so a stalled caller is handed at most one burst's worth
/// of immediate admissions when it resumes. A caller that finds the bucket
/// empty takes the token on credit and sleeps off the deficit; later callers
/// queue behind that debt.
#[derive(Debug)]
pub struct RateLimiter {
    permits_per_second: f64,
    burst_capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        if now > self.refilled_at {
            let accrued = now.duration_since(self.refilled_at).as_secs_f64() * rate;
            self.tokens = (self.tokens + accrued).min(capacity);
            self.refilled_at = now;
        }
    }
}

impl RateLimiter {
    pub fn new(permits_per_second: f64, burst_capacity: f64) -> Result<Self, ChurnError> {
        Self::starting_at(permits_per_second, burst_capacity, Instant::now())
    }

    fn starting_at(
        permits_per_second: f64,
        burst_capacity: f64,
        now: Instant,
    ) -> Result<Self, ChurnError> {
        if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
            return Err(ChurnError::invalid_config(format!(
                "admission rate must be a positive number, got {permits_per_second}"
            )));
        }
        if !burst_capacity.is_finite() || burst_capacity < 1.0 {
            return Err(ChurnError::invalid_config(format!(
                "burst capacity must be at least one token, got {burst_capacity}"
            )));
        }
        Ok(Self {
            permits_per_second,
            burst_capacity,
            state: Mutex::new(BucketState {
                tokens: 1.0,
                refilled_at: now,
            }),
        })
    }

    /// Blocks until a token is available and returns how long it slept.
    pub fn acquire(&self) -> Duration {
        let wait = self.reserve_at(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }

    /// Takes a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.refill(now, self.permits_per_second, self.burst_capacity);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn reserve_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock();
        state.refill(now, self.permits_per_second, self.burst_capacity);
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // saturates for rates so low the deficit overflows a Duration
            Duration::try_from_secs_f64(-state.tokens / self.permits_per_second)
                .unwrap_or(Duration::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use crate::error::ChurnErrorCode;
    use std::time::{Duration, Instant};

    fn approx(actual: Duration, expected_ms: u64) -> bool {
        let expected = Duration::from_millis(expected_ms);
        actual.abs_diff(expected) < Duration::from_micros(50)
    }

    #[test]
    fn first_token_is_free_then_paced() {
        let t0 = Instant::now();
        let limiter = RateLimiter::starting_at(5.0, 1.0, t0).expect("limiter");
        assert_eq!(limiter.reserve_at(t0), Duration::ZERO);
        assert!(approx(limiter.reserve_at(t0), 200));
        assert!(approx(limiter.reserve_at(t0), 400));
    }

    #[test]
    fn stall_does_not_release_more_than_burst() {
        let t0 = Instant::now();
        let limiter = RateLimiter::starting_at(5.0, 2.0, t0).expect("limiter");
        assert_eq!(limiter.reserve_at(t0), Duration::ZERO);

        let resumed = t0 + Duration::from_secs(60);
        assert_eq!(limiter.reserve_at(resumed), Duration::ZERO);
        assert_eq!(limiter.reserve_at(resumed), Duration::ZERO);
        assert!(approx(limiter.reserve_at(resumed), 200));
    }

    #[test]
    fn vanishing_rate_saturates_the_wait() {
        let t0 = Instant::now();
        let limiter = RateLimiter::starting_at(1e-300, 1.0, t0).expect("limiter");
        assert_eq!(limiter.reserve_at(t0), Duration::ZERO);
        assert_eq!(limiter.reserve_at(t0), Duration::MAX);
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn acquire_blocks_for_the_deficit() {
        let limiter = RateLimiter::new(50.0, 1.0).expect("limiter");
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire();
        }
        // first token is free, the remaining four cost 20ms each
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[test]
    fn try_acquire_never_goes_into_debt() {
        let limiter = RateLimiter::new(0.5, 1.0).expect("limiter");
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn rejects_degenerate_rates() {
        for (rate, burst) in [(0.0, 1.0), (-1.0, 1.0), (f64::NAN, 1.0), (5.0, 0.5)] {
            let err = RateLimiter::new(rate, burst).expect_err("degenerate limiter");
            assert_eq!(err.code(), ChurnErrorCode::InvalidConfig);
        }
    }
}
