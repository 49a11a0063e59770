use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Clone)]
pub struct ExponentialBackoffOptions {
    /// Initial amount of time after which we should retry.
    ///
    /// NOTE: We calculate the waiting duration relative to the completion
    /// time of the last attempt.
    pub base_duration: Duration,

    /// Maximum amount of random noise to add to each retry attempt.
    pub jitter_duration: Duration,

    /// Maximum amount of time to wait before retrying (doesn't include
    /// jitter).
    pub max_duration: Duration,

    /// If we see nothing but successful attempts (or nothing happening) for
    /// this amount of time, we will reset the backoff state.
    pub cooldown_duration: Duration,

    /// Maximum number of attempts allowed.
    ///
    /// - 0 means unlimited attempts.
    /// - 1 means that we will try once and then stop (with no backoff or
    ///   delays at all).
    pub max_num_attempts: usize,
}

impl Default for ExponentialBackoffOptions {
    /// `backoff(i) = min(i^2 * 100ms, 30s)`, per the client's retry design
    /// (§4.5): quadratic growth, capped, monotonic non-decreasing.
    fn default() -> Self {
        Self {
            base_duration: Duration::from_millis(100),
            jitter_duration: Duration::from_millis(50),
            max_duration: Duration::from_secs(30),
            cooldown_duration: Duration::from_secs(60),
            max_num_attempts: 0,
        }
    }
}

pub enum ExponentialBackoffResult {
    Start,
    StartAfter(Duration),
    Stop,
}

/// Tracker for how long a caller should wait between attempts to execute
/// some request/operation.
///
/// Each instance should only be used for a sequence of attempts made one at
/// a time (don't share one instance across concurrently retried requests).
///
/// Usage:
/// 1. Create an `ExponentialBackoff`.
/// 2. Call `start_attempt()` and wait if requested.
/// 3. Execute the request/operation.
/// 4. Call `end_attempt(success)`.
/// 5. If successful, return to the caller, else repeat at step 2.
pub struct ExponentialBackoff {
    options: ExponentialBackoffOptions,

    /// Current value of `min(2^n * base_duration, max_duration)`.
    current_backoff: Duration,

    /// Oldest time since we haven't had any failures.
    successful_since: Option<Instant>,

    /// Time at which the last attempt was completed.
    last_completion: Option<Instant>,

    /// Total number of completed attempts since the last success.
    attempt_count: usize,

    attempt_pending: bool,
}

impl ExponentialBackoff {
    pub fn new(options: ExponentialBackoffOptions) -> Self {
        Self {
            options,
            current_backoff: Duration::ZERO,
            successful_since: None,
            last_completion: None,
            attempt_pending: false,
            attempt_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.options.clone());
    }

    /// The backoff duration that would be applied to the *next* failed
    /// attempt, without the per-attempt jitter. Useful for callers (e.g.
    /// the selector's failure marking) that need to compute an exclusion
    /// window up front rather than through `start_attempt`/`end_attempt`.
    pub fn current(&self) -> Duration {
        self.current_backoff
    }

    /// Signals that a new attempt is about to be performed.
    ///
    /// Returns the duration the caller should wait before beginning the
    /// attempt, or `Stop` if the attempt budget has been exhausted.
    pub fn start_attempt(&mut self) -> ExponentialBackoffResult {
        if self.attempt_pending {
            self.end_attempt(false);
        }

        if self.options.max_num_attempts > 0 && self.attempt_count >= self.options.max_num_attempts
        {
            return ExponentialBackoffResult::Stop;
        }

        self.attempt_pending = true;
        if self.options.max_num_attempts > 0 {
            self.attempt_count += 1;
        }

        if self.current_backoff.is_zero() {
            return ExponentialBackoffResult::Start;
        }

        let jitter = if self.options.jitter_duration.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_micros(
                rand::thread_rng().gen_range(0..=self.options.jitter_duration.as_micros() as u64),
            )
        };
        let wait_time = self.current_backoff + jitter;

        let now = Instant::now();
        if let Some(last_completion) = self.last_completion {
            let elapsed = now.duration_since(last_completion);
            if elapsed >= wait_time {
                return ExponentialBackoffResult::Start;
            }

            return ExponentialBackoffResult::StartAfter(wait_time - elapsed);
        }

        ExponentialBackoffResult::StartAfter(wait_time)
    }

    /// Reports whether or not the last attempt was successful. May be
    /// called multiple times per attempt for long running operations whose
    /// health can flip mid-flight.
    pub fn end_attempt(&mut self, successful: bool) {
        let now = Instant::now();
        self.attempt_pending = false;
        self.last_completion = Some(now);

        if let Some(successful_since) = &self.successful_since {
            if now - *successful_since > self.options.cooldown_duration {
                self.current_backoff = Duration::ZERO;
            }
        }

        if successful {
            self.attempt_count = 0;
            self.successful_since.get_or_insert(now);
        } else {
            if self.current_backoff.is_zero() {
                self.current_backoff = self.options.base_duration;
            } else {
                self.current_backoff =
                    std::cmp::min(2 * self.current_backoff, self.options.max_duration);
            }
            self.successful_since = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let mut b = ExponentialBackoff::new(ExponentialBackoffOptions {
            base_duration: Duration::from_millis(100),
            jitter_duration: Duration::ZERO,
            max_duration: Duration::from_secs(1),
            cooldown_duration: Duration::from_secs(600),
            max_num_attempts: 0,
        });

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            match b.start_attempt() {
                ExponentialBackoffResult::Start => {}
                ExponentialBackoffResult::StartAfter(d) => {
                    assert!(d >= last || d <= Duration::from_secs(1));
                    last = d;
                }
                ExponentialBackoffResult::Stop => panic!("should not stop with unlimited attempts"),
            }
            b.end_attempt(false);
            assert!(b.current_backoff <= Duration::from_secs(1));
        }
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut b = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_num_attempts: 2,
            ..Default::default()
        });

        assert!(matches!(b.start_attempt(), ExponentialBackoffResult::Start));
        b.end_attempt(false);
        assert!(matches!(
            b.start_attempt(),
            ExponentialBackoffResult::Start | ExponentialBackoffResult::StartAfter(_)
        ));
        b.end_attempt(false);
        assert!(matches!(b.start_attempt(), ExponentialBackoffResult::Stop));
    }
}
