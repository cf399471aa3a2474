use std::time::Duration;

/// Backoff parameters for one class of operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per additional failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

impl RetryPolicy {
    /// 3 attempts, 1 s growing ×2 up to 30 s.
    pub fn default_policy() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// 5 attempts, 500 ms growing ×2 up to 60 s. Used for remote storage
    /// and whole-object assembly.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// 3 attempts, 2 s growing ×1.5 up to 15 s. Used for outbound notifications.
    pub fn webhook() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 1.5,
        }
    }

    /// Looks up a named profile (`default`, `aggressive`, `webhook`).
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_policy()),
            "aggressive" => Some(Self::aggressive()),
            "webhook" => Some(Self::webhook()),
            _ => None,
        }
    }

    /// Wait after `failures` consecutive failures.
    ///
    /// One failure waits `initial_delay`; each further failure multiplies the
    /// wait by `backoff_multiplier`, capped at `max_delay`.
    pub fn calculate_delay(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let exp = (failures - 1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Wait before 1-based `attempt`. The first attempt never waits.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.calculate_delay(attempt - 1)
    }

    /// Attempt budget, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
