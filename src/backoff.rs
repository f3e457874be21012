use std::cmp::min;
use std::time::Duration;

/// Tracks the timeout for repeated attempts of the same step: it starts at an initial value
///  and doubles with every timeout, optionally up to a ceiling.
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn capped(initial: Duration, max: Duration) -> Self {
        assert!(initial <= max);

        ExponentialBackoff {
            initial,
            current: initial,
            max: Some(max),
        }
    }

    /// Callers must bound the number of doublings themselves, e.g. by a retry limit
    pub fn uncapped(initial: Duration) -> Self {
        ExponentialBackoff {
            initial,
            current: initial,
            max: None,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// returns the timeout for the next attempt
    pub fn on_timeout(&mut self) -> Duration {
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => min(doubled, max),
            None => doubled,
        };
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
