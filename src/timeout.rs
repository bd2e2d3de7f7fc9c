//! Timeout values for connect, read and write waits.
//!
//! A timeout is stored as whole seconds plus microseconds, the resolution
//! the socket waits are configured in. A zero timeout means "wait without a
//! time bound".

use std::fmt;
use std::future::Future;
use std::time::Duration;

const MICROS_PER_SEC: u64 = 1_000_000;

/// A wait bound with a whole-second and a sub-second component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Timeout {
    secs: u64,
    micros: u32,
}

impl Timeout {
    /// The unbounded timeout.
    pub const NONE: Timeout = Timeout { secs: 0, micros: 0 };

    /// Creates a timeout from a number of microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self {
            secs: micros / MICROS_PER_SEC,
            micros: (micros % MICROS_PER_SEC) as u32,
        }
    }

    /// Creates a timeout from a duration, truncated to microseconds.
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            secs: duration.as_secs(),
            micros: duration.subsec_micros(),
        }
    }

    /// Creates a timeout from fractional seconds. Negative or non-finite
    /// values produce the unbounded timeout.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::NONE;
        }
        Self::from_micros((secs * MICROS_PER_SEC as f64) as u64)
    }

    /// Whole seconds.
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Sub-second part, in microseconds.
    pub fn subsec_micros(&self) -> u32 {
        self.micros
    }

    /// True when waits should not be bounded.
    pub fn is_unbounded(&self) -> bool {
        self.secs == 0 && self.micros == 0
    }

    /// The wait bound as a duration, `None` when unbounded.
    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_unbounded() {
            None
        } else {
            Some(Duration::new(self.secs, self.micros * 1_000))
        }
    }

    /// Milliseconds, the unit poll-style waits take. Zero when unbounded.
    pub fn as_millis(&self) -> u64 {
        self.secs
            .saturating_mul(1_000)
            .saturating_add(u64::from(self.micros / 1_000))
    }

    /// Runs `future` under this bound. Returns `None` when the bound elapsed
    /// first; an unbounded timeout always waits for the future.
    pub(crate) async fn run<F: Future>(self, future: F) -> Option<F::Output> {
        match self.as_duration() {
            None => Some(future.await),
            Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::from_duration(duration)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map(Timeout::from_duration).unwrap_or(Timeout::NONE)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}.{:06}s", self.secs, self.micros)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_unbounded() {
        assert!(Timeout::NONE.is_unbounded());
        assert!(Timeout::from_micros(0).as_duration().is_none());
        assert_eq!(Timeout::from(None), Timeout::NONE);
    }

    #[test]
    fn test_splits_micros() {
        let timeout = Timeout::from_micros(2_500_000);
        assert_eq!(timeout.secs(), 2);
        assert_eq!(timeout.subsec_micros(), 500_000);
        assert_eq!(timeout.as_millis(), 2_500);
        assert_eq!(timeout.as_duration(), Some(Duration::from_millis(2_500)));
    }

    #[test]
    fn test_from_duration_truncates_to_micros() {
        let timeout = Timeout::from(Duration::new(1, 1_999));
        assert_eq!(timeout.secs(), 1);
        assert_eq!(timeout.subsec_micros(), 1);
    }

    #[test]
    fn test_from_fractional_seconds() {
        assert_eq!(Timeout::from_secs_f64(0.25).as_millis(), 250);
        assert!(Timeout::from_secs_f64(-1.0).is_unbounded());
        assert!(Timeout::from_secs_f64(f64::NAN).is_unbounded());
    }

    #[test]
    fn test_display() {
        assert_eq!(Timeout::NONE.to_string(), "unbounded");
        assert_eq!(Timeout::from_micros(1_000_250).to_string(), "1.000250s");
    }

    #[tokio::test]
    async fn test_run_reports_elapsed() {
        let slow = Timeout::from_micros(10_000)
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(slow.is_none());

        let fast = Timeout::NONE.run(async { 7 }).await;
        assert_eq!(fast, Some(7));
    }
}
