// Wall-clock timestamps and the lease timing policy
//
// A granted lease is valid for two thirds of the configured duration. The
// holder renews every third, so one renewal can be missed (or be slow) before
// the lease actually lapses.

use chrono::Utc;
use rand::Rng;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default lease duration (30 seconds)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Seconds since the Unix epoch, with a fractional part.
///
/// This is also the value stored against a lock key, so its textual form
/// must survive a round trip through the store unchanged.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Used when the store has no value for a key
    pub const EPOCH: Timestamp = Timestamp(0.0);

    pub fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    /// Time left from `now` until `self`, zero if `self` has passed.
    pub fn saturating_since(&self, now: Timestamp) -> Duration {
        Duration::try_from_secs_f64(self.0 - now.0)
            .unwrap_or(if self.0 > now.0 { Duration::MAX } else { Duration::ZERO })
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_secs_f64())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shortest representation that parses back to the same f64
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() => Ok(Self(secs)),
            _ => Err(crate::Error::InvalidExpiry(s.to_string())),
        }
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        #[allow(clippy::cast_precision_loss)]
        let micros = Utc::now().timestamp_micros() as f64;
        Timestamp(micros / 1_000_000.0)
    }
}

/// Derives every deadline and sleep of the protocol from one lease duration.
#[derive(Debug, Clone)]
pub struct LeaseTimer {
    lease_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl LeaseTimer {
    pub fn new(lease_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            lease_duration,
            clock,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// How long a single grant stays valid: two thirds of the lease duration.
    pub fn grant_span(&self) -> Duration {
        self.lease_duration * 2 / 3
    }

    /// Expiry to propose on an acquire or extend issued right now.
    pub fn next_renewal_deadline(&self) -> Timestamp {
        self.deadline_from(self.now())
    }

    pub fn deadline_from(&self, now: Timestamp) -> Timestamp {
        now + self.grant_span()
    }

    /// Fixed gap between renewals while holding the lease.
    ///
    /// Not jittered: only the holder sleeps on this path.
    pub fn renewal_interval(&self) -> Duration {
        self.lease_duration / 3
    }

    /// Upper bound on a single store call.
    ///
    /// Half a renewal interval, so a renewal that hangs is abandoned while
    /// the grant it was meant to extend is still valid.
    pub fn store_timeout(&self) -> Duration {
        self.renewal_interval() / 2
    }

    /// How long a process that lost the race waits before trying again.
    ///
    /// Sleeps until the competitor's lease should lapse, plus up to a third
    /// of the lease duration so losers don't all retry at once.
    pub fn backoff_before_retry(&self, competitor_expiry: Timestamp) -> Duration {
        self.backoff_with_jitter(competitor_expiry, self.jitter())
    }

    pub(crate) fn backoff_with_jitter(&self, competitor_expiry: Timestamp, jitter: Duration) -> Duration {
        (competitor_expiry + jitter).saturating_since(self.now())
    }

    fn jitter(&self) -> Duration {
        let bound = self.renewal_interval();
        if bound.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..bound.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualClock;
    use proptest::prelude::*;

    // 2018-05-11 13:30:11.05 UTC
    const NOW: f64 = 1_526_045_411.05;

    fn timer(secs: u64) -> LeaseTimer {
        LeaseTimer::new(Duration::from_secs(secs), Arc::new(ManualClock::new(NOW)))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[test]
    fn test_now_reads_the_clock() {
        assert_close(timer(60).now().as_secs_f64(), NOW);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now().as_secs_f64() > 1_577_836_800.0);
    }

    #[test]
    fn test_next_renewal_is_two_thirds_of_the_duration_away() {
        let timer = timer(60);
        assert_eq!(timer.grant_span(), Duration::from_secs(40));
        assert_close(timer.next_renewal_deadline().as_secs_f64(), NOW + 40.0);
    }

    #[test]
    fn test_renewal_interval_is_a_third_of_the_duration() {
        assert_eq!(timer(60).renewal_interval(), Duration::from_secs(20));
        assert_eq!(timer(30).renewal_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_store_calls_give_up_well_before_the_grant_lapses() {
        let timer = timer(60);
        assert_eq!(timer.store_timeout(), Duration::from_secs(10));
        assert!(timer.renewal_interval() + timer.store_timeout() < timer.grant_span());
    }

    #[test]
    fn test_backoff_waits_for_competitor_expiry_plus_jitter() {
        let timer = timer(60);
        let competitor = Timestamp::from_secs_f64(NOW + 40.0);

        for _ in 0..100 {
            let wait = timer.backoff_before_retry(competitor);
            assert!(wait >= Duration::from_secs(40) - Duration::from_millis(1), "{wait:?}");
            assert!(wait < Duration::from_secs(60), "{wait:?}");
        }
    }

    #[test]
    fn test_backoff_is_zero_when_competitor_expired_long_ago() {
        let timer = timer(60);
        let competitor = Timestamp::from_secs_f64(NOW - 71.05);

        assert_eq!(timer.backoff_before_retry(competitor), Duration::ZERO);
    }

    #[test]
    fn test_backoff_with_explicit_jitter() {
        let timer = timer(60);
        let competitor = Timestamp::from_secs_f64(NOW + 10.0);

        let wait = timer.backoff_with_jitter(competitor, Duration::from_secs(5));
        assert_close(wait.as_secs_f64(), 15.0);
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let ts = Timestamp::from_secs_f64(NOW + 40.0);
        let parsed: Timestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed, ts);
        assert_eq!(parsed.to_string(), ts.to_string());

        assert_eq!("110.0".parse::<Timestamp>().unwrap(), Timestamp::from_secs_f64(110.0));
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(matches!("soon".parse::<Timestamp>(), Err(crate::Error::InvalidExpiry(_))));
        assert!("NaN".parse::<Timestamp>().is_err());
        assert!("inf".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_saturating_since_clamps() {
        let early = Timestamp::from_secs_f64(10.0);
        let late = Timestamp::from_secs_f64(12.5);

        assert_eq!(late.saturating_since(early), Duration::from_millis(2500));
        assert_eq!(early.saturating_since(late), Duration::ZERO);
        assert_eq!(Timestamp::from_secs_f64(1e300).saturating_since(early), Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_backoff_is_bounded(offset in -1e6f64..1e6, secs in 1u64..3600) {
            let timer = timer(secs);
            let competitor = Timestamp::from_secs_f64(NOW + offset);
            let wait = timer.backoff_before_retry(competitor).as_secs_f64();

            let upper = offset.max(0.0) + timer.renewal_interval().as_secs_f64();
            prop_assert!(wait >= 0.0);
            prop_assert!(wait <= upper + 1e-3);
            if offset < -timer.renewal_interval().as_secs_f64() {
                prop_assert_eq!(wait, 0.0);
            }
        }
    }
}
