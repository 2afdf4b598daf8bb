//! Extended-precision simulation time.

use std::{fmt, ops};

use serde::{Deserialize, Serialize};
use time::Duration;

const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_DAY: i128 = 86_400 * NANOS_PER_SECOND;

/// Seconds since the simulation epoch.
///
/// Stored as exact fixed point (whole seconds plus nanoseconds), wide
/// enough for cosmological spans: addition, subtraction and remainder
/// never lose sub-second accuracy, even when the stored value is on
/// the order of `1e12` seconds. Conversion to [`f64`] is lossy.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct UniversalTime(Duration);

impl UniversalTime {
    pub const EPOCH: UniversalTime = UniversalTime(Duration::ZERO);

    /// Construct from seconds, rounded to the nanosecond.
    pub fn new_seconds(sec: f64) -> Self {
        Self(Duration::seconds_f64(sec))
    }

    pub fn new_whole_seconds(sec: i64) -> Self {
        Self(Duration::seconds(sec))
    }

    /// The start of the given day (86 400-second days from the epoch).
    pub fn from_day_index(day: i64) -> Self {
        Self(Duration::seconds(day * 86_400))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn into_duration(self) -> Duration {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0.is_negative()
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self(-self.0)
    }

    /// Lossy conversion to seconds: values beyond `2^53` seconds lose
    /// their sub-second part.
    pub fn as_seconds_f64(self) -> f64 {
        self.0.as_seconds_f64()
    }

    /// The day index containing this instant, flooring toward
    /// negative infinity for pre-epoch times.
    pub fn day_index(self) -> i64 {
        self.0.whole_nanoseconds().div_euclid(NANOS_PER_DAY) as i64
    }

    /// Remainder of this time modulo `period` seconds, in `[0, period)`.
    ///
    /// The reduction happens in nanosecond fixed point, so the result
    /// keeps sub-second accuracy no matter how many periods the stored
    /// value spans. The period itself carries only `f64` precision.
    pub fn rem_euclid_seconds(self, period: f64) -> f64 {
        if !period.is_finite() || period <= 0.0 {
            return self.as_seconds_f64();
        }
        let period_nanos = (period * NANOS_PER_SECOND as f64) as i128;
        if period_nanos <= 0 {
            return self.as_seconds_f64();
        }
        let rem = self.0.whole_nanoseconds().rem_euclid(period_nanos);
        rem as f64 / NANOS_PER_SECOND as f64
    }

    fn from_nanos(nanos: i128) -> Self {
        let secs = nanos
            .div_euclid(NANOS_PER_SECOND)
            .clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        let subsec = nanos.rem_euclid(NANOS_PER_SECOND) as i32;
        Self(Duration::new(secs, subsec))
    }
}

impl From<f64> for UniversalTime {
    fn from(sec: f64) -> Self {
        Self::new_seconds(sec)
    }
}

impl ops::Add<UniversalTime> for UniversalTime {
    type Output = UniversalTime;

    fn add(self, rhs: UniversalTime) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl ops::Sub<UniversalTime> for UniversalTime {
    type Output = UniversalTime;

    fn sub(self, rhs: UniversalTime) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl ops::Add<Duration> for UniversalTime {
    type Output = UniversalTime;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl ops::Sub<Duration> for UniversalTime {
    type Output = UniversalTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl ops::Add<f64> for UniversalTime {
    type Output = UniversalTime;

    fn add(self, rhs: f64) -> Self::Output {
        Self(self.0 + Duration::seconds_f64(rhs))
    }
}

impl ops::Sub<f64> for UniversalTime {
    type Output = UniversalTime;

    fn sub(self, rhs: f64) -> Self::Output {
        Self(self.0 - Duration::seconds_f64(rhs))
    }
}

impl ops::Mul<f64> for UniversalTime {
    type Output = UniversalTime;

    /// Scaling carries the factor's `f64` precision: the whole part of
    /// the factor multiplies exactly, the fractional part rounds at the
    /// magnitude of the stored value.
    fn mul(self, rhs: f64) -> Self::Output {
        let nanos = self.0.whole_nanoseconds();
        let whole = rhs.trunc();
        let frac = rhs - whole;
        let scaled = nanos.saturating_mul(whole as i128) + (nanos as f64 * frac) as i128;
        Self::from_nanos(scaled)
    }
}

impl ops::Div<f64> for UniversalTime {
    type Output = UniversalTime;

    fn div(self, rhs: f64) -> Self::Output {
        self * rhs.recip()
    }
}

impl ops::Div<UniversalTime> for UniversalTime {
    type Output = f64;

    /// Ratio of two times, e.g. elapsed revolutions over a period.
    fn div(self, rhs: UniversalTime) -> Self::Output {
        self.0.whole_nanoseconds() as f64 / rhs.0.whole_nanoseconds() as f64
    }
}

impl ops::Rem<UniversalTime> for UniversalTime {
    type Output = UniversalTime;

    fn rem(self, rhs: UniversalTime) -> Self::Output {
        let rhs_nanos = rhs.0.whole_nanoseconds();
        if rhs_nanos == 0 {
            return self;
        }
        Self::from_nanos(self.0.whole_nanoseconds().rem_euclid(rhs_nanos))
    }
}

impl fmt::Display for UniversalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UT({}s)", self.0.as_seconds_f64())
    }
}

impl fmt::Debug for UniversalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::UniversalTime;

    #[test]
    fn subsecond_accuracy_at_cosmological_spans() {
        let base = UniversalTime::new_whole_seconds(1_000_000_000_000);
        let later = base + 1.0e-3;
        let diff = later - base;
        assert_abs_diff_eq!(diff.as_seconds_f64(), 1.0e-3, epsilon = 1e-9);
    }

    #[test]
    fn rem_euclid_keeps_phase_over_many_periods() {
        let period = 3.1558149e7;
        let t = UniversalTime::new_whole_seconds(1_000_000_000_000) + 0.25;
        let naive = UniversalTime::new_whole_seconds(1_000_000_000_000);
        let phase = t.rem_euclid_seconds(period) - naive.rem_euclid_seconds(period);
        assert_abs_diff_eq!(phase, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn day_index_floors_toward_negative_infinity() {
        assert_eq!(UniversalTime::new_seconds(1.0).day_index(), 0);
        assert_eq!(UniversalTime::new_whole_seconds(86_400).day_index(), 1);
        assert_eq!(UniversalTime::new_seconds(-1.0).day_index(), -1);
        assert_eq!(UniversalTime::new_whole_seconds(-86_400).day_index(), -1);
        assert_eq!(UniversalTime::new_seconds(-86_401.0).day_index(), -2);
    }

    #[test]
    fn scaling_by_whole_factors_is_exact() {
        let t = UniversalTime::new_whole_seconds(1_000_000_000_000);
        let doubled = t * 2.0;
        assert_eq!(doubled, UniversalTime::new_whole_seconds(2_000_000_000_000));
        let halved = doubled / 2.0;
        assert_eq!(halved, t);
    }

    #[test]
    fn rem_with_itself() {
        let t = UniversalTime::new_whole_seconds(10) + 0.5;
        let m = t % UniversalTime::new_whole_seconds(3);
        assert_abs_diff_eq!(m.as_seconds_f64(), 1.5, epsilon = 1e-12);
    }
}
