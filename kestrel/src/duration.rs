use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A signed, fixed-point span of simulation time with microsecond resolution.
///
/// All simulation-visible times are durations relative to an epoch (usually the
/// simulation start). Arithmetic saturates at [Duration::MIN] and [Duration::MAX] instead
/// of overflowing, so `MAX` can be used as "never".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const EPSILON: Duration = Duration(1);
    pub const MIN: Duration = Duration(i64::MIN);
    pub const MAX: Duration = Duration(i64::MAX);

    pub const MICROSECOND: Duration = Duration(1);
    pub const MILLISECOND: Duration = Duration(1_000);
    pub const SECOND: Duration = Duration(1_000_000);
    pub const MINUTE: Duration = Duration(60 * 1_000_000);
    pub const HOUR: Duration = Duration(60 * 60 * 1_000_000);
    pub const DAY: Duration = Duration(24 * 60 * 60 * 1_000_000);

    pub const fn from_micros(micros: i64) -> Self {
        Duration(micros)
    }

    /// `amount` multiples of `unit`, saturating.
    pub const fn of(amount: i64, unit: Duration) -> Self {
        Duration(amount.saturating_mul(unit.0))
    }

    pub fn micros(amount: i64) -> Self {
        Self::of(amount, Self::MICROSECOND)
    }
    pub fn millis(amount: i64) -> Self {
        Self::of(amount, Self::MILLISECOND)
    }
    pub fn seconds(amount: i64) -> Self {
        Self::of(amount, Self::SECOND)
    }
    pub fn minutes(amount: i64) -> Self {
        Self::of(amount, Self::MINUTE)
    }
    pub fn hours(amount: i64) -> Self {
        Self::of(amount, Self::HOUR)
    }

    pub const fn in_micros(self) -> i64 {
        self.0
    }

    /// Whole multiples of `unit` in this duration, truncated toward zero.
    pub const fn whole_units(self, unit: Duration) -> i64 {
        self.0 / unit.0
    }

    pub fn ratio_over(self, unit: Duration) -> f64 {
        self.0 as f64 / unit.0 as f64
    }

    pub fn as_seconds_f64(self) -> f64 {
        self.ratio_over(Duration::SECOND)
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Duration) -> Self {
        Duration(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Duration) -> Self {
        Duration(self.0.saturating_sub(other.0))
    }

    pub fn checked_add(self, other: Duration) -> Option<Self> {
        self.0.checked_add(other.0).map(Duration)
    }

    pub fn abs(self) -> Self {
        Duration(self.0.saturating_abs())
    }

    /// The remainder of this duration modulo `unit`, always non-negative for positive units.
    pub fn remainder_of(self, unit: Duration) -> Self {
        Duration(self.0.rem_euclid(unit.0))
    }

    pub fn to_hifitime(self) -> hifitime::Duration {
        hifitime::Duration::from_total_nanoseconds(self.0 as i128 * 1_000)
    }

    /// Truncates sub-microsecond precision.
    pub fn from_hifitime(duration: hifitime::Duration) -> Self {
        let micros = duration.total_nanoseconds() / 1_000;
        Duration(micros.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Self::Output {
        Duration(self.0.saturating_neg())
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: i64) -> Self::Output {
        Duration(self.0.saturating_mul(rhs))
    }
}

impl Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Self {
        iter.fold(Duration::ZERO, Add::add)
    }
}

impl Debug for Duration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Duration::MAX => write!(f, "+inf"),
            Duration::MIN => write!(f, "-inf"),
            _ => {
                let sign = if self.0 < 0 { "-" } else { "" };
                let micros = self.0.unsigned_abs();
                let seconds = micros / 1_000_000;
                let fraction = micros % 1_000_000;
                let (h, m, s) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);
                write!(f, "{sign}{h:02}:{m:02}:{s:02}.{fraction:06}")
            }
        }
    }
}

impl From<hifitime::Duration> for Duration {
    fn from(value: hifitime::Duration) -> Self {
        Duration::from_hifitime(value)
    }
}

impl From<Duration> for hifitime::Duration {
    fn from(value: Duration) -> Self {
        value.to_hifitime()
    }
}
