use crate::cell::CellType;
use crate::duration::Duration;
use serde::{Deserialize, Serialize};

/// A real value that evolves at a constant rate between effects.
pub struct Linear;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct LinearState {
    pub value: f64,
    /// Change in value per second.
    pub rate: f64,
}

impl LinearState {
    pub fn new(value: f64, rate: f64) -> Self {
        Self { value, rate }
    }

    pub fn constant(value: f64) -> Self {
        Self { value, rate: 0.0 }
    }

    /// The value after `elapsed` time.
    pub fn evolve(&self, elapsed: Duration) -> f64 {
        self.value + self.rate * elapsed.as_seconds_f64()
    }

    /// The earliest time within `window` at which the value is at least `threshold`.
    pub fn first_at_least(&self, threshold: f64, window: Duration) -> Option<Duration> {
        if self.value >= threshold {
            return Some(Duration::ZERO);
        }
        if self.rate <= 0.0 {
            return None;
        }
        let seconds = (threshold - self.value) / self.rate;
        let micros = (seconds * 1_000_000.0).ceil();
        if micros > window.in_micros() as f64 {
            None
        } else {
            Some(Duration::from_micros(micros as i64))
        }
    }

    /// The earliest time within `window` at which the value is at most `threshold`.
    pub fn first_at_most(&self, threshold: f64, window: Duration) -> Option<Duration> {
        LinearState::new(-self.value, -self.rate).first_at_least(-threshold, window)
    }
}

/// Additive changes to the value and rate of a [Linear] cell.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct LinearEffect {
    pub value: f64,
    pub rate: f64,
}

impl LinearEffect {
    pub fn add(value: f64) -> Self {
        Self { value, rate: 0.0 }
    }

    pub fn add_rate(rate: f64) -> Self {
        Self { value: 0.0, rate }
    }
}

impl CellType for Linear {
    type State = LinearState;
    type Effect = LinearEffect;

    fn empty(&self) -> LinearEffect {
        LinearEffect::default()
    }

    fn sequentially(&self, prefix: LinearEffect, suffix: LinearEffect) -> LinearEffect {
        LinearEffect {
            value: prefix.value + suffix.value,
            rate: prefix.rate + suffix.rate,
        }
    }

    fn concurrently(&self, left: LinearEffect, right: LinearEffect) -> LinearEffect {
        self.sequentially(left, right)
    }

    fn apply(&self, state: &mut LinearState, effect: &LinearEffect) {
        state.value += effect.value;
        state.rate += effect.rate;
    }

    fn step(&self, state: &mut LinearState, elapsed: Duration) {
        state.value = state.evolve(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_along_rate() {
        let mut state = LinearState::new(4.0, 0.5);
        Linear.step(&mut state, Duration::seconds(2));
        assert_eq!(LinearState::new(5.0, 0.5), state);
    }

    #[test]
    fn threshold_crossings() {
        let state = LinearState::new(0.0, 2.0);
        assert_eq!(
            Some(Duration::seconds(5)),
            state.first_at_least(10.0, Duration::MINUTE)
        );
        assert_eq!(None, state.first_at_least(10.0, Duration::seconds(4)));
        assert_eq!(
            Some(Duration::ZERO),
            state.first_at_most(1.0, Duration::MINUTE)
        );
        assert_eq!(None, state.first_at_most(-1.0, Duration::MINUTE));
    }
}
