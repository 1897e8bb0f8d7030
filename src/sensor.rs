//! Analog transmitter model

use std::cmp::Ordering;
use std::ops::{AddAssign, MulAssign, SubAssign};

use crate::constants::{CURRENT_LOOP_MAX_MA, CURRENT_LOOP_MIN_MA};

/// A physical measurement with a calibrated range.
///
/// The sensor behaves like a 4–20 mA transmitter: [`AnalogSensor::output_value`]
/// maps the physical value linearly onto the loop current.
///
/// ```rust
/// use voltage_ics::AnalogSensor;
///
/// let mut level = AnalogSensor::new(0.0, 10.0);
/// level += 5.0;
/// assert_eq!(level.output_value(), 12.0);
/// assert!(level > 4.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogSensor {
    value: f64,
    min: f64,
    max: f64,
}

impl AnalogSensor {
    /// Sensor calibrated on `[min, max]` reading zero
    pub fn new(min: f64, max: f64) -> Self {
        Self::with_value(min, max, 0.0)
    }

    /// Sensor calibrated on `[min, max]` with an initial reading
    pub fn with_value(min: f64, max: f64, value: f64) -> Self {
        Self { value, min, max }
    }

    /// Loop current in mA, clamped to 4–20
    pub fn output_value(&self) -> f64 {
        let scaling = (CURRENT_LOOP_MAX_MA - CURRENT_LOOP_MIN_MA) / (self.max - self.min);
        let current = (self.value - self.min) * scaling + CURRENT_LOOP_MIN_MA;
        current.clamp(CURRENT_LOOP_MIN_MA, CURRENT_LOOP_MAX_MA)
    }

    /// Physical value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Overwrite the physical value
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Calibrated range
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

impl AddAssign<f64> for AnalogSensor {
    fn add_assign(&mut self, rhs: f64) {
        self.value += rhs;
    }
}

impl SubAssign<f64> for AnalogSensor {
    fn sub_assign(&mut self, rhs: f64) {
        self.value -= rhs;
    }
}

impl MulAssign<f64> for AnalogSensor {
    fn mul_assign(&mut self, rhs: f64) {
        self.value *= rhs;
    }
}

impl PartialEq<f64> for AnalogSensor {
    fn eq(&self, other: &f64) -> bool {
        self.value == *other
    }
}

impl PartialOrd<f64> for AnalogSensor {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.value.partial_cmp(other)
    }
}
