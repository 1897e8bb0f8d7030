//! Example physical processes and control routines
//!
//! A water tank filled by a pump and drained by a valve, a hysteresis
//! controller for it, and a two-light semaphore that mirrors its actuators.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::ModbusResult;
use crate::process::{PhysicalProcess, PlcControl};
use crate::register::PlcState;
use crate::sensor::AnalogSensor;
use crate::utils::denormalize_u16_in_range;

/// Water tank with a pump inlet, a valve outlet and an analog level sensor.
///
/// Heights are in metres, flows in m³/s.
#[derive(Debug, Clone)]
pub struct WaterTank {
    level: AnalogSensor,
    prev_time: Duration,
}

impl WaterTank {
    /// Cross-sectional area in m²
    pub const BASE_AREA: f64 = 1.0;
    pub const PUMP_FLOW: f64 = 0.1;
    pub const VALVE_FLOW: f64 = 0.05;
    /// Calibrated range of the level sensor
    pub const LEVEL_RANGE: (f64, f64) = (0.0, 10.0);

    /// Analog input carrying the level
    pub const LEVEL_SENSOR_POS: u8 = 0;
    /// Digital output driving the pump
    pub const PUMP_POS: u8 = 0;
    /// Digital output driving the valve
    pub const VALVE_POS: u8 = 1;

    pub fn new() -> Self {
        Self::with_level(0.0)
    }

    /// Tank seeded at `level` metres
    pub fn with_level(level: f64) -> Self {
        let (min, max) = Self::LEVEL_RANGE;
        Self {
            level: AnalogSensor::with_value(min, max, level),
            prev_time: Duration::ZERO,
        }
    }

    pub fn level(&self) -> f64 {
        self.level.value()
    }
}

impl Default for WaterTank {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalProcess for WaterTank {
    fn advance(&mut self, now: Duration, inputs: &mut PlcState, outputs: &PlcState) -> ModbusResult<()> {
        let dt = now.saturating_sub(self.prev_time).as_secs_f64();

        if outputs.digital(Self::PUMP_POS)? {
            self.level += Self::PUMP_FLOW * dt / Self::BASE_AREA;
        }
        if outputs.digital(Self::VALVE_POS)? {
            self.level -= Self::VALVE_FLOW * dt / Self::BASE_AREA;
        }
        if self.level < 0.0 {
            self.level.set_value(0.0);
        }
        self.prev_time = now;

        inputs.set_analog_from_sensor(Self::LEVEL_SENSOR_POS, &self.level)
    }
}

/// Two-threshold level controller for a [`WaterTank`].
///
/// Below `low` the pump runs and the valve closes; above `high` the pump stops
/// and the valve opens. In between the actuators hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankController {
    low: f64,
    high: f64,
}

impl TankController {
    pub const LOW_LEVEL: f64 = 0.2;
    pub const HIGH_LEVEL: f64 = 0.5;

    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }
}

impl Default for TankController {
    fn default() -> Self {
        Self::new(Self::LOW_LEVEL, Self::HIGH_LEVEL)
    }
}

impl PlcControl for TankController {
    fn update(&mut self, measured: &PlcState, outputs: &mut PlcState) -> ModbusResult<()> {
        let (min, max) = WaterTank::LEVEL_RANGE;
        let level =
            denormalize_u16_in_range(measured.analog(WaterTank::LEVEL_SENSOR_POS)?, min, max);

        if level < self.low {
            outputs.set_digital(WaterTank::PUMP_POS, true)?;
            outputs.set_digital(WaterTank::VALVE_POS, false)?;
        } else if level > self.high {
            outputs.set_digital(WaterTank::PUMP_POS, false)?;
            outputs.set_digital(WaterTank::VALVE_POS, true)?;
        }
        Ok(())
    }
}

/// State of the semaphore lights at one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSample {
    pub time: Duration,
    pub pump_light: bool,
    pub valve_light: bool,
}

/// Shared record of semaphore samples
pub type LightLog = Rc<RefCell<Vec<LightSample>>>;

/// Two lights showing whether the pump and the valve are running.
///
/// The lights are driven by coil writes; the process only records them.
#[derive(Debug, Clone, Default)]
pub struct Semaphore {
    log: Option<LightLog>,
}

impl Semaphore {
    pub const PUMP_LIGHT_POS: u8 = 0;
    pub const VALVE_LIGHT_POS: u8 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record every tick into `log`
    pub fn with_log(log: LightLog) -> Self {
        Self { log: Some(log) }
    }
}

impl PhysicalProcess for Semaphore {
    fn advance(&mut self, now: Duration, _inputs: &mut PlcState, outputs: &PlcState) -> ModbusResult<()> {
        if let Some(ref log) = self.log {
            log.borrow_mut().push(LightSample {
                time: now,
                pump_light: outputs.digital(Self::PUMP_LIGHT_POS)?,
                valve_light: outputs.digital(Self::VALVE_LIGHT_POS)?,
            });
        }
        Ok(())
    }
}
