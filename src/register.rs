//! PLC register file
//!
//! A PLC has two register files: inputs, written by the bound process, and
//! outputs, written by the control routine and by coil writes from the network.
//! Each file packs eight digital ports into one byte and holds two 16-bit analog
//! registers. Analog values arrive as a 4–20 mA loop current and are stored as
//! that current scaled over the full `u16` range, as a PLC ADC would.

use crate::constants::{ANALOG_PORTS, CURRENT_LOOP_MAX_MA, CURRENT_LOOP_MIN_MA, DIGITAL_PORTS};
use crate::error::{ModbusError, ModbusResult};
use crate::sensor::AnalogSensor;
use crate::utils::{bit_be, bits_in_range_be, normalize_in_range, set_bit_be};

/// Digital and analog ports of one register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlcState {
    digital: u8,
    analog: [u16; ANALOG_PORTS],
}

impl PlcState {
    /// Create a zeroed register file
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a digital port
    pub fn set_digital(&mut self, pos: u8, value: bool) -> ModbusResult<()> {
        set_bit_be(&mut self.digital, pos, value)
    }

    /// Read a digital port
    pub fn digital(&self, pos: u8) -> ModbusResult<bool> {
        bit_be(self.digital, pos)
    }

    /// `count` digital ports starting at `start`, right aligned
    pub fn bits(&self, start: u16, count: u16) -> u8 {
        bits_in_range_be(start, count, self.digital)
    }

    /// Raw packed digital ports
    pub fn digital_byte(&self) -> u8 {
        self.digital
    }

    /// Store a raw 16-bit word in an analog register
    pub fn set_analog_raw(&mut self, pos: u8, value: u16) -> ModbusResult<()> {
        let slot = self
            .analog
            .get_mut(pos as usize)
            .ok_or_else(|| ModbusError::out_of_bounds("analog register", pos as usize, ANALOG_PORTS))?;
        *slot = value;
        Ok(())
    }

    /// Store a loop current (4–20 mA) as a 16-bit word.
    ///
    /// Fails if the current lies outside the loop range.
    pub fn set_analog(&mut self, pos: u8, current_ma: f64) -> ModbusResult<()> {
        let normalized = normalize_in_range(current_ma, CURRENT_LOOP_MIN_MA, CURRENT_LOOP_MAX_MA)?;
        self.set_analog_raw(pos, (normalized * f64::from(u16::MAX)) as u16)
    }

    /// Store the transmitter output of a sensor
    pub fn set_analog_from_sensor(&mut self, pos: u8, sensor: &AnalogSensor) -> ModbusResult<()> {
        self.set_analog(pos, sensor.output_value())
    }

    /// Read an analog register
    pub fn analog(&self, pos: u8) -> ModbusResult<u16> {
        self.analog
            .get(pos as usize)
            .copied()
            .ok_or_else(|| ModbusError::out_of_bounds("analog register", pos as usize, ANALOG_PORTS))
    }

    /// Number of digital ports
    pub const fn digital_len() -> usize {
        DIGITAL_PORTS
    }

    /// Number of analog registers
    pub const fn analog_len() -> usize {
        ANALOG_PORTS
    }
}

/// Input and output register files of one PLC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlcIo {
    /// Measurements produced by the bound process
    pub inputs: PlcState,
    /// Actuator commands consumed by the bound process
    pub outputs: PlcState,
}
