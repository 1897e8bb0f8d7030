//! Modbus function codes supported by the control network

use std::fmt;

use crate::constants::{
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_INPUT_REGISTERS, FC_WRITE_SINGLE_COIL,
    MAX_BIT_POSITION, MAX_REGISTER_POSITION,
};
use crate::error::{ModbusError, ModbusResult};

/// Unit identifier (1-based RTU index on the SCADA side)
pub type UnitId = u8;

/// Client-assigned correlation id echoed by the server
pub type TransactionId = u16;

/// Function codes implemented by the PLC server and SCADA client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs,
    /// Read Input Registers (0x04)
    ReadInputRegisters,
    /// Write Single Coil (0x05)
    WriteSingleCoil,
}

impl FunctionCode {
    /// Parse a raw function code
    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            _ => Err(ModbusError::invalid_function(code)),
        }
    }

    /// Raw function code
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadCoils => FC_READ_COILS,
            Self::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
        }
    }

    /// Whether this function reads data
    pub fn is_read(self) -> bool {
        !matches!(self, Self::WriteSingleCoil)
    }

    /// Whether this function addresses single bits
    pub fn is_bit_addressed(self) -> bool {
        !matches!(self, Self::ReadInputRegisters)
    }

    /// Highest position a single request of this function can cover
    pub fn max_position(self) -> u16 {
        if self.is_bit_addressed() {
            MAX_BIT_POSITION
        } else {
            MAX_REGISTER_POSITION
        }
    }

    /// Human-readable name
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ModbusError;

    fn try_from(code: u8) -> ModbusResult<Self> {
        Self::from_u8(code)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02X} ({})", self.to_u8(), self.description())
    }
}
