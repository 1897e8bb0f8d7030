//! Named protocol-bound variables held by the SCADA

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{FunctionCode, UnitId};

/// Register type a variable is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    /// Writable output bit
    Coil,
    /// Read-only input bit
    DigitalInput,
    /// Read-only 16-bit measurement
    InputRegister,
    /// SCADA-side value with no wire position
    LocalVariable,
}

impl VarType {
    /// Function code used to read this type, `None` for local variables
    pub fn read_function(self) -> Option<FunctionCode> {
        match self {
            Self::Coil => Some(FunctionCode::ReadCoils),
            Self::DigitalInput => Some(FunctionCode::ReadDiscreteInputs),
            Self::InputRegister => Some(FunctionCode::ReadInputRegisters),
            Self::LocalVariable => None,
        }
    }

    /// Variable type touched by a function code
    pub fn from_function(fc: FunctionCode) -> Self {
        match fc {
            FunctionCode::ReadCoils | FunctionCode::WriteSingleCoil => Self::Coil,
            FunctionCode::ReadDiscreteInputs => Self::DigitalInput,
            FunctionCode::ReadInputRegisters => Self::InputRegister,
        }
    }
}

/// A named value bound to a register of one RTU.
///
/// `changed` marks a value proposed by a user write that the RTU has not yet
/// confirmed. Values decoded from read replies never set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    var_type: VarType,
    position: u8,
    value: u16,
    unit_id: UnitId,
    changed: bool,
    proposed: u16,
}

impl Var {
    /// Create a network variable.
    ///
    /// Unit id 0 is rejected for every type except [`VarType::LocalVariable`].
    pub fn new(name: &str, var_type: VarType, position: u8, unit_id: UnitId) -> ModbusResult<Self> {
        if unit_id == 0 && var_type != VarType::LocalVariable {
            return Err(ModbusError::InvalidUnitId { name: name.to_string() });
        }
        Ok(Self {
            var_type,
            position,
            value: 0,
            unit_id,
            changed: false,
            proposed: 0,
        })
    }

    /// Create a SCADA-local variable
    pub fn local(value: u16) -> Self {
        Self {
            var_type: VarType::LocalVariable,
            position: 0,
            value,
            unit_id: 0,
            changed: false,
            proposed: 0,
        }
    }

    pub fn var_type(&self) -> VarType {
        self.var_type
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Whether a user write is awaiting confirmation
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Value proposed by the last unconfirmed user write
    pub fn proposed(&self) -> Option<u16> {
        self.changed.then_some(self.proposed)
    }

    /// Record a user-proposed value; the stored value is untouched until the
    /// RTU confirms it.
    pub fn propose(&mut self, value: u16) {
        self.changed = true;
        self.proposed = value;
    }

    /// Drop a proposal whose write was never sent
    pub fn cancel_proposal(&mut self) {
        self.changed = false;
        self.proposed = 0;
    }

    /// Store a value confirmed by the RTU and clear the pending write
    pub fn set_value(&mut self, value: u16) {
        self.value = value;
        self.changed = false;
    }

    /// Store a measurement without touching the pending-write state
    pub fn set_value_unchanged(&mut self, value: u16) {
        self.value = value;
    }

    /// Whether writing `value` would change what the RTU holds or is about to hold
    pub fn differs_from(&self, value: u16) -> bool {
        match self.proposed() {
            Some(pending) => pending != value,
            None => self.value != value,
        }
    }
}
