//! Modbus-TCP constants for the supported subset
//!
//! Frame layout (all multi-byte fields big-endian):
//!
//! | Field | Offset | Size |
//! |-------|--------|------|
//! | Transaction ID | 0 | 2 |
//! | Protocol ID | 2 | 2 |
//! | Length | 4 | 2 |
//! | Unit ID | 6 | 1 |
//! | Function Code | 7 | 1 |
//! | Data | 8 | n |

// ============================================================================
// Frame Layout
// ============================================================================

/// Size of an ADU without data field
pub const ADU_HEADER_LEN: usize = 8;

/// Bytes preceding the unit id (not counted by the length field)
pub const MBAP_PREFIX_LEN: usize = 6;

/// Header bytes counted by the length field (unit id + function code)
pub const LENGTH_HEADER_BYTES: u16 = 2;

/// Transaction identifier offset
pub const TRANSACTION_ID_POS: usize = 0;

/// Protocol identifier offset
pub const PROTOCOL_ID_POS: usize = 2;

/// Length field offset
pub const LENGTH_FIELD_POS: usize = 4;

/// Unit identifier offset
pub const UNIT_ID_POS: usize = 6;

/// Function code offset
pub const FUNCTION_CODE_POS: usize = 7;

/// First data byte offset
pub const DATA_POS: usize = 8;

/// Protocol identifier for Modbus
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum length field value (unit id + 253 byte PDU)
pub const MAX_LENGTH_FIELD: u16 = 254;

// ============================================================================
// Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Coil ON encoding for FC05
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF encoding for FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Register File Limits
// ============================================================================

/// Number of digital ports packed into one byte
pub const DIGITAL_PORTS: usize = 8;

/// Number of 16-bit analog registers
pub const ANALOG_PORTS: usize = 2;

/// Highest position a bit-addressed read can cover
pub const MAX_BIT_POSITION: u16 = 7;

/// Highest position a register-addressed read can cover
pub const MAX_REGISTER_POSITION: u16 = 1;

/// Transmitter current range, in mA
pub const CURRENT_LOOP_MIN_MA: f64 = 4.0;

/// Transmitter current range, in mA
pub const CURRENT_LOOP_MAX_MA: f64 = 20.0;

// ============================================================================
// Network
// ============================================================================

/// Modbus-TCP server port
pub const MODBUS_TCP_PORT: u16 = 502;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        assert_eq!(ADU_HEADER_LEN, DATA_POS);
        assert_eq!(MBAP_PREFIX_LEN + LENGTH_HEADER_BYTES as usize, ADU_HEADER_LEN);
        assert_eq!(UNIT_ID_POS, MBAP_PREFIX_LEN);
    }

    #[test]
    fn test_register_limits() {
        assert_eq!(MAX_BIT_POSITION as usize, DIGITAL_PORTS - 1);
        assert_eq!(MAX_REGISTER_POSITION as usize, ANALOG_PORTS - 1);
    }
}
