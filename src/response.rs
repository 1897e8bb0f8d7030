//! Client-side response handlers
//!
//! Replies are decoded into the SCADA variables of the RTU and function code
//! they answer. Read replies store measurements without touching the pending
//! write state of a variable; a coil echo confirms the write.

use tracing::debug;

use crate::adu::AduView;
use crate::constants::COIL_ON;
use crate::error::ModbusResult;
use crate::protocol::FunctionCode;
use crate::utils::bit_be;
use crate::variable::Var;

/// Apply a reply to `vars`, the variables of the answering RTU bound to the
/// reply's function code. `start` is the first position of the request.
///
/// Returns the number of variables updated.
pub fn process_response(
    response: &AduView<'_>,
    vars: &mut [&mut Var],
    start: u16,
) -> ModbusResult<usize> {
    match response.function_code()? {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            digital_read_response(response, vars, start)
        }
        FunctionCode::ReadInputRegisters => register_read_response(response, vars, start),
        FunctionCode::WriteSingleCoil => write_coil_response(response, vars),
    }
}

/// FC01/FC02 reply `[byte count, packed bits...]`
pub fn digital_read_response(
    response: &AduView<'_>,
    vars: &mut [&mut Var],
    start: u16,
) -> ModbusResult<usize> {
    if response.data_len() == 0 {
        return Ok(0);
    }
    let byte_count = response.data_byte(0)? as usize;
    let available = byte_count.min(response.data_len() - 1);

    let mut updated = 0;
    for var in vars.iter_mut() {
        let Some(offset) = u16::from(var.position()).checked_sub(start) else {
            continue;
        };
        let byte = (offset / 8) as usize + 1;
        if byte > available {
            continue;
        }
        let on = bit_be(response.data_byte(byte)?, (offset % 8) as u8)?;
        var.set_value_unchanged(u16::from(on));
        updated += 1;
    }
    Ok(updated)
}

/// FC04 reply `[byte count, hi, lo, ...]`
pub fn register_read_response(
    response: &AduView<'_>,
    vars: &mut [&mut Var],
    start: u16,
) -> ModbusResult<usize> {
    if response.data_len() == 0 {
        return Ok(0);
    }
    let byte_count = response.data_byte(0)? as usize;
    let available = byte_count.min(response.data_len() - 1);

    let mut updated = 0;
    for var in vars.iter_mut() {
        let Some(offset) = u16::from(var.position()).checked_sub(start) else {
            continue;
        };
        let high = 2 * offset as usize + 1;
        if high + 1 > available {
            continue;
        }
        var.set_value_unchanged(response.data_word(high)?);
        updated += 1;
    }
    Ok(updated)
}

/// FC05 echo `[address, 0xFF00 | 0x0000]`
pub fn write_coil_response(response: &AduView<'_>, vars: &mut [&mut Var]) -> ModbusResult<usize> {
    if response.data_len() != 4 {
        debug!("Ignoring coil echo with {} data bytes", response.data_len());
        return Ok(0);
    }
    let address = response.data_word(0)?;
    let value = response.data_word(2)?;

    match vars
        .iter_mut()
        .find(|var| u16::from(var.position()) == address)
    {
        Some(var) => {
            var.set_value(u16::from(value == COIL_ON));
            Ok(1)
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adu::ModbusAdu;
    use crate::variable::VarType;

    fn reply(fc: FunctionCode, data: &[u8]) -> ModbusAdu {
        ModbusAdu::encode(1, 1, fc, data).unwrap()
    }

    #[test]
    fn test_digital_offsets_relative_to_start() {
        let mut a = Var::new("a", VarType::Coil, 2, 1).unwrap();
        let mut b = Var::new("b", VarType::Coil, 4, 1).unwrap();
        let mut before = Var::new("c", VarType::Coil, 1, 1).unwrap();
        before.set_value_unchanged(7);

        // start=2, bits for positions 2..=4 -> 0b100 (position 4 on)
        let adu = reply(FunctionCode::ReadCoils, &[1, 0b100]);
        let updated =
            process_response(&adu.view(), &mut [&mut a, &mut b, &mut before], 2).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(a.value(), 0);
        assert_eq!(b.value(), 1);
        assert_eq!(before.value(), 7);
        assert!(!b.is_changed());
    }

    #[test]
    fn test_read_keeps_pending_write() {
        let mut light = Var::new("light", VarType::Coil, 0, 1).unwrap();
        light.propose(1);
        let adu = reply(FunctionCode::ReadCoils, &[1, 0]);
        process_response(&adu.view(), &mut [&mut light], 0).unwrap();
        assert_eq!(light.value(), 0);
        assert!(light.is_changed());
    }

    #[test]
    fn test_register_values() {
        let mut level = Var::new("level", VarType::InputRegister, 0, 1).unwrap();
        let mut flow = Var::new("flow", VarType::InputRegister, 1, 1).unwrap();
        let adu = reply(FunctionCode::ReadInputRegisters, &[4, 0x12, 0x34, 0xAB, 0xCD]);
        process_response(&adu.view(), &mut [&mut level, &mut flow], 0).unwrap();
        assert_eq!(level.value(), 0x1234);
        assert_eq!(flow.value(), 0xABCD);
    }

    #[test]
    fn test_register_beyond_byte_count_skipped() {
        let mut level = Var::new("level", VarType::InputRegister, 0, 1).unwrap();
        let mut flow = Var::new("flow", VarType::InputRegister, 1, 1).unwrap();
        let adu = reply(FunctionCode::ReadInputRegisters, &[2, 0x00, 0x10]);
        let updated = process_response(&adu.view(), &mut [&mut level, &mut flow], 0).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(level.value(), 0x10);
        assert_eq!(flow.value(), 0);
    }

    #[test]
    fn test_short_payload_skipped() {
        let mut level = Var::new("level", VarType::InputRegister, 0, 1).unwrap();
        let adu = reply(FunctionCode::ReadInputRegisters, &[]);
        assert_eq!(process_response(&adu.view(), &mut [&mut level], 0).unwrap(), 0);
        let adu = reply(FunctionCode::ReadInputRegisters, &[2, 0x01]);
        assert_eq!(process_response(&adu.view(), &mut [&mut level], 0).unwrap(), 0);
    }

    #[test]
    fn test_coil_echo_confirms_write() {
        let mut pump = Var::new("pump", VarType::Coil, 0, 1).unwrap();
        let mut valve = Var::new("valve", VarType::Coil, 1, 1).unwrap();
        valve.propose(1);

        let adu = reply(FunctionCode::WriteSingleCoil, &[0x00, 0x01, 0xFF, 0x00]);
        let updated = process_response(&adu.view(), &mut [&mut pump, &mut valve], 0).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(valve.value(), 1);
        assert!(!valve.is_changed());
        assert_eq!(pump.value(), 0);

        let short = reply(FunctionCode::WriteSingleCoil, &[0x00, 0x01]);
        assert_eq!(process_response(&short.view(), &mut [&mut valve], 0).unwrap(), 0);
    }
}
