//! Server-side request handlers
//!
//! Each handler validates a request against the register file it targets and
//! returns the reply to send, or `None` when the request falls outside the
//! envelope the PLC serves. Out-of-envelope requests get no reply.

use tracing::debug;

use crate::adu::{AduView, ModbusAdu};
use crate::constants::{
    ANALOG_PORTS, COIL_OFF, COIL_ON, DIGITAL_PORTS, MAX_BIT_POSITION, MAX_REGISTER_POSITION,
};
use crate::error::ModbusResult;
use crate::protocol::FunctionCode;
use crate::register::{PlcIo, PlcState};
use crate::utils::split_u16;

/// Request data carries two words
const REQUEST_DATA_LEN: usize = 4;

/// Route a request to the register file its function code addresses.
///
/// Coil reads and coil writes use the output file; discrete input and input
/// register reads use the input file. An unsupported function code is an
/// [`InvalidFunction`](crate::ModbusError::InvalidFunction) error.
pub fn process_request(request: &AduView<'_>, io: &mut PlcIo) -> ModbusResult<Option<ModbusAdu>> {
    match request.function_code()? {
        FunctionCode::ReadCoils => digital_read(request, &io.outputs),
        FunctionCode::ReadDiscreteInputs => digital_read(request, &io.inputs),
        FunctionCode::ReadInputRegisters => register_read(request, &io.inputs),
        FunctionCode::WriteSingleCoil => write_coil(request, &mut io.outputs),
    }
}

fn request_words(request: &AduView<'_>) -> ModbusResult<Option<(u16, u16)>> {
    if request.data_len() < REQUEST_DATA_LEN {
        debug!(
            "Dropping {} request with {} data bytes",
            request.raw_function_code(),
            request.data_len()
        );
        return Ok(None);
    }
    Ok(Some((request.data_word(0)?, request.data_word(2)?)))
}

/// FC01/FC02: reply `[1, packed bits]`
pub fn digital_read(request: &AduView<'_>, state: &PlcState) -> ModbusResult<Option<ModbusAdu>> {
    let Some((start, count)) = request_words(request)? else {
        return Ok(None);
    };

    if start >= MAX_BIT_POSITION || count == 0 || count > DIGITAL_PORTS as u16 - start {
        debug!("Digital read start={} count={} out of range", start, count);
        return Ok(None);
    }

    let mut reply = ModbusAdu::copy_header(request);
    reply.set_data(&[1, state.bits(start, count)])?;
    Ok(Some(reply))
}

/// FC04: reply `[2n, hi, lo, ...]`
pub fn register_read(request: &AduView<'_>, state: &PlcState) -> ModbusResult<Option<ModbusAdu>> {
    let Some((start, count)) = request_words(request)? else {
        return Ok(None);
    };

    if start > MAX_REGISTER_POSITION || count == 0 || count > ANALOG_PORTS as u16 - start {
        debug!("Register read start={} count={} out of range", start, count);
        return Ok(None);
    }

    let mut data = Vec::with_capacity(1 + 2 * count as usize);
    data.push((2 * count) as u8);
    for pos in start..start + count {
        let (high, low) = split_u16(state.analog(pos as u8)?);
        data.push(high);
        data.push(low);
    }

    let mut reply = ModbusAdu::copy_header(request);
    reply.set_data(&data)?;
    Ok(Some(reply))
}

/// FC05: apply the write and echo the request
pub fn write_coil(request: &AduView<'_>, state: &mut PlcState) -> ModbusResult<Option<ModbusAdu>> {
    let Some((address, value)) = request_words(request)? else {
        return Ok(None);
    };

    if address >= DIGITAL_PORTS as u16 {
        debug!("Coil write to address {} out of range", address);
        return Ok(None);
    }
    let on = match value {
        COIL_ON => true,
        COIL_OFF => false,
        other => {
            debug!("Coil write with invalid value 0x{:04X}", other);
            return Ok(None);
        }
    };

    state.set_digital(address as u8, on)?;
    Ok(Some(request.to_owned()))
}
