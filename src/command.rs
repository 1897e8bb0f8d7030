//! Outbound SCADA commands
//!
//! A [`ReadCommand`] covers the smallest contiguous span of one RTU's variables
//! for one function code and grows as variables are registered. A
//! [`WriteCommand`] sets a single coil and remembers the RTU it targets.

use bytes::Bytes;

use crate::adu::ModbusAdu;
use crate::constants::{COIL_OFF, COIL_ON};
use crate::error::ModbusResult;
use crate::protocol::{FunctionCode, TransactionId, UnitId};
use crate::transport::{FrameSink, LinkId};

/// Function code plus two data words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    function: FunctionCode,
    start: u16,
    value: u16,
}

impl Command {
    pub fn new(function: FunctionCode, start: u16, value: u16) -> Self {
        Self {
            function,
            start,
            value,
        }
    }

    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// First address (or the written address)
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Quantity for reads, encoded value for writes
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Encode as `[start, value]`
    pub fn to_adu(&self, tid: TransactionId, uid: UnitId) -> ModbusResult<ModbusAdu> {
        ModbusAdu::encode_words(tid, uid, self.function, &[self.start, self.value])
    }

    fn send<S: FrameSink + ?Sized>(
        &self,
        sink: &mut S,
        link: LinkId,
        tid: TransactionId,
        uid: UnitId,
    ) -> ModbusResult<ModbusAdu> {
        let adu = self.to_adu(tid, uid)?;
        sink.send(link, Bytes::copy_from_slice(adu.as_bytes()))?;
        Ok(adu)
    }
}

/// Read request coalescing a range of positions.
///
/// ```rust
/// use voltage_ics::{FunctionCode, ReadCommand};
///
/// let mut cmd = ReadCommand::new(FunctionCode::ReadCoils);
/// cmd.set_read_count(3);
/// cmd.set_read_count(1);
/// cmd.set_read_count(12); // clamped to position 7
/// assert_eq!((cmd.start(), cmd.count()), (1, 7));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCommand {
    command: Command,
    max_pos: u16,
}

impl ReadCommand {
    /// Empty range for `function`
    pub fn new(function: FunctionCode) -> Self {
        Self {
            command: Command::new(function, 0, 0),
            max_pos: function.max_position(),
        }
    }

    /// Extend the range so it covers `pos`, clamped to the function's last
    /// position. The range never shrinks.
    pub fn set_read_count(&mut self, pos: u8) {
        let pos = u16::from(pos);
        let Command { start, value, .. } = &mut self.command;

        if *value == 0 {
            if pos <= self.max_pos {
                *start = pos;
                *value = 1;
            }
            return;
        }

        let end = *start + *value - 1;
        if pos < *start {
            *value = end - pos + 1;
            *start = pos;
        } else if pos > end {
            let end = pos.min(self.max_pos);
            *value = end - *start + 1;
        }
    }

    pub fn function(&self) -> FunctionCode {
        self.command.function
    }

    pub fn start(&self) -> u16 {
        self.command.start
    }

    /// Number of positions covered, 0 while no position was added
    pub fn count(&self) -> u16 {
        self.command.value
    }

    /// Last covered position
    pub fn end(&self) -> Option<u16> {
        (self.count() > 0).then(|| self.start() + self.count() - 1)
    }

    pub fn max_position(&self) -> u16 {
        self.max_pos
    }

    /// Send the read request to unit `uid`
    pub fn execute<S: FrameSink + ?Sized>(
        &self,
        sink: &mut S,
        link: LinkId,
        tid: TransactionId,
        uid: UnitId,
    ) -> ModbusResult<ModbusAdu> {
        self.command.send(sink, link, tid, uid)
    }
}

/// Write Single Coil request bound to one RTU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCommand {
    command: Command,
    uid: UnitId,
}

impl WriteCommand {
    /// Coil write of `value` (non-zero is on) at `address` on unit `uid`
    pub fn new(address: u16, value: u16, uid: UnitId) -> Self {
        let encoded = if value != 0 { COIL_ON } else { COIL_OFF };
        Self {
            command: Command::new(FunctionCode::WriteSingleCoil, address, encoded),
            uid,
        }
    }

    pub fn address(&self) -> u16 {
        self.command.start
    }

    /// `0xFF00` or `0x0000`
    pub fn encoded_value(&self) -> u16 {
        self.command.value
    }

    pub fn unit_id(&self) -> UnitId {
        self.uid
    }

    /// Send the write using the stored unit id
    pub fn execute<S: FrameSink + ?Sized>(
        &self,
        sink: &mut S,
        link: LinkId,
        tid: TransactionId,
    ) -> ModbusResult<ModbusAdu> {
        self.command.send(sink, link, tid, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uninitialised_range() {
        let cmd = ReadCommand::new(FunctionCode::ReadInputRegisters);
        assert_eq!(cmd.count(), 0);
        assert_eq!(cmd.end(), None);
        assert_eq!(cmd.max_position(), 1);
    }

    #[test]
    fn test_first_position_beyond_cap_ignored() {
        let mut cmd = ReadCommand::new(FunctionCode::ReadInputRegisters);
        cmd.set_read_count(5);
        assert_eq!(cmd.count(), 0);
        cmd.set_read_count(1);
        assert_eq!((cmd.start(), cmd.count()), (1, 1));
        cmd.set_read_count(0);
        assert_eq!((cmd.start(), cmd.count()), (0, 2));
        cmd.set_read_count(3);
        assert_eq!((cmd.start(), cmd.count()), (0, 2));
    }

    #[test]
    fn test_read_uses_caller_unit_id() {
        let mut cmd = ReadCommand::new(FunctionCode::ReadDiscreteInputs);
        cmd.set_read_count(2);
        cmd.set_read_count(4);

        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();
        cmd.execute(&mut sink, 4, 0x0010, 3).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].0, 4);
        assert_eq!(
            &sink[0].1[..],
            &[0x00, 0x10, 0x00, 0x00, 0x00, 0x06, 0x03, 0x02, 0x00, 0x02, 0x00, 0x03]
        );
    }

    #[test]
    fn test_write_uses_stored_unit_id() {
        let on = WriteCommand::new(1, 1, 2);
        let off = WriteCommand::new(0, 0, 2);
        assert_eq!(on.encoded_value(), 0xFF00);
        assert_eq!(off.encoded_value(), 0x0000);

        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();
        let adu = on.execute(&mut sink, 1, 9).unwrap();
        assert_eq!(adu.unit_id(), 2);
        assert_eq!(
            &sink[0].1[..],
            &[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x02, 0x05, 0x00, 0x01, 0xFF, 0x00]
        );
    }

    proptest! {
        #[test]
        fn prop_range_is_monotone_and_idempotent(
            positions in proptest::collection::vec(0u8..16, 1..20),
            registers: bool,
        ) {
            let fc = if registers {
                FunctionCode::ReadInputRegisters
            } else {
                FunctionCode::ReadCoils
            };
            let mut cmd = ReadCommand::new(fc);
            for &pos in &positions {
                let before = cmd;
                cmd.set_read_count(pos);
                if let Some(prev_end) = before.end() {
                    prop_assert!(cmd.start() <= before.start());
                    prop_assert!(cmd.end().unwrap() >= prev_end);
                }
                prop_assert!(cmd.end().map_or(true, |end| end <= cmd.max_position()));

                let again = cmd;
                cmd.set_read_count(pos);
                prop_assert_eq!(cmd, again);

                if u16::from(pos) <= cmd.max_position() {
                    prop_assert!(cmd.start() <= u16::from(pos));
                    prop_assert!(cmd.end().unwrap() >= u16::from(pos));
                }
            }
        }

        #[test]
        fn prop_range_matches_closed_form(
            positions in proptest::collection::vec(0u8..16, 1..20),
            registers: bool,
        ) {
            let fc = if registers {
                FunctionCode::ReadInputRegisters
            } else {
                FunctionCode::ReadCoils
            };
            let cap = fc.max_position();
            let mut cmd = ReadCommand::new(fc);
            for &pos in &positions {
                cmd.set_read_count(pos);
            }

            let positions: Vec<u16> = positions.into_iter().map(u16::from).collect();
            match positions.iter().position(|&p| p <= cap) {
                None => prop_assert_eq!(cmd.count(), 0),
                Some(first) => {
                    let start = positions.iter().copied().filter(|&p| p <= cap).min().unwrap();
                    let max = positions[first..].iter().copied().max().unwrap();
                    prop_assert_eq!(cmd.start(), start);
                    prop_assert_eq!(cmd.count(), max.min(cap) - start + 1);
                }
            }
        }
    }
}
