//! Modbus-TCP Application Data Unit
//!
//! [`ModbusAdu`] is an owned, growable frame used to build requests and replies.
//! [`AduView`] borrows one frame out of a received byte stream without copying.
//! Both keep the invariant `length field == frame size - 6`.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::constants::{
    ADU_HEADER_LEN, DATA_POS, FUNCTION_CODE_POS, LENGTH_FIELD_POS, LENGTH_HEADER_BYTES,
    MAX_LENGTH_FIELD, MBAP_PREFIX_LEN, MODBUS_PROTOCOL_ID, PROTOCOL_ID_POS, TRANSACTION_ID_POS,
    UNIT_ID_POS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{FunctionCode, TransactionId, UnitId};
use crate::utils::combine_u8;

/// Largest data field a frame can carry
pub const MAX_DATA_LEN: usize = (MAX_LENGTH_FIELD - LENGTH_HEADER_BYTES) as usize;

/// Size of the frame at the head of `stream`.
///
/// Returns `Ok(None)` while the frame is incomplete and an error when the length
/// field cannot describe a valid frame.
pub fn frame_len(stream: &[u8]) -> ModbusResult<Option<usize>> {
    if stream.len() < LENGTH_FIELD_POS + 2 {
        return Ok(None);
    }
    let length = combine_u8(stream[LENGTH_FIELD_POS], stream[LENGTH_FIELD_POS + 1]);
    if !(LENGTH_HEADER_BYTES..=MAX_LENGTH_FIELD).contains(&length) {
        return Err(ModbusError::frame(format!(
            "length field {} outside [{}, {}]",
            length, LENGTH_HEADER_BYTES, MAX_LENGTH_FIELD
        )));
    }
    let total = MBAP_PREFIX_LEN + length as usize;
    Ok((total <= stream.len()).then_some(total))
}

/// Number of leading bytes of `stream` that form complete frames
pub fn complete_len(stream: &[u8]) -> ModbusResult<usize> {
    let mut start = 0;
    while let Some(len) = frame_len(&stream[start..])? {
        start += len;
    }
    Ok(start)
}

// ============================================================================
// Owned ADU
// ============================================================================

/// Owned Modbus-TCP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusAdu {
    bytes: BytesMut,
}

impl ModbusAdu {
    /// Create a frame with a zeroed header and no data
    pub fn new() -> Self {
        let mut bytes = BytesMut::with_capacity(ADU_HEADER_LEN + 4);
        bytes.put_u16(0);
        bytes.put_u16(MODBUS_PROTOCOL_ID);
        bytes.put_u16(LENGTH_HEADER_BYTES);
        bytes.put_u8(0);
        bytes.put_u8(0);
        Self { bytes }
    }

    /// Build a frame with a byte payload
    pub fn encode(
        tid: TransactionId,
        uid: UnitId,
        fc: FunctionCode,
        data: &[u8],
    ) -> ModbusResult<Self> {
        let mut adu = Self::new();
        adu.set_transaction_id(tid);
        adu.set_unit_id(uid);
        adu.set_function_code(fc);
        adu.set_data(data)?;
        Ok(adu)
    }

    /// Build a frame with a big-endian word payload
    pub fn encode_words(
        tid: TransactionId,
        uid: UnitId,
        fc: FunctionCode,
        words: &[u16],
    ) -> ModbusResult<Self> {
        let mut adu = Self::new();
        adu.set_transaction_id(tid);
        adu.set_unit_id(uid);
        adu.set_function_code(fc);
        adu.set_words(words)?;
        Ok(adu)
    }

    /// Copy a single frame, validating its size and length field
    pub fn from_slice(frame: &[u8]) -> ModbusResult<Self> {
        AduView::new(frame).map(|view| view.to_owned())
    }

    /// Reply skeleton carrying the request's transaction id, unit id and
    /// function code, with no data
    pub fn copy_header(request: &AduView<'_>) -> Self {
        let mut bytes = BytesMut::with_capacity(ADU_HEADER_LEN + 4);
        bytes.extend_from_slice(&request.as_bytes()[..ADU_HEADER_LEN]);
        let mut adu = Self { bytes };
        adu.write_length();
        adu
    }

    /// Decode every complete frame of a stream.
    ///
    /// A stream shorter than one header is an error, as is a malformed length
    /// field in the first frame. A malformed frame later in the stream ends
    /// decoding and the frames before it are returned. A trailing partial frame
    /// is discarded; callers that need it should buffer with
    /// [`FrameAssembler`](crate::transport::FrameAssembler).
    pub fn decode(stream: &[u8]) -> ModbusResult<Vec<ModbusAdu>> {
        if stream.len() < ADU_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "stream of {} bytes is smaller than a Modbus ADU ({} bytes)",
                stream.len(),
                ADU_HEADER_LEN
            )));
        }

        let mut adus = Vec::new();
        let mut start = 0;
        loop {
            match frame_len(&stream[start..]) {
                Ok(Some(len)) => {
                    adus.push(Self::from_slice(&stream[start..start + len])?);
                    start += len;
                }
                Ok(None) => break,
                Err(e) if adus.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Dropping {} bytes after {} ADU(s): {}",
                        stream.len() - start,
                        adus.len(),
                        e
                    );
                    return Ok(adus);
                }
            }
        }

        if start < stream.len() {
            trace!(
                "Discarding {} trailing bytes of a partial ADU",
                stream.len() - start
            );
        }
        debug!("Decoded {} ADU(s) from {} bytes", adus.len(), stream.len());
        Ok(adus)
    }

    pub fn set_transaction_id(&mut self, tid: TransactionId) {
        self.bytes[TRANSACTION_ID_POS..TRANSACTION_ID_POS + 2].copy_from_slice(&tid.to_be_bytes());
    }

    pub fn set_unit_id(&mut self, uid: UnitId) {
        self.bytes[UNIT_ID_POS] = uid;
    }

    pub fn set_function_code(&mut self, fc: FunctionCode) {
        self.bytes[FUNCTION_CODE_POS] = fc.to_u8();
    }

    /// Replace the data field and recompute the length field
    pub fn set_data(&mut self, data: &[u8]) -> ModbusResult<()> {
        if data.len() > MAX_DATA_LEN {
            return Err(ModbusError::frame(format!(
                "data field of {} bytes exceeds {} bytes",
                data.len(),
                MAX_DATA_LEN
            )));
        }
        self.bytes.truncate(ADU_HEADER_LEN);
        self.bytes.extend_from_slice(data);
        self.write_length();
        Ok(())
    }

    /// Replace the data field with big-endian words
    pub fn set_words(&mut self, words: &[u16]) -> ModbusResult<()> {
        let data: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.set_data(&data)
    }

    fn write_length(&mut self) {
        let length = (self.bytes.len() - MBAP_PREFIX_LEN) as u16;
        self.bytes[LENGTH_FIELD_POS..LENGTH_FIELD_POS + 2].copy_from_slice(&length.to_be_bytes());
    }

    /// Borrow as a view
    pub fn view(&self) -> AduView<'_> {
        AduView { bytes: &self.bytes }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.view().transaction_id()
    }

    pub fn protocol_id(&self) -> u16 {
        self.view().protocol_id()
    }

    pub fn length_field(&self) -> u16 {
        self.view().length_field()
    }

    pub fn unit_id(&self) -> UnitId {
        self.view().unit_id()
    }

    pub fn raw_function_code(&self) -> u8 {
        self.view().raw_function_code()
    }

    pub fn function_code(&self) -> ModbusResult<FunctionCode> {
        self.view().function_code()
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[DATA_POS..]
    }

    /// Data byte `idx`, bounds-checked against the length field
    pub fn data_byte(&self, idx: usize) -> ModbusResult<u8> {
        self.view().data_byte(idx)
    }

    /// Total frame size
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false, a frame carries at least its header
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Freeze into an immutable buffer for sending
    pub fn freeze(self) -> Bytes {
        self.bytes.freeze()
    }
}

impl Default for ModbusAdu {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Borrowed view
// ============================================================================

/// Zero-copy view over one complete frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AduView<'a> {
    bytes: &'a [u8],
}

impl<'a> AduView<'a> {
    /// Wrap exactly one frame
    pub fn new(frame: &'a [u8]) -> ModbusResult<Self> {
        if frame.len() < ADU_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "Modbus ADU should be at least {} bytes, got {}",
                ADU_HEADER_LEN,
                frame.len()
            )));
        }
        match frame_len(frame)? {
            Some(len) if len == frame.len() => Ok(Self { bytes: frame }),
            _ => Err(ModbusError::frame(format!(
                "length field does not match frame of {} bytes",
                frame.len()
            ))),
        }
    }

    /// Iterate over the complete frames at the head of `stream`
    pub fn frames(stream: &'a [u8]) -> AduFrames<'a> {
        AduFrames { rest: stream }
    }

    pub fn transaction_id(&self) -> TransactionId {
        combine_u8(
            self.bytes[TRANSACTION_ID_POS],
            self.bytes[TRANSACTION_ID_POS + 1],
        )
    }

    pub fn protocol_id(&self) -> u16 {
        combine_u8(self.bytes[PROTOCOL_ID_POS], self.bytes[PROTOCOL_ID_POS + 1])
    }

    pub fn length_field(&self) -> u16 {
        combine_u8(self.bytes[LENGTH_FIELD_POS], self.bytes[LENGTH_FIELD_POS + 1])
    }

    pub fn unit_id(&self) -> UnitId {
        self.bytes[UNIT_ID_POS]
    }

    pub fn raw_function_code(&self) -> u8 {
        self.bytes[FUNCTION_CODE_POS]
    }

    pub fn function_code(&self) -> ModbusResult<FunctionCode> {
        FunctionCode::from_u8(self.raw_function_code())
    }

    pub fn data(&self) -> &'a [u8] {
        &self.bytes[DATA_POS..]
    }

    /// Number of data bytes declared by the length field
    pub fn data_len(&self) -> usize {
        self.length_field().saturating_sub(LENGTH_HEADER_BYTES) as usize
    }

    /// Data byte `idx`, bounds-checked against the length field
    pub fn data_byte(&self, idx: usize) -> ModbusResult<u8> {
        if idx >= self.data_len() {
            return Err(ModbusError::out_of_bounds(
                "ADU data byte",
                idx,
                self.data_len(),
            ));
        }
        Ok(self.bytes[DATA_POS + idx])
    }

    /// Big-endian word starting at data byte `idx`
    pub fn data_word(&self, idx: usize) -> ModbusResult<u16> {
        Ok(combine_u8(self.data_byte(idx)?, self.data_byte(idx + 1)?))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn to_owned(&self) -> ModbusAdu {
        ModbusAdu {
            bytes: BytesMut::from(self.bytes),
        }
    }
}

/// Iterator over complete frames of a stream; stops at a partial or malformed frame
#[derive(Debug, Clone)]
pub struct AduFrames<'a> {
    rest: &'a [u8],
}

impl<'a> AduFrames<'a> {
    /// Bytes not yet consumed
    pub fn remainder(&self) -> &'a [u8] {
        self.rest
    }
}

impl<'a> Iterator for AduFrames<'a> {
    type Item = AduView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = frame_len(self.rest).ok().flatten()?;
        if len < ADU_HEADER_LEN {
            return None;
        }
        let (frame, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(AduView { bytes: frame })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// ADU builder - fluent API
#[derive(Debug, Default)]
pub struct AduBuilder {
    tid: TransactionId,
    uid: UnitId,
    fc: Option<FunctionCode>,
    data: Vec<u8>,
}

impl AduBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_id(mut self, tid: TransactionId) -> Self {
        self.tid = tid;
        self
    }

    pub fn unit_id(mut self, uid: UnitId) -> Self {
        self.uid = uid;
        self
    }

    pub fn function(mut self, fc: FunctionCode) -> Self {
        self.fc = Some(fc);
        self
    }

    /// Append a byte
    pub fn byte(mut self, b: u8) -> Self {
        self.data.push(b);
        self
    }

    /// Append a big-endian word
    pub fn word(mut self, w: u16) -> Self {
        self.data.extend_from_slice(&w.to_be_bytes());
        self
    }

    /// Append raw bytes
    pub fn data(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Build the ADU; a function code is required
    pub fn build(self) -> ModbusResult<ModbusAdu> {
        let fc = self
            .fc
            .ok_or_else(|| ModbusError::invalid_data("ADU builder has no function code"))?;
        ModbusAdu::encode(self.tid, self.uid, fc, &self.data)
    }

    /// Read request `[start, count]` for FC01/02/04
    pub fn read_request(
        tid: TransactionId,
        uid: UnitId,
        fc: FunctionCode,
        start: u16,
        count: u16,
    ) -> ModbusResult<ModbusAdu> {
        if !fc.is_read() {
            return Err(ModbusError::invalid_function(fc.to_u8()));
        }
        Self::new()
            .transaction_id(tid)
            .unit_id(uid)
            .function(fc)
            .word(start)
            .word(count)
            .build()
    }

    /// Write single coil request `[address, 0xFF00 | 0x0000]`
    pub fn write_single_coil(
        tid: TransactionId,
        uid: UnitId,
        address: u16,
        value: u16,
    ) -> ModbusResult<ModbusAdu> {
        Self::new()
            .transaction_id(tid)
            .unit_id(uid)
            .function(FunctionCode::WriteSingleCoil)
            .word(address)
            .word(value)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_adu_header() {
        let adu = ModbusAdu::new();
        assert_eq!(adu.len(), 8);
        assert_eq!(adu.protocol_id(), 0);
        assert_eq!(adu.length_field(), 2);
        assert!(adu.data().is_empty());
    }

    #[test]
    fn test_encode_read_request_bytes() {
        let adu =
            ModbusAdu::encode_words(0x0102, 1, FunctionCode::ReadInputRegisters, &[0, 2]).unwrap();
        assert_eq!(
            adu.as_bytes(),
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x00, 0x00, 0x02]
        );
        assert_eq!(adu.length_field() as usize, adu.len() - 6);
    }

    #[test]
    fn test_set_data_recomputes_length() {
        let mut adu = ModbusAdu::encode(1, 1, FunctionCode::ReadCoils, &[1, 2, 3, 4]).unwrap();
        assert_eq!(adu.length_field(), 6);
        adu.set_data(&[0x01, 0x05]).unwrap();
        assert_eq!(adu.length_field(), 4);
        assert_eq!(adu.len(), 10);
        adu.set_data(&[]).unwrap();
        assert_eq!(adu.length_field(), 2);
    }

    #[test]
    fn test_oversized_data_rejected() {
        let mut adu = ModbusAdu::new();
        assert!(adu.set_data(&[0u8; MAX_DATA_LEN + 1]).is_err());
        assert!(adu.set_data(&[0u8; MAX_DATA_LEN]).is_ok());
    }

    #[test]
    fn test_decode_short_stream_is_fatal() {
        let err = ModbusAdu::decode(&[0, 1, 0, 0, 0, 2, 1]).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_concatenated() {
        let a = ModbusAdu::encode_words(1, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        let b = ModbusAdu::encode(2, 2, FunctionCode::ReadCoils, &[1, 0b11]).unwrap();
        let mut stream = a.as_bytes().to_vec();
        stream.extend_from_slice(b.as_bytes());

        let adus = ModbusAdu::decode(&stream).unwrap();
        assert_eq!(adus, vec![a, b]);
    }

    #[test]
    fn test_decode_discards_partial_tail() {
        let a = ModbusAdu::encode_words(7, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        let b = ModbusAdu::encode_words(8, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        let mut stream = a.as_bytes().to_vec();
        stream.extend_from_slice(&b.as_bytes()[..9]);

        let adus = ModbusAdu::decode(&stream).unwrap();
        assert_eq!(adus.len(), 1);
        assert_eq!(adus[0].transaction_id(), 7);
        assert_eq!(complete_len(&stream).unwrap(), a.len());
    }

    #[test]
    fn test_decode_rejects_bad_length_field() {
        let stream = [0, 1, 0, 0, 0, 1, 1, 1, 0];
        assert!(ModbusAdu::decode(&stream).is_err());
    }

    #[test]
    fn test_decode_keeps_frames_before_bad_length_field() {
        let a = ModbusAdu::encode(3, 1, FunctionCode::ReadCoils, &[0, 0, 0, 8]).unwrap();
        let b = ModbusAdu::encode(4, 1, FunctionCode::ReadCoils, &[0, 0, 0, 8]).unwrap();
        let mut stream = a.as_bytes().to_vec();
        stream.extend_from_slice(b.as_bytes());
        stream.extend_from_slice(&[0, 5, 0, 0, 0, 1, 1, 1, 0]);

        let adus = ModbusAdu::decode(&stream).unwrap();
        assert_eq!(adus.len(), 2);
        assert_eq!(adus[0].transaction_id(), 3);
        assert_eq!(adus[1].transaction_id(), 4);
    }

    #[test]
    fn test_data_byte_bounds() {
        let adu = ModbusAdu::encode(1, 1, FunctionCode::ReadCoils, &[1, 0xAA]).unwrap();
        assert_eq!(adu.data_byte(1).unwrap(), 0xAA);
        assert_eq!(
            adu.data_byte(2),
            Err(ModbusError::OutOfBounds {
                what: "ADU data byte",
                index: 2,
                size: 2
            })
        );
    }

    #[test]
    fn test_copy_header() {
        let request =
            ModbusAdu::encode_words(0x1234, 3, FunctionCode::ReadCoils, &[0, 8]).unwrap();
        let mut reply = ModbusAdu::copy_header(&request.view());
        assert_eq!(reply.length_field(), 2);
        reply.set_data(&[1, 0xF0]).unwrap();
        assert_eq!(reply.transaction_id(), 0x1234);
        assert_eq!(reply.unit_id(), 3);
        assert_eq!(reply.function_code().unwrap(), FunctionCode::ReadCoils);
        assert_eq!(reply.data(), &[1, 0xF0]);
    }

    #[test]
    fn test_view_iterator_remainder() {
        let a = ModbusAdu::encode_words(1, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        let mut stream = a.as_bytes().to_vec();
        stream.extend_from_slice(&[0, 2, 0, 0]);

        let mut frames = AduView::frames(&stream);
        assert_eq!(frames.next().unwrap().transaction_id(), 1);
        assert!(frames.next().is_none());
        assert_eq!(frames.remainder(), &[0, 2, 0, 0]);
    }

    #[test]
    fn test_builder() {
        let adu = AduBuilder::write_single_coil(9, 2, 0x0001, 0xFF00).unwrap();
        assert_eq!(
            adu.as_bytes(),
            &[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x02, 0x05, 0x00, 0x01, 0xFF, 0x00]
        );
        assert!(AduBuilder::new().byte(1).build().is_err());
        assert!(AduBuilder::read_request(1, 1, FunctionCode::WriteSingleCoil, 0, 1).is_err());
    }

    proptest! {
        #[test]
        fn prop_encode_decode_single(
            tid: u16,
            uid: u8,
            fc_idx in 0usize..4,
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let fc = [
                FunctionCode::ReadCoils,
                FunctionCode::ReadDiscreteInputs,
                FunctionCode::ReadInputRegisters,
                FunctionCode::WriteSingleCoil,
            ][fc_idx];
            let adu = ModbusAdu::encode(tid, uid, fc, &payload).unwrap();
            let decoded = ModbusAdu::decode(adu.as_bytes()).unwrap();
            prop_assert_eq!(decoded.len(), 1);
            prop_assert_eq!(decoded[0].transaction_id(), tid);
            prop_assert_eq!(decoded[0].unit_id(), uid);
            prop_assert_eq!(decoded[0].function_code().unwrap(), fc);
            prop_assert_eq!(decoded[0].data(), payload.as_slice());
        }
    }
}
