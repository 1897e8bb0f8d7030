//! Arbitrary byte streams, split at arbitrary points, must never panic the
//! decoder. Well-formed streams must reassemble to the frames of a one-shot
//! decode.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_ics::adu::frame_len;
use voltage_ics::{AduView, FrameAssembler, ModbusAdu};

#[derive(Debug, Arbitrary)]
struct Input {
    stream: Vec<u8>,
    splits: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let _ = ModbusAdu::decode(&input.stream);

    let mut frames = AduView::frames(&input.stream);
    let whole: Vec<Vec<u8>> = frames.by_ref().map(|f| f.as_bytes().to_vec()).collect();
    let well_formed = frame_len(frames.remainder()).is_ok();

    let mut assembler = FrameAssembler::new();
    let mut pieces = Vec::new();
    let mut rest = &input.stream[..];
    for split in input.splits {
        let at = usize::from(split).min(rest.len());
        let (head, tail) = rest.split_at(at);
        pieces.extend(assembler.push(head));
        rest = tail;
    }
    pieces.extend(assembler.push(rest));

    if well_formed {
        assert_eq!(pieces.len(), whole.len());
        for (piece, frame) in pieces.iter().zip(&whole) {
            assert_eq!(&piece[..], &frame[..]);
        }
        assert_eq!(assembler.pending(), frames.remainder().len());
    }
});
