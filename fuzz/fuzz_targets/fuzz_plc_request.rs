//! Arbitrary requests against a PLC register file must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_ics::{process_request, AduView, PlcIo};

fuzz_target!(|data: &[u8]| {
    let mut io = PlcIo::default();
    for request in AduView::frames(data) {
        if let Ok(Some(reply)) = process_request(&request, &mut io) {
            assert!(AduView::new(reply.as_bytes()).is_ok());
        }
    }
});
