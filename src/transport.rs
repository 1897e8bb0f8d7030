//! Transport seam between the protocol state machines and a network
//!
//! The applications never own sockets. They push replies and requests through a
//! [`FrameSink`] and receive raw bytes from whichever harness drives them. Each
//! connection is identified by a [`LinkId`] allocated by that harness.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::adu::frame_len;
use crate::error::{ModbusError, ModbusResult};

/// Harness-assigned connection identifier
pub type LinkId = usize;

/// Outbound side of the network
pub trait FrameSink {
    /// Queue one encoded frame on a link
    fn send(&mut self, link: LinkId, frame: Bytes) -> ModbusResult<()>;
}

/// Collects frames in order, used by the discrete-event harness and by tests
impl FrameSink for Vec<(LinkId, Bytes)> {
    fn send(&mut self, link: LinkId, frame: Bytes) -> ModbusResult<()> {
        self.push((link, frame));
        Ok(())
    }
}

/// Hands frames to per-connection writer tasks
impl FrameSink for HashMap<LinkId, UnboundedSender<Bytes>> {
    fn send(&mut self, link: LinkId, frame: Bytes) -> ModbusResult<()> {
        let tx = self
            .get(&link)
            .ok_or_else(|| ModbusError::connection(format!("link {} is not open", link)))?;
        tx.send(frame)
            .map_err(|_| ModbusError::connection(format!("link {} writer has stopped", link)))
    }
}

/// Reassembles frames split across reads.
///
/// Bytes are appended as they arrive; every complete frame at the head of the
/// buffer is split off. A malformed length field discards the buffer, since the
/// stream can no longer be resynchronised.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every frame they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match frame_len(&self.buf) {
                Ok(Some(len)) => frames.push(self.buf.split_to(len).freeze()),
                Ok(None) => break,
                Err(e) => {
                    warn!("Dropping {} buffered bytes: {}", self.buf.len(), e);
                    self.buf.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Bytes held for an incomplete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Traffic counters kept by each application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames handed to the sink
    pub frames_sent: u64,
    /// Complete frames received
    pub frames_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Frames received but not acted on
    pub frames_dropped: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame handed to the sink
    pub fn record_sent(&mut self, len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
    }

    /// Record raw bytes read from a link
    pub fn record_bytes_received(&mut self, len: usize) {
        self.bytes_received += len as u64;
    }

    /// Record a complete frame
    pub fn record_frame_received(&mut self) {
        self.frames_received += 1;
    }

    /// Record a frame that was dropped
    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }
}
