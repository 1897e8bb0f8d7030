//! PLC server application
//!
//! A PLC serves its two register files over Modbus-TCP. Network requests are
//! answered from the files as they stand; the files themselves change only on
//! plant ticks (process then control) and on coil writes.
//!
//! The application is transport-agnostic: a harness reports accepted
//! connections with [`PlcApplication::accept`], feeds received bytes to
//! [`PlcApplication::handle_receive`] and delivers whatever the application
//! pushes into its [`FrameSink`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::adu::AduView;
use crate::constants::MODBUS_TCP_PORT;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::plant::{PlantScheduler, SharedIo};
use crate::process::{PhysicalProcess, PlcControl};
use crate::register::PlcIo;
use crate::request::process_request;
use crate::transport::{FrameAssembler, FrameSink, LinkId, TransportStats};

/// Lifecycle of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    Serving,
}

/// Modbus-TCP server bound to a physical process
pub struct PlcApplication {
    name: String,
    address: Option<Ipv4Addr>,
    port: u16,
    io: SharedIo,
    state: ServerState,
    connections: BTreeMap<LinkId, FrameAssembler>,
    process_linked: bool,
    logger: Option<CallbackLogger>,
    stats: TransportStats,
}

impl PlcApplication {
    /// Create a PLC and register its control routine with the plant
    pub fn new<C>(name: &str, control: C, plant: &mut PlantScheduler) -> Self
    where
        C: PlcControl + 'static,
    {
        let io: SharedIo = Rc::new(RefCell::new(PlcIo::default()));
        plant.register_control(name, io.clone(), Box::new(control));
        Self {
            name: name.to_string(),
            address: None,
            port: MODBUS_TCP_PORT,
            io,
            state: ServerState::Stopped,
            connections: BTreeMap::new(),
            process_linked: false,
            logger: None,
            stats: TransportStats::new(),
        }
    }

    /// Attach a frame logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the listening port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind a physical process to this PLC's register files.
    ///
    /// A PLC drives at most one process; a second call fails with
    /// [`ModbusError::ProcessAlreadyLinked`].
    pub fn link_process<P>(
        &mut self,
        plant: &mut PlantScheduler,
        process: P,
        priority: u8,
    ) -> ModbusResult<()>
    where
        P: PhysicalProcess + 'static,
    {
        if self.process_linked {
            return Err(ModbusError::ProcessAlreadyLinked {
                plc: self.name.clone(),
            });
        }
        plant.register_process(&self.name, self.io.clone(), Box::new(process), priority);
        self.process_linked = true;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub(crate) fn set_address(&mut self, address: Ipv4Addr) {
        self.address = Some(address);
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn has_process(&self) -> bool {
        self.process_linked
    }

    /// Copy of both register files
    pub fn snapshot(&self) -> PlcIo {
        *self.io.borrow()
    }

    /// Shared handle on the register files
    pub fn io(&self) -> SharedIo {
        self.io.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Start listening
    pub fn start(&mut self) -> ModbusResult<()> {
        if self.state != ServerState::Stopped {
            return Err(ModbusError::invalid_state(&self.name, "PLC already started"));
        }
        self.state = ServerState::Listening;
        info!("PLC '{}' listening on port {}", self.name, self.port);
        Ok(())
    }

    /// Register an accepted connection
    pub fn accept(&mut self, link: LinkId) -> ModbusResult<()> {
        if self.state == ServerState::Stopped {
            return Err(ModbusError::invalid_state(
                &self.name,
                "cannot accept while stopped",
            ));
        }
        self.connections.insert(link, FrameAssembler::new());
        self.state = ServerState::Serving;
        debug!("PLC '{}' accepted link {}", self.name, link);
        Ok(())
    }

    /// Forget a closed connection
    pub fn close(&mut self, link: LinkId) {
        if self.connections.remove(&link).is_some() {
            debug!("PLC '{}' closed link {}", self.name, link);
        }
        if self.connections.is_empty() && self.state == ServerState::Serving {
            self.state = ServerState::Listening;
        }
    }

    /// Close every connection and stop listening
    pub fn stop(&mut self) {
        self.connections.clear();
        self.state = ServerState::Stopped;
        info!("PLC '{}' stopped", self.name);
    }

    /// Process bytes received on `link` and reply on the same link.
    ///
    /// Requests the PLC does not serve are logged and dropped. Only fatal
    /// errors are returned.
    pub fn handle_receive<S>(&mut self, link: LinkId, bytes: &[u8], sink: &mut S) -> ModbusResult<()>
    where
        S: FrameSink + ?Sized,
    {
        if self.state != ServerState::Serving {
            debug!("PLC '{}' not serving, dropping {} bytes", self.name, bytes.len());
            return Ok(());
        }
        let Some(assembler) = self.connections.get_mut(&link) else {
            warn!("PLC '{}' received bytes on unknown link {}", self.name, link);
            return Ok(());
        };

        self.stats.record_bytes_received(bytes.len());
        if let Some(ref logger) = self.logger {
            logger.log_frame(&self.name, "rx", bytes);
        }

        for frame in assembler.push(bytes) {
            self.stats.record_frame_received();
            let request = match AduView::new(&frame) {
                Ok(view) => view,
                Err(e) => {
                    warn!("PLC '{}' dropping frame: {}", self.name, e);
                    self.stats.record_dropped();
                    continue;
                }
            };
            if let Some(ref logger) = self.logger {
                logger.log_request(&self.name, link, &request);
            }

            let reply = {
                let mut io = self.io.borrow_mut();
                process_request(&request, &mut io)
            };

            match reply {
                Ok(Some(reply)) => {
                    if let Some(ref logger) = self.logger {
                        logger.log_response(&self.name, link, &reply.view());
                    }
                    self.stats.record_sent(reply.len());
                    sink.send(link, reply.freeze())?;
                }
                Ok(None) => self.stats.record_dropped(),
                Err(e) if !e.is_fatal() => {
                    debug!("PLC '{}' skipping request: {}", self.name, e);
                    self.stats.record_dropped();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PlcApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlcApplication")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("connections", &self.connections.len())
            .field("process_linked", &self.process_linked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adu::ModbusAdu;
    use crate::constants::COIL_ON;
    use crate::process::NoControl;
    use crate::protocol::FunctionCode;
    use crate::register::PlcState;
    use bytes::Bytes;
    use std::time::Duration;

    struct Constant;

    impl PhysicalProcess for Constant {
        fn advance(
            &mut self,
            _now: Duration,
            inputs: &mut PlcState,
            _outputs: &PlcState,
        ) -> ModbusResult<()> {
            inputs.set_analog_raw(0, 0x0102)
        }
    }

    fn serving_plc(plant: &mut PlantScheduler) -> PlcApplication {
        let mut plc = PlcApplication::new("plc1", NoControl, plant);
        plc.start().unwrap();
        plc.accept(0).unwrap();
        plc
    }

    #[test]
    fn test_lifecycle() {
        let mut plant = PlantScheduler::default();
        let mut plc = PlcApplication::new("plc1", NoControl, &mut plant);
        assert_eq!(plc.state(), ServerState::Stopped);
        assert!(plc.accept(0).is_err());
        plc.start().unwrap();
        assert_eq!(plc.state(), ServerState::Listening);
        plc.accept(3).unwrap();
        assert_eq!(plc.state(), ServerState::Serving);
        plc.close(3);
        assert_eq!(plc.state(), ServerState::Listening);
        plc.stop();
        assert_eq!(plc.state(), ServerState::Stopped);
        assert_eq!(plant.control_count(), 1);
    }

    #[test]
    fn test_relink_is_fatal() {
        let mut plant = PlantScheduler::default();
        let mut plc = PlcApplication::new("plc1", NoControl, &mut plant);
        plc.link_process(&mut plant, Constant, 1).unwrap();
        let err = plc.link_process(&mut plant, Constant, 1).unwrap_err();
        assert_eq!(err, ModbusError::ProcessAlreadyLinked { plc: "plc1".into() });
        assert!(err.is_fatal());
        assert_eq!(plant.process_count(), 1);
    }

    #[test]
    fn test_serves_inputs_after_tick() {
        let mut plant = PlantScheduler::default();
        let mut plc = serving_plc(&mut plant);
        plc.link_process(&mut plant, Constant, 0).unwrap();
        plant.tick(Duration::from_millis(50)).unwrap();

        let request =
            ModbusAdu::encode_words(1, 1, FunctionCode::ReadInputRegisters, &[0, 1]).unwrap();
        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();
        plc.handle_receive(0, request.as_bytes(), &mut sink).unwrap();

        assert_eq!(sink.len(), 1);
        let reply = ModbusAdu::from_slice(&sink[0].1).unwrap();
        assert_eq!(reply.data(), &[2, 0x01, 0x02]);
    }

    #[test]
    fn test_coil_write_lands_in_outputs() {
        let mut plant = PlantScheduler::default();
        let mut plc = serving_plc(&mut plant);
        let request =
            ModbusAdu::encode_words(4, 1, FunctionCode::WriteSingleCoil, &[1, COIL_ON]).unwrap();
        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();
        plc.handle_receive(0, request.as_bytes(), &mut sink).unwrap();

        assert_eq!(&sink[0].1[..], request.as_bytes());
        let io = plc.snapshot();
        assert!(io.outputs.digital(1).unwrap());
        assert!(!io.inputs.digital(1).unwrap());
    }

    #[test]
    fn test_split_request_answered_once_complete() {
        let mut plant = PlantScheduler::default();
        let mut plc = serving_plc(&mut plant);
        let request = ModbusAdu::encode_words(2, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();

        plc.handle_receive(0, &request.as_bytes()[..7], &mut sink).unwrap();
        assert!(sink.is_empty());
        plc.handle_receive(0, &request.as_bytes()[7..], &mut sink).unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_unknown_function_skipped() {
        let mut plant = PlantScheduler::default();
        let mut plc = serving_plc(&mut plant);
        let mut raw = ModbusAdu::encode_words(2, 1, FunctionCode::ReadCoils, &[0, 2])
            .unwrap()
            .as_bytes()
            .to_vec();
        raw[7] = 0x10;
        let good = ModbusAdu::encode_words(3, 1, FunctionCode::ReadCoils, &[0, 2]).unwrap();
        raw.extend_from_slice(good.as_bytes());

        let mut sink: Vec<(LinkId, Bytes)> = Vec::new();
        plc.handle_receive(0, &raw, &mut sink).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(ModbusAdu::from_slice(&sink[0].1).unwrap().transaction_id(), 3);
        assert_eq!(plc.stats().frames_dropped, 1);
    }

    #[test]
    fn test_no_process_leaves_inputs_untouched() {
        let mut plant = PlantScheduler::default();
        let plc = PlcApplication::new("plc1", NoControl, &mut plant);
        plant.tick(Duration::from_millis(50)).unwrap();
        assert_eq!(plc.snapshot().inputs, PlcState::new());
    }
}
