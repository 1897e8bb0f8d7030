//! SCADA polling client
//!
//! The SCADA knows its RTUs by address and its variables by name. Variables are
//! folded into one coalesced [`ReadCommand`] per RTU and function code, so a
//! poll cycle sends the fewest requests that cover every variable.
//!
//! # Completion barrier
//!
//! Every read sent is recorded as outstanding under its RTU and function code;
//! the reply carrying the same transaction id on that RTU's link clears it.
//! The control routine runs only after a receive pass that processed at least
//! one read reply left nothing outstanding. Writes requested by the control
//! routine are sent right after it returns.
//!
//! A read that is never answered is resolved as absent: when the next cycle
//! starts, or when its RTU is detached. If that empties the barrier the control
//! routine runs before the next batch goes out.
//!
//! ```text
//! read_cycle ──► stale reads dropped ──► control.update (if resolved)
//!            ──► N requests (pending = N)
//! handle_receive ──► matching replies decoded (pending -= 1 each)
//!                    pending == 0 ──► control.update ──► flush writes
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adu::AduView;
use crate::command::{ReadCommand, WriteCommand};
use crate::config::ScadaConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::process::{queue_writes, ScadaContext, ScadaControl};
use crate::protocol::{FunctionCode, TransactionId, UnitId};
use crate::response::process_response;
use crate::transport::{FrameAssembler, FrameSink, LinkId, TransportStats};
use crate::variable::{Var, VarType};

/// Lifecycle of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Stopped,
    /// Waiting for every RTU connection
    Connecting,
    Polling,
}

#[derive(Debug)]
struct Rtu {
    address: Ipv4Addr,
    link: Option<LinkId>,
    commands: BTreeMap<FunctionCode, ReadCommand>,
    assembler: FrameAssembler,
}

impl Rtu {
    fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            link: None,
            commands: BTreeMap::new(),
            assembler: FrameAssembler::new(),
        }
    }
}

/// Modbus-TCP polling client with user supervisory logic
pub struct ScadaApplication {
    name: String,
    config: ScadaConfig,
    control: Box<dyn ScadaControl>,
    rtus: Vec<Rtu>,
    vars: BTreeMap<String, Var>,
    write_queue: Vec<WriteCommand>,
    state: ClientState,
    transaction_id: TransactionId,
    outstanding: BTreeMap<(usize, FunctionCode), TransactionId>,
    resolved: bool,
    control_runs: u64,
    logger: Option<CallbackLogger>,
    stats: TransportStats,
}

impl ScadaApplication {
    pub fn new<C>(name: &str, control: C, config: ScadaConfig) -> Self
    where
        C: ScadaControl + 'static,
    {
        Self {
            name: name.to_string(),
            config,
            control: Box::new(control),
            rtus: Vec::new(),
            vars: BTreeMap::new(),
            write_queue: Vec::new(),
            state: ClientState::Stopped,
            transaction_id: 0,
            outstanding: BTreeMap::new(),
            resolved: false,
            control_runs: 0,
            logger: None,
            stats: TransportStats::new(),
        }
    }

    /// Attach a frame logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Register an RTU; its unit id is its 1-based registration index
    pub fn add_rtu(&mut self, address: Ipv4Addr) -> usize {
        if let Some(idx) = self.rtus.iter().position(|rtu| rtu.address == address) {
            warn!("SCADA '{}': RTU {} already registered", self.name, address);
            return idx;
        }
        self.rtus.push(Rtu::new(address));
        self.rtus.len() - 1
    }

    /// Index of a registered RTU
    pub fn rtu_index(&self, address: Ipv4Addr) -> ModbusResult<usize> {
        self.rtus
            .iter()
            .position(|rtu| rtu.address == address)
            .ok_or_else(|| ModbusError::UnknownRtu {
                scada: self.name.clone(),
                address: address.to_string(),
            })
    }

    /// Register a named variable on an RTU and widen that RTU's read range.
    ///
    /// Duplicate names are logged and ignored. An unregistered RTU is a fatal
    /// [`ModbusError::UnknownRtu`].
    pub fn add_variable(
        &mut self,
        rtu: Ipv4Addr,
        name: &str,
        var_type: VarType,
        position: u8,
    ) -> ModbusResult<()> {
        let idx = self.rtu_index(rtu)?;
        if self.vars.contains_key(name) {
            warn!(
                "SCADA '{}': variable '{}' already defined, ignoring",
                self.name, name
            );
            return Ok(());
        }

        let uid = UnitId::try_from(idx + 1).map_err(|_| {
            ModbusError::configuration(format!("SCADA '{}' has too many RTUs", self.name))
        })?;
        let var = Var::new(name, var_type, position, uid)?;
        self.vars.insert(name.to_string(), var);

        if let Some(fc) = var_type.read_function() {
            self.rtus[idx]
                .commands
                .entry(fc)
                .or_insert_with(|| ReadCommand::new(fc))
                .set_read_count(position);
        }
        Ok(())
    }

    /// Register a variable that lives only in the SCADA
    pub fn add_local(&mut self, name: &str, value: u16) {
        if self.vars.contains_key(name) {
            warn!(
                "SCADA '{}': variable '{}' already defined, ignoring",
                self.name, name
            );
            return;
        }
        self.vars.insert(name.to_string(), Var::local(value));
    }

    /// Request coil writes; see [`queue_writes`]
    pub fn write<'n, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'n str, u16)>,
    {
        queue_writes(&mut self.vars, &mut self.write_queue, values);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn peer_port(&self) -> u16 {
        self.config.peer_port
    }

    pub fn rtu_addresses(&self) -> Vec<Ipv4Addr> {
        self.rtus.iter().map(|rtu| rtu.address).collect()
    }

    /// Coalesced read of an RTU for a function code
    pub fn read_command(&self, rtu: usize, fc: FunctionCode) -> Option<&ReadCommand> {
        self.rtus.get(rtu)?.commands.get(&fc)
    }

    pub fn var(&self, name: &str) -> Option<&Var> {
        self.vars.get(name)
    }

    pub fn value(&self, name: &str) -> Option<u16> {
        self.vars.get(name).map(Var::value)
    }

    pub fn vars(&self) -> &BTreeMap<String, Var> {
        &self.vars
    }

    pub fn queued_writes(&self) -> &[WriteCommand] {
        &self.write_queue
    }

    /// Read replies still outstanding
    pub fn pending(&self) -> u32 {
        self.outstanding.len() as u32
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Number of times the control routine has run
    pub fn control_runs(&self) -> u64 {
        self.control_runs
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Request one connection per RTU
    pub fn start(&mut self) {
        if self.state != ClientState::Stopped {
            warn!("SCADA '{}' was started twice", self.name);
            return;
        }
        self.state = if self.rtus.is_empty() {
            ClientState::Polling
        } else {
            ClientState::Connecting
        };
        info!(
            "SCADA '{}' connecting to {} RTU(s)",
            self.name,
            self.rtus.len()
        );
    }

    /// Bind RTU `rtu` to an established connection
    pub fn attach(&mut self, rtu: usize, link: LinkId) -> ModbusResult<()> {
        let count = self.rtus.len();
        let entry = self
            .rtus
            .get_mut(rtu)
            .ok_or_else(|| ModbusError::out_of_bounds("RTU", rtu, count))?;
        entry.link = Some(link);
        entry.assembler.clear();
        debug!("SCADA '{}': RTU {} on link {}", self.name, entry.address, link);

        if self.state == ClientState::Connecting && self.rtus.iter().all(|r| r.link.is_some()) {
            self.state = ClientState::Polling;
            info!("SCADA '{}' polling", self.name);
        }
        Ok(())
    }

    /// Forget a closed connection. Reads still outstanding on it are resolved
    /// as absent.
    pub fn detach(&mut self, link: LinkId) {
        let before = self.outstanding.len();
        for (idx, rtu) in self.rtus.iter_mut().enumerate() {
            if rtu.link != Some(link) {
                continue;
            }
            rtu.link = None;
            rtu.assembler.clear();
            self.outstanding.retain(|&(rtu_idx, _), _| rtu_idx != idx);
        }
        if self.outstanding.len() < before {
            debug!(
                "SCADA '{}': {} read(s) on link {} resolved as absent",
                self.name,
                before - self.outstanding.len(),
                link
            );
            if self.outstanding.is_empty() {
                self.resolved = true;
            }
        }
    }

    /// Close every connection and drop in-flight state
    pub fn stop(&mut self) {
        for rtu in &mut self.rtus {
            rtu.link = None;
            rtu.assembler.clear();
        }
        self.outstanding.clear();
        self.resolved = false;
        self.state = ClientState::Stopped;
        info!("SCADA '{}' stopped", self.name);
    }

    fn next_transaction_id(&mut self) -> TransactionId {
        let tid = self.transaction_id;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        tid
    }

    /// Send every coalesced read. Returns the number of requests sent.
    ///
    /// Reads of the previous cycle that are still unanswered are resolved as
    /// absent first; if that completes the cycle, the control routine runs
    /// before the new requests are sent.
    pub fn read_cycle<S>(&mut self, sink: &mut S) -> ModbusResult<usize>
    where
        S: FrameSink + ?Sized,
    {
        if self.state != ClientState::Polling {
            debug!("SCADA '{}' not polling, skipping read cycle", self.name);
            return Ok(0);
        }

        if !self.outstanding.is_empty() {
            debug!(
                "SCADA '{}': {} read(s) unanswered, resolving as absent",
                self.name,
                self.outstanding.len()
            );
            self.outstanding.clear();
            self.resolved = true;
        }
        if std::mem::take(&mut self.resolved) {
            self.run_control(sink)?;
        }

        let mut sent = 0;
        for (idx, rtu) in self.rtus.iter().enumerate() {
            let Some(link) = rtu.link else {
                continue;
            };
            let uid = (idx + 1) as UnitId;
            for command in rtu.commands.values() {
                let tid = self.transaction_id;
                self.transaction_id = self.transaction_id.wrapping_add(1);
                let adu = command.execute(sink, link, tid, uid)?;
                if let Some(ref logger) = self.logger {
                    logger.log_request(&self.name, link, &adu.view());
                }
                self.stats.record_sent(adu.len());
                self.outstanding.insert((idx, command.function()), tid);
                sent += 1;
            }
        }
        debug!(
            "SCADA '{}' sent {} read(s), {} pending",
            self.name,
            sent,
            self.outstanding.len()
        );
        Ok(sent)
    }

    /// Decode replies received on `link`, then run the control routine if the
    /// cycle is complete.
    ///
    /// Replies are accepted only from the RTU that owns `link`. A read reply
    /// must carry the transaction id of that RTU's outstanding read of the same
    /// function code; anything else is dropped without touching the barrier.
    pub fn handle_receive<S>(&mut self, link: LinkId, bytes: &[u8], sink: &mut S) -> ModbusResult<()>
    where
        S: FrameSink + ?Sized,
    {
        let Some(idx) = self.rtus.iter().position(|rtu| rtu.link == Some(link)) else {
            warn!("SCADA '{}' received bytes on unknown link {}", self.name, link);
            return Ok(());
        };
        let frames = self.rtus[idx].assembler.push(bytes);
        self.stats.record_bytes_received(bytes.len());

        let mut do_update = false;
        for frame in frames {
            self.stats.record_frame_received();
            let reply = match AduView::new(&frame) {
                Ok(view) => view,
                Err(e) => {
                    warn!("SCADA '{}' dropping frame: {}", self.name, e);
                    self.stats.record_dropped();
                    continue;
                }
            };
            if let Some(ref logger) = self.logger {
                logger.log_response(&self.name, link, &reply);
            }

            let fc = match reply.function_code() {
                Ok(fc) => fc,
                Err(e) => {
                    debug!("SCADA '{}' skipping reply: {}", self.name, e);
                    self.stats.record_dropped();
                    continue;
                }
            };
            let uid = reply.unit_id();
            if usize::from(uid) != idx + 1 {
                debug!(
                    "SCADA '{}': reply from unit {} on the link of unit {}",
                    self.name,
                    uid,
                    idx + 1
                );
                self.stats.record_dropped();
                continue;
            }

            let start = if fc.is_read() {
                let key = (idx, fc);
                let start = self.rtus[idx].commands.get(&fc).map(ReadCommand::start);
                match (self.outstanding.get(&key), start) {
                    (Some(&tid), Some(start)) if tid == reply.transaction_id() => {
                        self.outstanding.remove(&key);
                        do_update = true;
                        start
                    }
                    _ => {
                        debug!(
                            "SCADA '{}': unexpected {} reply (tid {}) from unit {}",
                            self.name,
                            fc,
                            reply.transaction_id(),
                            uid
                        );
                        self.stats.record_dropped();
                        continue;
                    }
                }
            } else {
                0
            };

            let var_type = VarType::from_function(fc);
            let mut vars: Vec<&mut Var> = self
                .vars
                .values_mut()
                .filter(|var| var.var_type() == var_type && var.unit_id() == uid)
                .collect();
            match process_response(&reply, &mut vars, start) {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => debug!("SCADA '{}' reply skipped: {}", self.name, e),
                Err(e) => return Err(e),
            }
        }

        if do_update && self.outstanding.is_empty() {
            self.run_control(sink)?;
        }
        Ok(())
    }

    /// Run the control routine, then send and clear the write queue
    fn run_control<S>(&mut self, sink: &mut S) -> ModbusResult<()>
    where
        S: FrameSink + ?Sized,
    {
        {
            let mut ctx = ScadaContext::new(&mut self.vars, &mut self.write_queue);
            self.control.update(&mut ctx)?;
        }
        self.control_runs += 1;

        let mut queue = std::mem::take(&mut self.write_queue).into_iter();
        while let Some(command) = queue.next() {
            let link = usize::from(command.unit_id())
                .checked_sub(1)
                .and_then(|idx| self.rtus.get(idx))
                .and_then(|rtu| rtu.link);
            let Some(link) = link else {
                warn!(
                    "SCADA '{}': unit {} not connected, dropping write",
                    self.name,
                    command.unit_id()
                );
                self.cancel_write(&command);
                continue;
            };
            let tid = self.next_transaction_id();
            let adu = match command.execute(sink, link, tid) {
                Ok(adu) => adu,
                Err(e) if e.is_fatal() => {
                    self.cancel_write(&command);
                    for rest in queue {
                        self.cancel_write(&rest);
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "SCADA '{}' write to unit {} failed: {}",
                        self.name,
                        command.unit_id(),
                        e
                    );
                    self.cancel_write(&command);
                    continue;
                }
            };
            if let Some(ref logger) = self.logger {
                logger.log_request(&self.name, link, &adu.view());
            }
            self.stats.record_sent(adu.len());
        }
        Ok(())
    }

    /// Withdraw the proposal behind a write that was not sent
    fn cancel_write(&mut self, command: &WriteCommand) {
        for var in self.vars.values_mut().filter(|var| {
            var.var_type() == VarType::Coil
                && var.unit_id() == command.unit_id()
                && u16::from(var.position()) == command.address()
        }) {
            var.cancel_proposal();
        }
    }
}

impl fmt::Debug for ScadaApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScadaApplication")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("rtus", &self.rtus.len())
            .field("vars", &self.vars.len())
            .field("pending", &self.outstanding.len())
            .finish()
    }
}
