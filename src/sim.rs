//! Discrete-event simulation harness
//!
//! Runs PLCs, SCADAs and the plant on a virtual clock. Frames travel over
//! in-memory links with a fixed latency. Events at the same instant run in the
//! order they were scheduled, so every run is reproducible.
//!
//! ```rust
//! use std::time::Duration;
//! use voltage_ics::models::{TankController, WaterTank};
//! use voltage_ics::{
//!     NoScadaControl, PlantScheduler, PlcApplication, ScadaApplication, ScadaConfig,
//!     SimConfig, Simulation, VarType,
//! };
//!
//! # fn main() -> voltage_ics::ModbusResult<()> {
//! let mut plant = PlantScheduler::default();
//! let mut plc = PlcApplication::new("wt", TankController::default(), &mut plant);
//! plc.link_process(&mut plant, WaterTank::with_level(0.1), 1)?;
//!
//! let mut sim = Simulation::new(SimConfig::default(), plant)?;
//! let wt = sim.add_plc(plc)?;
//! let address = sim.plc_address(wt).unwrap();
//!
//! let mut scada = ScadaApplication::new("scada", NoScadaControl, ScadaConfig::default());
//! scada.add_rtu(address);
//! scada.add_variable(address, "pump", VarType::Coil, WaterTank::PUMP_POS)?;
//! let scada = sim.add_scada(scada);
//!
//! sim.run_until(Duration::from_millis(600))?;
//! assert_eq!(sim.scada(scada).unwrap().value("pump"), Some(1));
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info};

use crate::config::{host_address, SimConfig};
use crate::error::{ModbusError, ModbusResult};
use crate::plant::PlantScheduler;
use crate::plc::PlcApplication;
use crate::scada::ScadaApplication;
use crate::transport::LinkId;

/// Index of a PLC in a harness
pub type PlcId = usize;

/// Index of a SCADA in a harness
pub type ScadaId = usize;

/// One end of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Plc(PlcId),
    Scada(ScadaId),
}

#[derive(Debug, Clone, Copy)]
struct Link {
    plc: PlcId,
    scada: ScadaId,
}

#[derive(Debug)]
enum Event {
    PlantTick,
    PollCycle { scada: ScadaId },
    Deliver { link: LinkId, to: Endpoint, frame: Bytes },
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap pops the earliest event first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Virtual-time harness owning the plant and every application
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    plant: PlantScheduler,
    plcs: Vec<PlcApplication>,
    scadas: Vec<ScadaApplication>,
    links: Vec<Link>,
    queue: BinaryHeap<Scheduled>,
    seq: u64,
    now: Duration,
    started: bool,
}

impl Simulation {
    pub fn new(config: SimConfig, plant: PlantScheduler) -> ModbusResult<Self> {
        config.validate()?;
        plant.config().validate()?;
        Ok(Self {
            config,
            plant,
            plcs: Vec::new(),
            scadas: Vec::new(),
            links: Vec::new(),
            queue: BinaryHeap::new(),
            seq: 0,
            now: Duration::ZERO,
            started: false,
        })
    }

    /// Add a PLC and assign it the next free address of the network
    pub fn add_plc(&mut self, mut plc: PlcApplication) -> ModbusResult<PlcId> {
        let id = self.plcs.len();
        let address = host_address(self.config.network, self.config.prefix_len, id as u32 + 1)?;
        plc.set_address(address);
        info!("PLC '{}' at {}", plc.name(), address);
        self.plcs.push(plc);
        Ok(id)
    }

    pub fn plc_address(&self, id: PlcId) -> Option<Ipv4Addr> {
        self.plcs.get(id)?.address()
    }

    pub fn add_scada(&mut self, scada: ScadaApplication) -> ScadaId {
        self.scadas.push(scada);
        self.scadas.len() - 1
    }

    pub fn plc(&self, id: PlcId) -> Option<&PlcApplication> {
        self.plcs.get(id)
    }

    pub fn plc_mut(&mut self, id: PlcId) -> Option<&mut PlcApplication> {
        self.plcs.get_mut(id)
    }

    pub fn scada(&self, id: ScadaId) -> Option<&ScadaApplication> {
        self.scadas.get(id)
    }

    pub fn scada_mut(&mut self, id: ScadaId) -> Option<&mut ScadaApplication> {
        self.scadas.get_mut(id)
    }

    pub fn plant(&self) -> &PlantScheduler {
        &self.plant
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        self.queue.push(Scheduled {
            at,
            seq: self.seq,
            event,
        });
        self.seq += 1;
    }

    /// Start every application and connect each SCADA to its RTUs
    pub fn start(&mut self) -> ModbusResult<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        for plc in &mut self.plcs {
            plc.start()?;
        }

        for scada_id in 0..self.scadas.len() {
            let scada = &mut self.scadas[scada_id];
            scada.start();
            for (rtu, address) in scada.rtu_addresses().into_iter().enumerate() {
                let plc_id = self
                    .plcs
                    .iter()
                    .position(|plc| plc.address() == Some(address))
                    .ok_or_else(|| {
                        ModbusError::connection(format!(
                            "SCADA '{}': no PLC at {}",
                            scada.name(),
                            address
                        ))
                    })?;
                let link = self.links.len();
                self.links.push(Link {
                    plc: plc_id,
                    scada: scada_id,
                });
                self.plcs[plc_id].accept(link)?;
                scada.attach(rtu, link)?;
            }
        }

        for scada in 0..self.scadas.len() {
            self.schedule(Duration::ZERO, Event::PollCycle { scada });
        }
        if let Some(first) = self.plant.first_deadline() {
            self.schedule(first, Event::PlantTick);
        }
        Ok(())
    }

    /// Run to the configured horizon
    pub fn run(&mut self) -> ModbusResult<()> {
        self.run_until(self.config.horizon)?;
        self.stop();
        Ok(())
    }

    /// Process every event up to `until` (capped at the horizon)
    pub fn run_until(&mut self, until: Duration) -> ModbusResult<()> {
        self.start()?;
        let limit = until.min(self.config.horizon);

        while self.queue.peek().is_some_and(|next| next.at <= limit) {
            let Some(Scheduled { at, event, .. }) = self.queue.pop() else {
                break;
            };
            self.now = at;
            self.dispatch(event)?;
        }
        self.now = self.now.max(limit);
        Ok(())
    }

    /// Stop every application and drop pending events
    pub fn stop(&mut self) {
        for plc in &mut self.plcs {
            plc.stop();
        }
        for scada in &mut self.scadas {
            scada.stop();
        }
        self.queue.clear();
        debug!("Simulation stopped at {:?}", self.now);
    }

    fn dispatch(&mut self, event: Event) -> ModbusResult<()> {
        match event {
            Event::PlantTick => {
                if let Some(next) = self.plant.tick(self.now)? {
                    self.schedule(next, Event::PlantTick);
                }
            }
            Event::PollCycle { scada } => {
                let mut out = Vec::new();
                let app = &mut self.scadas[scada];
                if let Err(e) = app.read_cycle(&mut out) {
                    error!("SCADA '{}' failed: {}", app.name(), e);
                    return Err(e);
                }
                let next = self.now + app.poll_interval();
                self.route(Endpoint::Scada(scada), out);
                if next < self.config.horizon {
                    self.schedule(next, Event::PollCycle { scada });
                }
            }
            Event::Deliver { link, to, frame } => {
                let mut out = Vec::new();
                let result = match to {
                    Endpoint::Plc(id) => self.plcs[id].handle_receive(link, &frame, &mut out),
                    Endpoint::Scada(id) => self.scadas[id].handle_receive(link, &frame, &mut out),
                };
                if let Err(e) = result {
                    error!("{:?} failed on link {}: {}", to, link, e);
                    return Err(e);
                }
                self.route(to, out);
            }
        }
        Ok(())
    }

    fn route(&mut self, from: Endpoint, frames: Vec<(LinkId, Bytes)>) {
        let at = self.now + self.config.link_latency;
        for (link, frame) in frames {
            let Some(&Link { plc, scada }) = self.links.get(link) else {
                debug!("Dropping frame for unknown link {}", link);
                continue;
            };
            let to = match from {
                Endpoint::Plc(_) => Endpoint::Scada(scada),
                Endpoint::Scada(_) => Endpoint::Plc(plc),
            };
            self.schedule(at, Event::Deliver { link, to, frame });
        }
    }
}
