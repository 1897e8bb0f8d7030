//! Plant-wide physics scheduler
//!
//! The plant ticks every linked process, highest priority first, then runs every
//! PLC control routine, on a fixed interval that is independent of network
//! traffic. The harness owns the clock: it calls [`PlantScheduler::tick`] at
//! each returned deadline.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::config::PlantConfig;
use crate::error::ModbusResult;
use crate::process::{PhysicalProcess, PlcControl};
use crate::register::PlcIo;

/// Register files shared between a PLC server and the plant
pub type SharedIo = Rc<RefCell<PlcIo>>;

struct ProcessEntry {
    priority: u8,
    plc: String,
    io: SharedIo,
    process: Box<dyn PhysicalProcess>,
}

struct ControlEntry {
    plc: String,
    io: SharedIo,
    control: Box<dyn PlcControl>,
}

/// Priority-ordered physics and control scheduler
pub struct PlantScheduler {
    config: PlantConfig,
    processes: Vec<ProcessEntry>,
    controls: Vec<ControlEntry>,
    sorted: bool,
    step: Duration,
    ticks: u64,
}

impl PlantScheduler {
    pub fn new(config: PlantConfig) -> Self {
        Self {
            config,
            processes: Vec::new(),
            controls: Vec::new(),
            sorted: true,
            step: Duration::ZERO,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    /// Number of ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty() && self.controls.is_empty()
    }

    pub(crate) fn register_control(
        &mut self,
        plc: &str,
        io: SharedIo,
        control: Box<dyn PlcControl>,
    ) {
        debug!("Plant: registered control of '{}'", plc);
        self.controls.push(ControlEntry {
            plc: plc.to_string(),
            io,
            control,
        });
    }

    pub(crate) fn register_process(
        &mut self,
        plc: &str,
        io: SharedIo,
        process: Box<dyn PhysicalProcess>,
        priority: u8,
    ) {
        debug!("Plant: linked process to '{}' with priority {}", plc, priority);
        self.processes.push(ProcessEntry {
            priority,
            plc: plc.to_string(),
            io,
            process,
        });
        self.sorted = false;
    }

    /// Deadline of the first tick, `None` when nothing is registered
    pub fn first_deadline(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(self.step + self.config.tick_interval)
    }

    /// Advance every process, then run every control routine.
    ///
    /// Returns the next deadline (previous deadline plus the interval), or
    /// `None` once the horizon has passed or nothing is registered.
    pub fn tick(&mut self, now: Duration) -> ModbusResult<Option<Duration>> {
        if !self.sorted {
            self.processes
                .sort_by(|a, b| b.priority.cmp(&a.priority));
            self.sorted = true;
        }

        trace!("Plant tick {} at {:?}", self.ticks, now);

        for entry in &mut self.processes {
            let mut io = entry.io.borrow_mut();
            let PlcIo { inputs, outputs } = &mut *io;
            if let Err(e) = entry.process.advance(now, inputs, outputs) {
                error!("Process of '{}' failed: {}", entry.plc, e);
                return Err(e);
            }
        }

        for entry in &mut self.controls {
            let mut io = entry.io.borrow_mut();
            let PlcIo { inputs, outputs } = &mut *io;
            if let Err(e) = entry.control.update(inputs, outputs) {
                error!("Control of '{}' failed: {}", entry.plc, e);
                return Err(e);
            }
        }

        self.ticks += 1;
        if self.is_empty() {
            return Ok(None);
        }

        self.step = self.step.max(now) + self.config.tick_interval;
        match self.config.horizon {
            Some(horizon) if self.step > horizon => {
                debug!("Plant horizon {:?} reached", horizon);
                Ok(None)
            }
            _ => Ok(Some(self.step)),
        }
    }
}

impl Default for PlantScheduler {
    fn default() -> Self {
        Self::new(PlantConfig::default())
    }
}

impl std::fmt::Debug for PlantScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantScheduler")
            .field("config", &self.config)
            .field("processes", &self.processes.len())
            .field("controls", &self.controls.len())
            .field("step", &self.step)
            .field("ticks", &self.ticks)
            .finish()
    }
}
