//! # Voltage ICS - Industrial Control Network Engine
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! PLC and SCADA stations talking Modbus-TCP, wired to simulated physical
//! processes. The protocol engine is sans-IO: applications consume bytes and
//! emit frames through a [`FrameSink`], so the same state machines run in a
//! deterministic discrete-event [`Simulation`] or over real sockets with
//! [`LiveRuntime`].
//!
//! ## Features
//!
//! - **ADU codec**: MBAP framing with zero-copy views over received streams
//! - **Range coalescing**: one read request per function code per RTU
//! - **PLC server**: serves coils, discrete inputs and input registers
//! - **SCADA poller**: control routine runs once every reply has arrived
//! - **Plant scheduler**: physics advanced in priority order before control
//!
//! ## Supported Function Codes
//!
//! | Code | Function | PLC | SCADA |
//! |------|----------|-----|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use voltage_ics::models::{TankController, WaterTank};
//! use voltage_ics::{
//!     NoScadaControl, PlantScheduler, PlcApplication, ScadaApplication, ScadaConfig,
//!     SimConfig, Simulation, VarType,
//! };
//!
//! fn main() -> voltage_ics::ModbusResult<()> {
//!     let mut plant = PlantScheduler::default();
//!     let mut plc = PlcApplication::new("tank", TankController::default(), &mut plant);
//!     plc.link_process(&mut plant, WaterTank::with_level(0.1), 1)?;
//!
//!     let mut sim = Simulation::new(SimConfig::new().with_horizon(Duration::from_secs(2)), plant)?;
//!     let tank = sim.add_plc(plc)?;
//!     let rtu = sim.plc_address(tank).unwrap();
//!
//!     let mut scada = ScadaApplication::new("hmi", NoScadaControl, ScadaConfig::default());
//!     scada.add_rtu(rtu);
//!     scada.add_variable(rtu, "level", VarType::InputRegister, WaterTank::LEVEL_SENSOR_POS)?;
//!     let hmi = sim.add_scada(scada);
//!
//!     sim.run()?;
//!     println!("level: {:?}", sim.scada(hmi).unwrap().value("level"));
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus-TCP frame layout and register file constants
pub mod constants;

/// Function codes and protocol identifiers
pub mod protocol;

/// Bit packing and analog scaling helpers
pub mod utils;

/// Application data units: encoding, views and builders
pub mod adu;

/// Frame sinks, stream reassembly and traffic statistics
pub mod transport;

/// Logging system for the library
pub mod logging;

/// Timing and addressing configuration
pub mod config;

// ============================================================================
// Control network
// ============================================================================

/// PLC register files
pub mod register;

/// Analog sensors with a calibrated range
pub mod sensor;

/// SCADA-side variables
pub mod variable;

/// Coalesced read commands and coil writes
pub mod command;

/// Server-side request handling
pub mod request;

/// Client-side response handling
pub mod response;

/// Physical process and control routine hooks
pub mod process;

/// Plant-wide physics scheduler
pub mod plant;

/// PLC server state machine
pub mod plc;

/// SCADA poller state machine
pub mod scada;

/// Example processes and controllers
pub mod models;

// ============================================================================
// Harnesses
// ============================================================================

/// Deterministic discrete-event harness
pub mod sim;

/// Tokio TCP harness
pub mod live;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_ics::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use adu::{AduBuilder, AduView, ModbusAdu};
pub use protocol::{FunctionCode, TransactionId, UnitId};
pub use register::{PlcIo, PlcState};
pub use sensor::AnalogSensor;
pub use variable::{Var, VarType};

// === Commands ===
pub use command::{Command, ReadCommand, WriteCommand};
pub use request::process_request;
pub use response::process_response;

// === Applications ===
pub use plant::{PlantScheduler, SharedIo};
pub use plc::{PlcApplication, ServerState};
pub use process::{
    NoControl, NoScadaControl, PhysicalProcess, PlcControl, ScadaContext, ScadaControl,
};
pub use scada::{ClientState, ScadaApplication};

// === Harnesses ===
pub use config::{LiveConfig, PlantConfig, ScadaConfig, SimConfig};
pub use live::LiveRuntime;
pub use sim::{Endpoint, PlcId, ScadaId, Simulation};

// === Transport and monitoring ===
pub use transport::{FrameAssembler, FrameSink, LinkId, TransportStats};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = constants::MODBUS_TCP_PORT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage ICS v{} - Modbus-TCP control network engine by Evan Liu",
        VERSION
    )
}
