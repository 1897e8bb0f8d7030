//! # Runtime Configuration
//!
//! Timing and addressing knobs for the plant, the SCADA poller and the two
//! harnesses. Every struct starts from sensible defaults and is adjusted with
//! `with_*` builders; `validate` rejects values the engine cannot run with.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::constants::MODBUS_TCP_PORT;
use crate::error::{ModbusError, ModbusResult};

/// Default plant tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

/// Default SCADA poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default simulation horizon in seconds.
pub const DEFAULT_HORIZON_SECS: u64 = 20;

/// Default one-way link latency of the simulated network in milliseconds.
pub const DEFAULT_LINK_LATENCY_MS: u64 = 1;

/// Plant scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantConfig {
    /// Interval between physics ticks.
    pub tick_interval: Duration,
    /// Time after which the plant stops rescheduling.
    pub horizon: Option<Duration>,
}

impl PlantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Stop ticking once `horizon` has elapsed.
    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.tick_interval.is_zero() {
            return Err(ModbusError::configuration("plant tick interval must be > 0"));
        }
        Ok(())
    }
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            horizon: None,
        }
    }
}

/// SCADA poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScadaConfig {
    /// Interval between read cycles.
    pub poll_interval: Duration,
    /// Port the RTUs listen on.
    pub peer_port: u16,
}

impl ScadaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the RTU port.
    pub fn with_peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.poll_interval.is_zero() {
            return Err(ModbusError::configuration("SCADA poll interval must be > 0"));
        }
        Ok(())
    }
}

impl Default for ScadaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            peer_port: MODBUS_TCP_PORT,
        }
    }
}

/// Discrete-event simulation settings.
///
/// ```rust
/// use std::time::Duration;
/// use voltage_ics::SimConfig;
///
/// let config = SimConfig::new().with_horizon(Duration::from_secs(2));
/// assert_eq!(config.horizon, Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Virtual time at which the run stops.
    pub horizon: Duration,
    /// One-way delivery delay of every frame.
    pub link_latency: Duration,
    /// Network the PLC addresses are allocated from.
    pub network: Ipv4Addr,
    /// Prefix length of `network`.
    pub prefix_len: u8,
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run horizon.
    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    /// Set the one-way link latency.
    pub fn with_link_latency(mut self, latency: Duration) -> Self {
        self.link_latency = latency;
        self
    }

    /// Set the address pool.
    pub fn with_network(mut self, network: Ipv4Addr, prefix_len: u8) -> Self {
        self.network = network;
        self.prefix_len = prefix_len;
        self
    }

    /// Number of host addresses in the pool.
    pub fn host_capacity(&self) -> u32 {
        host_capacity(self.prefix_len)
    }

    pub fn validate(&self) -> ModbusResult<()> {
        validate_prefix(self.prefix_len)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(DEFAULT_HORIZON_SECS),
            link_latency: Duration::from_millis(DEFAULT_LINK_LATENCY_MS),
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_len: 24,
        }
    }
}

/// Live TCP runtime settings.
///
/// PLCs still receive a logical address from `network`; SCADAs name their RTUs
/// by it and the runtime maps each one to the PLC's bound socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    /// Interface the PLC listeners bind to.
    pub bind: IpAddr,
    /// Listener port; 0 lets the OS choose one per PLC.
    pub port: u16,
    /// Wall-clock time after which the runtime shuts down.
    pub horizon: Option<Duration>,
    /// Logical network the PLC addresses are allocated from.
    pub network: Ipv4Addr,
    /// Prefix length of `network`.
    pub prefix_len: u8,
}

impl LiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn with_network(mut self, network: Ipv4Addr, prefix_len: u8) -> Self {
        self.network = network;
        self.prefix_len = prefix_len;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if matches!(self.horizon, Some(h) if h.is_zero()) {
            return Err(ModbusError::configuration("live horizon must be > 0"));
        }
        validate_prefix(self.prefix_len)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: MODBUS_TCP_PORT,
            horizon: None,
            network: Ipv4Addr::new(192, 168, 1, 0),
            prefix_len: 24,
        }
    }
}

/// Number of usable host addresses under a prefix
pub fn host_capacity(prefix_len: u8) -> u32 {
    let host_bits = 32 - u32::from(prefix_len.min(32));
    if host_bits < 2 {
        0
    } else {
        (1u32 << host_bits.min(31)) - 2
    }
}

fn validate_prefix(prefix_len: u8) -> ModbusResult<()> {
    if prefix_len > 30 {
        return Err(ModbusError::configuration(format!(
            "network prefix /{} leaves no host addresses",
            prefix_len
        )));
    }
    Ok(())
}

/// Host `index` (1-based) of `network/prefix_len`
pub fn host_address(network: Ipv4Addr, prefix_len: u8, index: u32) -> ModbusResult<Ipv4Addr> {
    if index == 0 || index > host_capacity(prefix_len) {
        return Err(ModbusError::configuration(format!(
            "address pool {}/{} exhausted",
            network, prefix_len
        )));
    }
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
    Ok(Ipv4Addr::from((u32::from(network) & mask) + index))
}
