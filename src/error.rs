//! Error types for the control-network engine
//!
//! Every fallible operation returns [`ModbusResult`]. Variants fall in two groups:
//!
//! - **Fatal**: configuration or programmer errors (register index out of bounds,
//!   unit id 0, re-linking a process, unknown RTU, value outside a sensor range,
//!   undersized stream). The simulation stops and reports the offending entity.
//! - **Wire**: malformed or out-of-envelope traffic. Callers usually log and drop.

use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by the codec, the applications and the harnesses
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Malformed or undersized ADU stream
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Protocol violation on an otherwise well-formed frame
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code outside the supported subset
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Payload that cannot be interpreted
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Register, bit or payload index outside its declared bounds
    #[error("Index {index} out of bounds for {what} (size {size})")]
    OutOfBounds {
        what: &'static str,
        index: usize,
        size: usize,
    },

    /// Value outside a declared engineering range
    #[error("Value {value} outside range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// Unit id 0 on a network variable
    #[error("Unit id cannot be 0 for variable '{name}'")]
    InvalidUnitId { name: String },

    /// A PLC was asked to link a second process
    #[error("PLC '{plc}' already has a linked process")]
    ProcessAlreadyLinked { plc: String },

    /// A SCADA referenced an RTU address never registered with `add_rtu`
    #[error("No RTU with address '{address}' in SCADA '{scada}'")]
    UnknownRtu { scada: String, address: String },

    /// Operation not valid in the current application state
    #[error("Invalid state for '{name}': {message}")]
    InvalidState { name: String, message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Transport connection failure
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Socket I/O failure
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ModbusError {
    /// Create a frame error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an out of bounds error
    pub fn out_of_bounds(what: &'static str, index: usize, size: usize) -> Self {
        Self::OutOfBounds { what, index, size }
    }

    /// Create an invalid state error
    pub fn invalid_state(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Whether the error stems from configuration or programming mistakes
    /// rather than from traffic on the wire.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::InvalidData { .. }
                | Self::Connection { .. }
                | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ModbusError::out_of_bounds("analog register", 3, 2).is_fatal());
        assert!(ModbusError::frame("too short").is_fatal());
        assert!(ModbusError::ProcessAlreadyLinked { plc: "wt".into() }.is_fatal());
        assert!(!ModbusError::invalid_function(3).is_fatal());
        assert!(!ModbusError::connection("refused").is_fatal());
    }

    #[test]
    fn test_messages_name_the_entity() {
        let err = ModbusError::UnknownRtu {
            scada: "scada".into(),
            address: "192.168.1.9".into(),
        };
        assert_eq!(
            err.to_string(),
            "No RTU with address '192.168.1.9' in SCADA 'scada'"
        );

        let err = ModbusError::out_of_bounds("analog register", 2, 2);
        assert_eq!(
            err.to_string(),
            "Index 2 out of bounds for analog register (size 2)"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io { .. }));
    }
}
