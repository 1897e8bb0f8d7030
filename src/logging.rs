//! Frame-level logging
//!
//! Applications log their lifecycle through `tracing`. Wire traffic goes through
//! a [`CallbackLogger`], which either forwards to `tracing`, to a user callback,
//! or nowhere.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use voltage_ics::{CallbackLogger, LogLevel};
//!
//! let lines = Arc::new(Mutex::new(Vec::new()));
//! let sink = lines.clone();
//! let logger = CallbackLogger::new(
//!     Some(Arc::new(move |_level: LogLevel, msg: &str| sink.lock().unwrap().push(msg.to_string()))),
//!     LogLevel::Debug,
//! );
//! logger.log(LogLevel::Info, "plc1 listening");
//! assert_eq!(lines.lock().unwrap().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Local;

use crate::adu::AduView;
use crate::transport::LinkId;
use crate::utils::hex_dump;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    Disabled,
    /// Forward to `tracing`
    Tracing,
    /// Invoke a user callback
    Callback,
}

/// User log callback
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger for frames exchanged by an application
#[derive(Clone)]
pub struct CallbackLogger {
    mode: LoggingMode,
    min_level: LogLevel,
    callback: Option<LogCallback>,
}

impl CallbackLogger {
    /// Callback logger; without a callback it falls back to `tracing`
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        let mode = if callback.is_some() {
            LoggingMode::Callback
        } else {
            LoggingMode::Tracing
        };
        Self {
            mode,
            min_level,
            callback,
        }
    }

    /// Logger that drops everything
    pub fn disabled() -> Self {
        Self {
            mode: LoggingMode::Disabled,
            min_level: LogLevel::Error,
            callback: None,
        }
    }

    /// Logger forwarding to `tracing`
    pub fn tracing(min_level: LogLevel) -> Self {
        Self::new(None, min_level)
    }

    /// Logger printing timestamped lines to stdout
    pub fn console(min_level: LogLevel) -> Self {
        Self::new(
            Some(Arc::new(|level: LogLevel, msg: &str| {
                println!(
                    "{} [{:5}] {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    level,
                    msg
                );
            })),
            min_level,
        )
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Whether a line at `level` would be emitted
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.mode != LoggingMode::Disabled && level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => match level {
                LogLevel::Trace => tracing::trace!("{}", msg),
                LogLevel::Debug => tracing::debug!("{}", msg),
                LogLevel::Info => tracing::info!("{}", msg),
                LogLevel::Warn => tracing::warn!("{}", msg),
                LogLevel::Error => tracing::error!("{}", msg),
            },
            LoggingMode::Callback => {
                if let Some(ref callback) = self.callback {
                    callback(level, msg);
                }
            }
        }
    }

    /// Log an inbound request or an outbound read
    pub fn log_request(&self, name: &str, link: LinkId, adu: &AduView<'_>) {
        if self.enabled(LogLevel::Debug) {
            self.log(
                LogLevel::Debug,
                &format!(
                    "{} >> link {} tid={} uid={} fc=0x{:02X} data=[{}]",
                    name,
                    link,
                    adu.transaction_id(),
                    adu.unit_id(),
                    adu.raw_function_code(),
                    hex_dump(adu.data())
                ),
            );
        }
    }

    /// Log a reply
    pub fn log_response(&self, name: &str, link: LinkId, adu: &AduView<'_>) {
        if self.enabled(LogLevel::Debug) {
            self.log(
                LogLevel::Debug,
                &format!(
                    "{} << link {} tid={} uid={} fc=0x{:02X} data=[{}]",
                    name,
                    link,
                    adu.transaction_id(),
                    adu.unit_id(),
                    adu.raw_function_code(),
                    hex_dump(adu.data())
                ),
            );
        }
    }

    /// Log raw bytes at trace level
    pub fn log_frame(&self, name: &str, direction: &str, bytes: &[u8]) {
        if self.enabled(LogLevel::Trace) {
            self.log(
                LogLevel::Trace,
                &format!("{} {} [{}]", name, direction, hex_dump(bytes)),
            );
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::tracing(LogLevel::Debug)
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("min_level", &self.min_level)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
