//! # Bus Telemetry
//!
//! Structured logging for processes built on `message-bus`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_logging(&config).expect("Failed to init logging");
//!
//!     // Bus diagnostics (subscriber failures, slow handlers, undelivered
//!     // messages) are now written to the console
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MSGBUS_SERVICE_NAME` | `message-bus` | Service name in log lines |
//! | `MSGBUS_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `MSGBUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `MSGBUS_JSON_LOGS` | `false` | JSON instead of human-readable output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging, LoggingGuard};

use thiserror::Error;

/// Logging initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Convenience macro for a span tagged with the bus name.
///
/// # Example
///
/// ```rust,ignore
/// use bus_telemetry::bus_span;
///
/// let _span = bus_span!("project_open", bus.name(), project = %name).entered();
/// ```
#[macro_export]
macro_rules! bus_span {
    ($name:expr, $bus:expr) => {
        tracing::info_span!($name, bus = %$bus)
    };
    ($name:expr, $bus:expr, $($field:tt)*) => {
        tracing::info_span!($name, bus = %$bus, $($field)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Filter("bad directive".to_string());
        assert_eq!(err.to_string(), "Invalid log filter: bad directive");
    }

    #[test]
    fn test_bus_span() {
        init_test_logging();
        let span = bus_span!("delivery", "editor", topic = "file-changed");
        let _entered = span.enter();
    }
}
