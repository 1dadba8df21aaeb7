//! Bus configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use message_bus::BusConfigBuilder;
//!
//! let config = BusConfigBuilder::new()
//!     .name("project-bus")
//!     .slow_handler_threshold_ms(250)
//!     .build()
//!     .expect("Valid config");
//! ```

use crate::error::BusError;
use crate::{DEFAULT_BUS_NAME, DEFAULT_SLOW_HANDLER_THRESHOLD_MS};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Message bus configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus name used in log fields
    pub name: String,
    /// Handlers running longer than this are reported (0 disables)
    pub slow_handler_threshold_ms: u64,
    /// Log publishes that reach no subscriber at `warn` instead of `debug`
    pub warn_on_dead_publish: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BUS_NAME.to_string(),
            slow_handler_threshold_ms: DEFAULT_SLOW_HANDLER_THRESHOLD_MS,
            warn_on_dead_publish: false,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MSGBUS_NAME`: Bus name (default: message-bus)
    /// - `MSGBUS_SLOW_HANDLER_MS`: Slow handler threshold (default: 1000)
    /// - `MSGBUS_WARN_DEAD_PUBLISH`: Warn on publishes without subscribers (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            name: env::var("MSGBUS_NAME").unwrap_or(defaults.name),

            slow_handler_threshold_ms: env::var("MSGBUS_SLOW_HANDLER_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.slow_handler_threshold_ms),

            warn_on_dead_publish: env::var("MSGBUS_WARN_DEAD_PUBLISH")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.warn_on_dead_publish),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// `BusError::InvalidConfig` if the name is blank.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.name.trim().is_empty() {
            return Err(BusError::InvalidConfig(
                "name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Slow handler threshold, `None` when disabled
    #[must_use]
    pub fn slow_handler_threshold(&self) -> Option<Duration> {
        (self.slow_handler_threshold_ms > 0)
            .then(|| Duration::from_millis(self.slow_handler_threshold_ms))
    }

    /// Builder-style method to set the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style method to set the slow handler threshold
    #[must_use]
    pub fn with_slow_handler_threshold_ms(mut self, ms: u64) -> Self {
        self.slow_handler_threshold_ms = ms;
        self
    }

    /// Builder-style method to toggle dead publish warnings
    #[must_use]
    pub fn with_warn_on_dead_publish(mut self, warn: bool) -> Self {
        self.warn_on_dead_publish = warn;
        self
    }
}

/// Builder for BusConfig with validation
#[derive(Default)]
pub struct BusConfigBuilder {
    name: Option<String>,
    slow_handler_threshold_ms: Option<u64>,
    warn_on_dead_publish: Option<bool>,
}

impl BusConfigBuilder {
    /// Create a new builder with no values set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn slow_handler_threshold_ms(mut self, ms: u64) -> Self {
        self.slow_handler_threshold_ms = Some(ms);
        self
    }

    pub fn warn_on_dead_publish(mut self, warn: bool) -> Self {
        self.warn_on_dead_publish = Some(warn);
        self
    }

    /// Build the configuration, filling unset values from defaults
    ///
    /// # Errors
    ///
    /// Returns the validation error of the assembled config.
    pub fn build(self) -> Result<BusConfig, BusError> {
        let defaults = BusConfig::default();
        let config = BusConfig {
            name: self.name.unwrap_or(defaults.name),
            slow_handler_threshold_ms: self
                .slow_handler_threshold_ms
                .unwrap_or(defaults.slow_handler_threshold_ms),
            warn_on_dead_publish: self
                .warn_on_dead_publish
                .unwrap_or(defaults.warn_on_dead_publish),
        };
        config.validate()?;
        Ok(config)
    }
}
