//! Media session configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default, so an empty environment yields a usable config.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default session mailbox capacity (signaling events + handle requests).
pub const DEFAULT_MAILBOX_CAPACITY: usize = 500;

/// Default capacity of the session event bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Widest rendered tile (px) that still requests spatial layer 0.
pub const DEFAULT_LAYER_SMALL_MAX_WIDTH: u32 = 320;

/// Widest rendered tile (px) that still requests spatial layer 1.
pub const DEFAULT_LAYER_MEDIUM_MAX_WIDTH: u32 = 800;

/// Pixel-width thresholds for simulcast layer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerThresholds {
    /// Widths up to and including this map to layer 0.
    pub small_max_width: u32,
    /// Widths up to and including this map to layer 1; wider maps to layer 2.
    pub medium_max_width: u32,
}

impl Default for LayerThresholds {
    fn default() -> Self {
        Self {
            small_max_width: DEFAULT_LAYER_SMALL_MAX_WIDTH,
            medium_max_width: DEFAULT_LAYER_MEDIUM_MAX_WIDTH,
        }
    }
}

/// Media session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bounded mailbox size of the session actor.
    pub mailbox_capacity: usize,

    /// Buffered events per event-bus subscriber before it lags.
    pub event_bus_capacity: usize,

    /// Layer selection thresholds.
    pub layer_thresholds: LayerThresholds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            layer_thresholds: LayerThresholds::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mailbox_capacity = parse_var(
            vars,
            "MEDIA_SESSION_MAILBOX_CAPACITY",
            DEFAULT_MAILBOX_CAPACITY,
        )?;

        let event_bus_capacity = parse_var(
            vars,
            "MEDIA_SESSION_EVENT_BUS_CAPACITY",
            DEFAULT_EVENT_BUS_CAPACITY,
        )?;

        let small_max_width = parse_var(
            vars,
            "MEDIA_SESSION_LAYER_SMALL_MAX_WIDTH",
            DEFAULT_LAYER_SMALL_MAX_WIDTH,
        )?;

        let medium_max_width = parse_var(
            vars,
            "MEDIA_SESSION_LAYER_MEDIUM_MAX_WIDTH",
            DEFAULT_LAYER_MEDIUM_MAX_WIDTH,
        )?;

        if mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "MEDIA_SESSION_MAILBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }

        // broadcast::channel panics on a zero capacity
        if event_bus_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "MEDIA_SESSION_EVENT_BUS_CAPACITY must be greater than zero".to_string(),
            ));
        }

        if small_max_width >= medium_max_width {
            return Err(ConfigError::InvalidValue(format!(
                "MEDIA_SESSION_LAYER_SMALL_MAX_WIDTH ({small_max_width}) must be below \
                 MEDIA_SESSION_LAYER_MEDIUM_MAX_WIDTH ({medium_max_width})"
            )));
        }

        Ok(SessionConfig {
            mailbox_capacity,
            event_bus_capacity,
            layer_thresholds: LayerThresholds {
                small_max_width,
                medium_max_width,
            },
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}
