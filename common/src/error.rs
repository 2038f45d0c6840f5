use thiserror::Error;

use crate::types::HvacMode;

/// Configuration that cannot drive a thermostat at all.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("heater entity id must not be empty")]
    MissingHeater,

    #[error("min_temp {min} is above max_temp {max}")]
    InvertedRange { min: f64, max: f64 },

    #[error("override entity {0} is not a numeric entity (number.* or input_number.*)")]
    OverrideEntityNotNumeric(String),

    #[error("override_mode offset_mode requires override_thermostat")]
    OffsetModeWithoutThermostat,

    #[error("override thermostat {0} is also a controlled actuator and cannot receive replays")]
    ReplayOntoActuator(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A user command the engine refused; state is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("hvac mode {} is not supported without a cooler", .0.as_str())]
    UnsupportedMode(HvacMode),

    #[error("unknown preset {0:?}")]
    UnknownPreset(String),

    #[error("target temperature {0} is not a finite number")]
    InvalidTarget(f64),
}

/// Failure reported by an actuator or numeric entity command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("entity {0} is unavailable")]
    Unavailable(String),

    #[error("command to {entity} rejected: {reason}")]
    Rejected { entity: String, reason: String },
}
