//! Collaborators the core reads from and commands.
//!
//! The host owns the transport; the core only sees these traits. Every
//! command is fire-and-forget from the engine's point of view: an `Err` is
//! logged by the caller and never retried here.

use crate::{error::GatewayError, types::HvacMode};

/// Current state of one sensor or numeric entity.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    /// Entity missing, or reporting `unknown` / `unavailable`.
    Unavailable,
    Numeric(f64),
    /// Entity reported something that is not a number.
    Invalid(String),
}

impl SensorValue {
    /// Interpret a raw entity state string.
    pub fn from_state(state: Option<&str>) -> Self {
        let Some(state) = state.map(str::trim) else {
            return Self::Unavailable;
        };
        if state.is_empty() || state == "unknown" || state == "unavailable" {
            return Self::Unavailable;
        }
        match state.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Numeric(value),
            _ => Self::Invalid(state.to_string()),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            _ => None,
        }
    }
}

pub trait SensorRegistry {
    fn get_value(&self, entity_id: &str) -> SensorValue;
}

pub trait ContactRegistry {
    fn is_open(&self, entity_id: &str) -> bool;
}

pub trait ActuatorGateway {
    fn set_mode(&self, actuator_id: &str, mode: HvacMode) -> Result<(), GatewayError>;

    fn set_target(&self, actuator_id: &str, temp: f64) -> Result<(), GatewayError>;

    /// Temperature the actuator measures with its own sensor.
    fn get_reported_local_temp(&self, actuator_id: &str) -> Option<f64>;
}

pub trait NumericSink {
    fn set_value(&self, entity_id: &str, value: f64) -> Result<(), GatewayError>;
}

/// Everything a full thermostat cycle touches.
pub trait Home: SensorRegistry + ContactRegistry + ActuatorGateway + NumericSink {}

impl<T> Home for T where T: SensorRegistry + ContactRegistry + ActuatorGateway + NumericSink {}
