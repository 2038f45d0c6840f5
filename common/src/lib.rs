pub mod calibration;
pub mod climate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod sensors;
pub mod thermostat;
pub mod topics;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

pub use calibration::{AutoCalibrator, CalibrationLink};
pub use climate::Climate;
pub use config::{MqttConfig, RuntimeConfig, ThermostatConfig};
pub use dispatch::ActuationDispatcher;
pub use error::{CommandError, ConfigError, GatewayError};
pub use events::{EngineEvent, Observer, TracingObserver};
pub use sensors::{SensorConditioner, SensorManager, WindowSet};
pub use thermostat::{ControlState, ThermostatEngine, WindowSnapshot};
pub use topics::*;
pub use traits::{ActuatorGateway, ContactRegistry, Home, NumericSink, SensorRegistry, SensorValue};
pub use types::{
    ActiveOutput, ClimateAttributes, ClimateDecision, ControlDecision, HvacAction, HvacMode,
    OffsetAttribute, OverrideMode, SensorSnapshot, ThermostatStatePayload, WindowMode,
};
