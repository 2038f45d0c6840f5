//! Sensor conditioning: offset, EMA smoothing and window aggregation.

use crate::{
    config::ThermostatConfig,
    events::{EngineEvent, Observer},
    traits::{ContactRegistry, SensorRegistry, SensorValue},
    types::SensorSnapshot,
};

/// Turns raw temperature readings into the value the engine acts on.
#[derive(Debug, Clone)]
pub struct SensorConditioner {
    offset: f64,
    alpha: f64,
    smoothed: Option<f64>,
    current: Option<f64>,
}

impl SensorConditioner {
    /// `alpha` outside `(0, 1]` disables smoothing.
    pub fn new(offset: f64, alpha: f64) -> Self {
        Self {
            offset: if offset.is_finite() { offset } else { 0.0 },
            alpha: if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 },
            smoothed: None,
            current: None,
        }
    }

    /// Feed one reading. A missing reading leaves the conditioned value as it was.
    pub fn update(&mut self, raw: Option<f64>) -> Option<f64> {
        let Some(raw) = raw.filter(|value| value.is_finite()) else {
            return self.current;
        };
        let value = raw + self.offset;

        self.current = Some(if self.alpha > 0.0 {
            let smoothed = self
                .smoothed
                .map_or(value, |previous| self.alpha * value + (1.0 - self.alpha) * previous);
            self.smoothed = Some(smoothed);
            smoothed
        } else {
            value
        });
        self.current
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }
}

/// Humidity: same validity rule as temperature, no offset, no smoothing.
#[derive(Debug, Clone, Default)]
pub struct HumidityChannel {
    current: Option<f64>,
}

impl HumidityChannel {
    pub fn update(&mut self, raw: Option<f64>) -> Option<f64> {
        if let Some(value) = raw.filter(|value| value.is_finite()) {
            self.current = Some(value);
        }
        self.current
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }
}

/// Window and door contacts; open as soon as any one reports open.
#[derive(Debug, Clone, Default)]
pub struct WindowSet {
    ids: Vec<String>,
}

impl WindowSet {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn is_configured(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_open(&self, contacts: &impl ContactRegistry) -> bool {
        self.ids.iter().any(|id| contacts.is_open(id))
    }
}

/// Reads every input channel and produces one snapshot per cycle.
#[derive(Debug, Clone)]
pub struct SensorManager {
    temperature_entity: String,
    humidity_entity: Option<String>,
    conditioner: SensorConditioner,
    humidity: HumidityChannel,
    windows: WindowSet,
}

impl SensorManager {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            temperature_entity: config.sensor_temp.clone(),
            humidity_entity: config.sensor_humidity.clone(),
            conditioner: SensorConditioner::new(config.temp_offset, config.smoothing_alpha),
            humidity: HumidityChannel::default(),
            windows: WindowSet::new(config.windows.clone()),
        }
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn refresh<R>(&mut self, registry: &R, observer: &impl Observer) -> SensorSnapshot
    where
        R: SensorRegistry + ContactRegistry,
    {
        let raw = read_channel(registry, &self.temperature_entity, observer);
        let temperature = self.conditioner.update(raw);

        let humidity = match &self.humidity_entity {
            Some(entity) => {
                let raw = read_channel(registry, entity, observer);
                self.humidity.update(raw)
            }
            None => None,
        };

        SensorSnapshot {
            temperature,
            humidity,
            window_open: self.windows.is_open(registry),
        }
    }

    /// Last conditioned values, with the window state re-read.
    pub fn snapshot(&self, contacts: &impl ContactRegistry) -> SensorSnapshot {
        SensorSnapshot {
            temperature: self.conditioner.current(),
            humidity: self.humidity.current(),
            window_open: self.windows.is_open(contacts),
        }
    }
}

/// Read one numeric channel, reporting why it yielded nothing.
pub fn read_channel(
    registry: &impl SensorRegistry,
    entity: &str,
    observer: &impl Observer,
) -> Option<f64> {
    if entity.is_empty() {
        return None;
    }
    match registry.get_value(entity) {
        SensorValue::Numeric(value) => Some(value),
        SensorValue::Unavailable => {
            observer.report(&EngineEvent::SensorUnavailable {
                entity: entity.to_string(),
            });
            None
        }
        SensorValue::Invalid(raw) => {
            observer.report(&EngineEvent::InvalidReading {
                entity: entity.to_string(),
                raw,
            });
            None
        }
    }
}
