use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    types::{OverrideMode, WindowMode},
};

pub const DEFAULT_PRESET: &str = "comfort";

/// Static thermostat setup. Read-only to the engine once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,
    pub heater: String,
    pub cooler: Option<String>,
    pub sensor_temp: String,
    pub sensor_humidity: Option<String>,
    pub temp_offset: f64,
    pub windows: Vec<String>,

    pub deadband: f64,
    #[serde(rename = "min_run_seconds")]
    pub min_run_secs: u64,
    #[serde(rename = "min_idle_seconds")]
    pub min_idle_secs: u64,
    pub window_mode: WindowMode,
    pub frost_temp: f64,
    pub smoothing_alpha: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub target_temp_step: f64,
    pub presets: BTreeMap<String, f64>,

    pub heater_offset_entity: Option<String>,
    pub cooler_offset_entity: Option<String>,
    pub auto_offset_update: bool,

    pub override_thermostat: Option<String>,
    pub override_entity: Option<String>,
    pub override_mode: OverrideMode,
    /// Copy mode and target onto `override_thermostat` every cycle.
    pub replay_to_override: bool,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: "Eco Thermostat".to_string(),
            heater: String::new(),
            cooler: None,
            sensor_temp: String::new(),
            sensor_humidity: None,
            temp_offset: 0.0,
            windows: Vec::new(),
            deadband: 0.5,
            min_run_secs: 180,
            min_idle_secs: 180,
            window_mode: WindowMode::Frost,
            frost_temp: 5.0,
            smoothing_alpha: 0.0,
            min_temp: 5.0,
            max_temp: 35.0,
            target_temp_step: 0.5,
            presets: default_presets(),
            heater_offset_entity: None,
            cooler_offset_entity: None,
            auto_offset_update: false,
            override_thermostat: None,
            override_entity: None,
            override_mode: OverrideMode::ExternalValue,
            replay_to_override: false,
        }
    }
}

pub fn default_presets() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("eco".to_string(), 18.0),
        ("comfort".to_string(), 22.0),
        ("sleep".to_string(), 19.0),
        ("away".to_string(), 16.0),
    ])
}

impl ThermostatConfig {
    pub fn has_cooler(&self) -> bool {
        self.cooler.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn min_run_ms(&self) -> u64 {
        self.min_run_secs.saturating_mul(1_000)
    }

    pub fn min_idle_ms(&self) -> u64 {
        self.min_idle_secs.saturating_mul(1_000)
    }

    pub fn clamp_target(&self, temp: f64) -> f64 {
        temp.max(self.min_temp).min(self.max_temp)
    }

    /// Target the engine starts from: the default preset, or the midpoint of
    /// the allowed range when that preset was removed.
    pub fn initial_target(&self) -> f64 {
        let temp = self
            .presets
            .get(DEFAULT_PRESET)
            .copied()
            .unwrap_or((self.min_temp + self.max_temp) / 2.0);
        self.clamp_target(temp)
    }

    /// Pull every tunable into the range the options form accepts.
    pub fn sanitize(&mut self) {
        self.deadband = clamp_or(self.deadband, 0.1, 2.0, 0.5);
        self.min_run_secs = self.min_run_secs.min(3_600);
        self.min_idle_secs = self.min_idle_secs.min(3_600);
        self.frost_temp = clamp_or(self.frost_temp, 3.0, 12.0, 5.0);
        self.smoothing_alpha = clamp_or(self.smoothing_alpha, 0.0, 1.0, 0.0);
        self.temp_offset = clamp_or(self.temp_offset, -10.0, 10.0, 0.0);

        self.presets
            .retain(|name, temp| !name.trim().is_empty() && temp.is_finite());
        for temp in self.presets.values_mut() {
            *temp = temp.clamp(10.0, 30.0);
        }

        if self.cooler.as_deref().is_some_and(str::is_empty) {
            self.cooler = None;
        }
        self.windows.retain(|id| !id.trim().is_empty());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heater.trim().is_empty() {
            return Err(ConfigError::MissingHeater);
        }
        if self.min_temp.is_nan() || self.max_temp.is_nan() || self.min_temp > self.max_temp {
            return Err(ConfigError::InvertedRange {
                min: self.min_temp,
                max: self.max_temp,
            });
        }
        if self.override_mode != OverrideMode::Disabled {
            if let Some(entity) = &self.override_entity {
                if !is_numeric_entity(entity) {
                    return Err(ConfigError::OverrideEntityNotNumeric(entity.clone()));
                }
            }
        }
        if self.override_mode == OverrideMode::OffsetMode && self.override_thermostat.is_none() {
            return Err(ConfigError::OffsetModeWithoutThermostat);
        }
        if self.replay_to_override {
            if let Some(target) = &self.override_thermostat {
                if *target == self.heater || self.cooler.as_ref() == Some(target) {
                    return Err(ConfigError::ReplayOntoActuator(target.clone()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "eco-thermostat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_eval_interval_secs")]
    pub eval_interval_secs: u64,
}

fn default_eval_interval_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            mqtt: MqttConfig::default(),
            eval_interval_secs: default_eval_interval_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Parse, sanitize and validate a JSON document.
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut runtime: Self = serde_json::from_slice(raw)?;
        runtime.thermostat.sanitize();
        runtime.eval_interval_secs = runtime.eval_interval_secs.max(1);
        runtime.thermostat.validate()?;
        Ok(runtime)
    }
}

/// `number.*` and `input_number.*` entities accept `set_value`.
pub fn is_numeric_entity(entity_id: &str) -> bool {
    matches!(
        entity_id.split_once('.').map(|(domain, _)| domain),
        Some("number" | "input_number")
    )
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal() -> ThermostatConfig {
        ThermostatConfig {
            heater: "climate.radiator".to_string(),
            sensor_temp: "sensor.living_room".to_string(),
            ..ThermostatConfig::default()
        }
    }

    #[test]
    fn sanitize_clamps_options_into_form_ranges() {
        let mut config = minimal();
        config.deadband = 9.0;
        config.min_run_secs = 10_000;
        config.frost_temp = 1.0;
        config.smoothing_alpha = f64::NAN;
        config.presets.insert("party".to_string(), 40.0);
        config.cooler = Some(String::new());

        config.sanitize();

        assert_eq!(config.deadband, 2.0);
        assert_eq!(config.min_run_secs, 3_600);
        assert_eq!(config.frost_temp, 3.0);
        assert_eq!(config.smoothing_alpha, 0.0);
        assert_eq!(config.presets.get("party"), Some(&30.0));
        assert_eq!(config.cooler, None);
    }

    #[test]
    fn validate_rejects_unusable_setups() {
        assert!(matches!(
            ThermostatConfig::default().validate(),
            Err(ConfigError::MissingHeater)
        ));

        let mut config = minimal();
        config.override_entity = Some("sensor.display".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverrideEntityNotNumeric(_))
        ));

        let mut config = minimal();
        config.override_mode = OverrideMode::OffsetMode;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OffsetModeWithoutThermostat)
        ));

        let mut config = minimal();
        config.min_temp = 30.0;
        config.max_temp = 10.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedRange { .. })
        ));

        let mut config = minimal();
        config.override_thermostat = Some("climate.radiator".to_string());
        config.replay_to_override = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReplayOntoActuator(_))
        ));

        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn runtime_config_fills_defaults_from_partial_json() {
        let raw = br#"{
            "thermostat": {
                "heater": "climate.radiator",
                "sensor_temp": "sensor.living_room",
                "min_run_seconds": 60,
                "window_mode": "off"
            }
        }"#;

        let runtime = RuntimeConfig::from_json(raw).unwrap();

        assert_eq!(runtime.thermostat.min_run_secs, 60);
        assert_eq!(runtime.thermostat.min_idle_secs, 180);
        assert_eq!(runtime.thermostat.window_mode, WindowMode::Off);
        assert_eq!(runtime.thermostat.initial_target(), 22.0);
        assert_eq!(runtime.mqtt.port, 1883);
        assert_eq!(runtime.eval_interval_secs, 30);
    }

    #[test]
    fn numeric_entity_domains() {
        assert!(is_numeric_entity("number.trv_offset"));
        assert!(is_numeric_entity("input_number.mirror"));
        assert!(!is_numeric_entity("sensor.temp"));
        assert!(!is_numeric_entity("number"));
    }
}
