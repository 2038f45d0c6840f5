//! One thermostat instance: sensors, engine, dispatcher and calibration wired
//! together behind the commands a presentation layer needs.

use crate::{
    calibration::AutoCalibrator,
    config::ThermostatConfig,
    dispatch::ActuationDispatcher,
    error::{CommandError, ConfigError},
    events::{EngineEvent, Observer, TracingObserver},
    sensors::SensorManager,
    thermostat::ThermostatEngine,
    traits::{Home, SensorRegistry},
    types::{ClimateAttributes, ClimateDecision, HvacAction, HvacMode, OffsetAttribute, SensorSnapshot},
};

pub struct Climate<O: Observer = TracingObserver> {
    engine: ThermostatEngine,
    sensors: SensorManager,
    dispatcher: ActuationDispatcher,
    calibrator: AutoCalibrator,
    observer: O,
    last_snapshot: SensorSnapshot,
}

impl<O: Observer> Climate<O> {
    pub fn new(mut config: ThermostatConfig, observer: O) -> Result<Self, ConfigError> {
        config.sanitize();
        config.validate()?;

        Ok(Self {
            sensors: SensorManager::new(&config),
            dispatcher: ActuationDispatcher::new(&config),
            calibrator: AutoCalibrator::new(&config),
            engine: ThermostatEngine::new(config),
            observer,
            last_snapshot: SensorSnapshot::default(),
        })
    }

    pub fn engine(&self) -> &ThermostatEngine {
        &self.engine
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Read every sensor, run a control cycle, deliver it and calibrate.
    pub fn refresh(&mut self, home: &impl Home, now_ms: u64) -> ClimateDecision {
        self.last_snapshot = self.sensors.refresh(home, &self.observer);
        self.cycle(home, now_ms);
        self.calibrator
            .run(self.last_snapshot.temperature, home, &self.observer);
        self.decision()
    }

    /// Run a cycle on the last conditioned readings. Window contacts are read
    /// again, so this is what a contact change or a user command triggers.
    pub fn reevaluate(&mut self, home: &impl Home, now_ms: u64) -> ClimateDecision {
        self.last_snapshot = self.sensors.snapshot(home);
        self.cycle(home, now_ms);
        self.decision()
    }

    fn cycle(&mut self, home: &impl Home, now_ms: u64) {
        let snapshot = self.last_snapshot;
        if let Some(decision) = self.engine.evaluate(&snapshot, now_ms, &self.observer) {
            self.dispatcher
                .dispatch(&decision, snapshot.temperature, home, &self.observer);
        }
    }

    pub fn set_target(&mut self, temp: f64, home: &impl Home, now_ms: u64) -> bool {
        let result = self.engine.set_target(temp);
        self.after_command(result, home, now_ms)
    }

    pub fn set_mode(&mut self, mode: HvacMode, home: &impl Home, now_ms: u64) -> bool {
        let result = self.engine.set_mode(mode);
        self.after_command(result, home, now_ms)
    }

    pub fn set_preset(&mut self, name: &str, home: &impl Home, now_ms: u64) -> bool {
        let result = self.engine.set_preset(name);
        self.after_command(result, home, now_ms)
    }

    pub fn turn_on(&mut self, home: &impl Home, now_ms: u64) -> bool {
        let changed = self.engine.turn_on();
        self.after_command(Ok(changed), home, now_ms)
    }

    pub fn turn_off(&mut self, home: &impl Home, now_ms: u64) -> bool {
        let changed = self.engine.turn_off();
        self.after_command(Ok(changed), home, now_ms)
    }

    /// Returns whether the command was accepted. Rejections are reported and
    /// leave the state untouched.
    fn after_command(
        &mut self,
        result: Result<bool, CommandError>,
        home: &impl Home,
        now_ms: u64,
    ) -> bool {
        match result {
            Ok(changed) => {
                if changed {
                    self.reevaluate(home, now_ms);
                }
                true
            }
            Err(error) => {
                self.observer.report(&EngineEvent::CommandRejected { error });
                false
            }
        }
    }

    /// Forget what was delivered to actuators so the next cycle resends it,
    /// e.g. after the transport reconnected.
    pub fn resync(&mut self) {
        self.dispatcher.resync();
    }

    pub fn decision(&self) -> ClimateDecision {
        let state = self.engine.state();
        ClimateDecision {
            hvac_mode: state.hvac_mode,
            hvac_action: HvacAction::from_state(state.hvac_mode, state.active_output),
            target_temperature: state.target_temperature,
            preset_mode: state.preset_mode.clone(),
            current_temperature: self.last_snapshot.temperature,
            current_humidity: self.last_snapshot.humidity,
        }
    }

    pub fn attributes(&self, registry: &impl SensorRegistry) -> ClimateAttributes {
        let config = &self.engine.config;
        let offset = |entity: &Option<String>| {
            entity.as_ref().map(|entity| OffsetAttribute {
                entity: entity.clone(),
                current_offset: registry.get_value(entity).value(),
            })
        };

        ClimateAttributes {
            deadband: config.deadband,
            min_run_secs: config.min_run_secs,
            min_idle_secs: config.min_idle_secs,
            window_mode: config.window_mode.as_str(),
            frost_temp: config.frost_temp,
            auto_offset_update: self.calibrator.is_enabled(),
            window_open: self
                .sensors
                .windows()
                .is_configured()
                .then_some(self.last_snapshot.window_open),
            heater_offset: offset(&config.heater_offset_entity),
            cooler_offset: offset(&config.cooler_offset_entity),
            supported_modes: self.engine.supported_modes(),
            preset_modes: self.engine.preset_names(),
        }
    }
}
