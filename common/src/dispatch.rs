//! Turns a [`ControlDecision`] into actuator commands.
//!
//! Commands are fire-and-forget: a failure is reported and swallowed. The
//! dispatcher remembers what it last delivered to each entity and only sends
//! what changed, so an unchanged decision produces no traffic. A failed
//! command is forgotten so the next cycle sends it again.

use std::collections::HashMap;

use crate::{
    calibration::round_tenth,
    config::ThermostatConfig,
    error::GatewayError,
    events::{EngineEvent, Observer},
    traits::{ActuatorGateway, NumericSink},
    types::{ActiveOutput, ControlDecision, HvacMode, OverrideMode},
};

#[derive(Debug, Clone, Default)]
struct SentMemo {
    modes: HashMap<String, HvacMode>,
    targets: HashMap<String, f64>,
    values: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ActuationDispatcher {
    heater: String,
    cooler: Option<String>,
    override_thermostat: Option<String>,
    override_entity: Option<String>,
    override_mode: OverrideMode,
    replay: bool,
    sent: SentMemo,
}

impl ActuationDispatcher {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            heater: config.heater.clone(),
            cooler: config.cooler.clone().filter(|id| !id.is_empty()),
            override_thermostat: config.override_thermostat.clone().filter(|id| !id.is_empty()),
            override_entity: config.override_entity.clone().filter(|id| !id.is_empty()),
            override_mode: config.override_mode,
            replay: config.replay_to_override,
            sent: SentMemo::default(),
        }
    }

    /// Forget everything delivered so far; the next dispatch resends it all.
    pub fn resync(&mut self) {
        self.sent = SentMemo::default();
    }

    /// Deliver one decision. `reference` is the conditioned room reading used
    /// for mirroring.
    pub fn dispatch<H>(
        &mut self,
        decision: &ControlDecision,
        reference: Option<f64>,
        home: &H,
        observer: &impl Observer,
    ) where
        H: ActuatorGateway + NumericSink,
    {
        let mut commands = vec![(
            self.heater.clone(),
            if decision.active_output == ActiveOutput::Heating {
                HvacMode::Heat
            } else {
                HvacMode::Off
            },
        )];
        if let Some(cooler) = &self.cooler {
            let mode = if decision.active_output == ActiveOutput::Cooling {
                HvacMode::Cool
            } else {
                HvacMode::Off
            };
            commands.push((cooler.clone(), mode));
        }
        // Whatever goes off is switched off before anything is switched on.
        commands.sort_by_key(|(_, mode)| *mode != HvacMode::Off);

        for (actuator, mode) in &commands {
            self.send_mode(actuator, *mode, home, observer);
        }

        if self.replay {
            if let Some(thermostat) = self.override_thermostat.clone() {
                self.send_mode(&thermostat, decision.hvac_mode, home, observer);
                self.send_target(&thermostat, decision.target_temperature, home, observer);
            }
        }

        if let Some(value) = reference.and_then(|reference| self.mirror_value(reference, home)) {
            if let Some(entity) = self.override_entity.clone() {
                self.send_value(&entity, value, home, observer);
            }
        }
    }

    fn mirror_value(&self, reference: f64, home: &impl ActuatorGateway) -> Option<f64> {
        match self.override_mode {
            OverrideMode::Disabled => None,
            OverrideMode::ExternalValue => Some(reference),
            OverrideMode::OffsetMode => {
                // Without a local reading the plain value is mirrored.
                let local = self
                    .override_thermostat
                    .as_deref()
                    .and_then(|id| home.get_reported_local_temp(id));
                Some(local.map_or(reference, |local| round_tenth(reference - local)))
            }
        }
    }

    fn send_mode(
        &mut self,
        actuator: &str,
        mode: HvacMode,
        home: &impl ActuatorGateway,
        observer: &impl Observer,
    ) {
        if self.sent.modes.get(actuator) == Some(&mode) {
            return;
        }
        let result = home.set_mode(actuator, mode);
        record(&mut self.sent.modes, actuator, mode, result, observer);
    }

    fn send_target(
        &mut self,
        actuator: &str,
        temp: f64,
        home: &impl ActuatorGateway,
        observer: &impl Observer,
    ) {
        if self.sent.targets.get(actuator) == Some(&temp) {
            return;
        }
        let result = home.set_target(actuator, temp);
        record(&mut self.sent.targets, actuator, temp, result, observer);
    }

    fn send_value(
        &mut self,
        entity: &str,
        value: f64,
        home: &impl NumericSink,
        observer: &impl Observer,
    ) {
        if self.sent.values.get(entity) == Some(&value) {
            return;
        }
        let result = home.set_value(entity, value);
        record(&mut self.sent.values, entity, value, result, observer);
    }
}

fn record<T>(
    memo: &mut HashMap<String, T>,
    entity: &str,
    value: T,
    result: Result<(), GatewayError>,
    observer: &impl Observer,
) {
    match result {
        Ok(()) => {
            memo.insert(entity.to_string(), value);
        }
        Err(error) => {
            memo.remove(entity);
            observer.report(&EngineEvent::DispatchFailed {
                entity: entity.to_string(),
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::RecordingObserver,
        testing::{Command, FakeHome},
    };
    use pretty_assertions::assert_eq;

    fn config() -> ThermostatConfig {
        ThermostatConfig {
            heater: "climate.radiator".to_string(),
            cooler: Some("climate.aircon".to_string()),
            override_mode: OverrideMode::Disabled,
            ..ThermostatConfig::default()
        }
    }

    fn decision(mode: HvacMode, output: ActiveOutput) -> ControlDecision {
        ControlDecision {
            hvac_mode: mode,
            active_output: output,
            target_temperature: 22.0,
            preset_mode: None,
            forced: false,
        }
    }

    fn set_mode(entity: &str, mode: HvacMode) -> Command {
        Command::SetMode {
            entity: entity.to_string(),
            mode,
        }
    }

    #[test]
    fn switches_off_before_switching_on() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut dispatcher = ActuationDispatcher::new(&config());

        dispatcher.dispatch(&decision(HvacMode::Auto, ActiveOutput::Cooling), None, &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![
                set_mode("climate.radiator", HvacMode::Off),
                set_mode("climate.aircon", HvacMode::Cool),
            ]
        );

        dispatcher.dispatch(&decision(HvacMode::Auto, ActiveOutput::Heating), None, &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![
                set_mode("climate.aircon", HvacMode::Off),
                set_mode("climate.radiator", HvacMode::Heat),
            ]
        );
    }

    #[test]
    fn never_commands_both_actuators_on() {
        let outputs = [
            ActiveOutput::None,
            ActiveOutput::Heating,
            ActiveOutput::Cooling,
            ActiveOutput::Heating,
            ActiveOutput::None,
        ];
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut dispatcher = ActuationDispatcher::new(&config());

        for output in outputs {
            dispatcher.dispatch(&decision(HvacMode::Auto, output), None, &home, &observer);
            let heater = home.commanded_mode("climate.radiator");
            let cooler = home.commanded_mode("climate.aircon");
            assert!(
                !(heater == Some(HvacMode::Heat) && cooler == Some(HvacMode::Cool)),
                "both on after {output:?}"
            );
        }
    }

    #[test]
    fn unchanged_decision_sends_nothing() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut dispatcher = ActuationDispatcher::new(&ThermostatConfig {
            override_entity: Some("number.display".to_string()),
            override_mode: OverrideMode::ExternalValue,
            ..config()
        });
        let heating = decision(HvacMode::Heat, ActiveOutput::Heating);

        dispatcher.dispatch(&heating, Some(20.5), &home, &observer);
        assert_eq!(home.take_commands().len(), 3);

        dispatcher.dispatch(&heating, Some(20.5), &home, &observer);
        assert!(home.take_commands().is_empty());

        dispatcher.resync();
        dispatcher.dispatch(&heating, Some(20.5), &home, &observer);
        assert_eq!(home.take_commands().len(), 3);
    }

    #[test]
    fn failed_command_is_reported_and_resent() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut dispatcher = ActuationDispatcher::new(&config());
        let heating = decision(HvacMode::Heat, ActiveOutput::Heating);

        home.fail("climate.radiator");
        dispatcher.dispatch(&heating, None, &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![set_mode("climate.aircon", HvacMode::Off)]
        );
        assert_eq!(
            observer.events(),
            vec![EngineEvent::DispatchFailed {
                entity: "climate.radiator".to_string(),
                error: GatewayError::Rejected {
                    entity: "climate.radiator".to_string(),
                    reason: "simulated failure".to_string(),
                },
            }]
        );

        home.recover("climate.radiator");
        dispatcher.dispatch(&heating, None, &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![set_mode("climate.radiator", HvacMode::Heat)]
        );
    }

    #[test]
    fn mirrors_reading_or_offset() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let idle = decision(HvacMode::Heat, ActiveOutput::None);

        let mut external = ActuationDispatcher::new(&ThermostatConfig {
            override_entity: Some("input_number.room".to_string()),
            override_mode: OverrideMode::ExternalValue,
            ..config()
        });
        external.dispatch(&idle, Some(21.3), &home, &observer);
        assert_eq!(
            home.take_commands().last(),
            Some(&Command::SetValue {
                entity: "input_number.room".to_string(),
                value: 21.3,
            })
        );

        let mut offset = ActuationDispatcher::new(&ThermostatConfig {
            override_thermostat: Some("climate.display".to_string()),
            override_entity: Some("number.display_offset".to_string()),
            override_mode: OverrideMode::OffsetMode,
            ..config()
        });
        home.set_local_temp("climate.display", 20.0);
        offset.dispatch(&idle, Some(21.26), &home, &observer);
        assert_eq!(
            home.take_commands().last(),
            Some(&Command::SetValue {
                entity: "number.display_offset".to_string(),
                value: 1.3,
            })
        );
    }

    #[test]
    fn replays_mode_and_target_onto_override_thermostat() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut dispatcher = ActuationDispatcher::new(&ThermostatConfig {
            cooler: None,
            override_thermostat: Some("climate.display".to_string()),
            replay_to_override: true,
            ..config()
        });

        dispatcher.dispatch(&decision(HvacMode::Heat, ActiveOutput::None), None, &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![
                set_mode("climate.radiator", HvacMode::Off),
                set_mode("climate.display", HvacMode::Heat),
                Command::SetTarget {
                    entity: "climate.display".to_string(),
                    temp: 22.0,
                },
            ]
        );
    }
}
