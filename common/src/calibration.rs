//! Closed-loop correction of an actuator's own temperature sensor.
//!
//! Each cycle the offset entity of a linked actuator is moved by the full
//! difference between the reference reading and what the actuator reports
//! (gain 1), rounded to 0.1°C. Changes smaller than [`OFFSET_DEAD_ZONE`] are
//! not written.

use crate::{
    config::ThermostatConfig,
    events::{EngineEvent, Observer},
    traits::{ActuatorGateway, NumericSink, SensorRegistry, SensorValue},
};

/// Smallest offset change worth writing, inclusive.
pub const OFFSET_DEAD_ZONE: f64 = 0.1;

const FLOAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationLink {
    pub actuator_id: String,
    pub offset_entity: String,
    pub last_applied_offset: Option<f64>,
}

impl CalibrationLink {
    fn new(actuator_id: &str, offset_entity: &str) -> Self {
        Self {
            actuator_id: actuator_id.to_string(),
            offset_entity: offset_entity.to_string(),
            last_applied_offset: None,
        }
    }
}

pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Offset to write, or `None` when the change falls inside the dead zone.
pub fn next_offset(current_offset: f64, reference: f64, local: f64) -> Option<f64> {
    let new_offset = round_tenth(current_offset + (reference - local));
    ((new_offset - current_offset).abs() >= OFFSET_DEAD_ZONE - FLOAT_TOLERANCE)
        .then_some(new_offset)
}

#[derive(Debug, Clone)]
pub struct AutoCalibrator {
    enabled: bool,
    links: Vec<CalibrationLink>,
}

impl AutoCalibrator {
    pub fn new(config: &ThermostatConfig) -> Self {
        let mut links = Vec::new();
        if let Some(offset) = non_empty(config.heater_offset_entity.as_deref()) {
            if !config.heater.is_empty() {
                links.push(CalibrationLink::new(&config.heater, offset));
            }
        }
        if let (Some(cooler), Some(offset)) = (
            non_empty(config.cooler.as_deref()),
            non_empty(config.cooler_offset_entity.as_deref()),
        ) {
            links.push(CalibrationLink::new(cooler, offset));
        }

        Self {
            enabled: config.auto_offset_update,
            links,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.links.is_empty()
    }

    pub fn links(&self) -> &[CalibrationLink] {
        &self.links
    }

    /// One calibration pass over every link.
    pub fn run<H>(&mut self, reference: Option<f64>, home: &H, observer: &impl Observer)
    where
        H: SensorRegistry + ActuatorGateway + NumericSink,
    {
        if !self.enabled {
            return;
        }
        let Some(reference) = reference else {
            return;
        };

        for link in &mut self.links {
            calibrate_link(link, reference, home, observer);
        }
    }
}

fn calibrate_link<H>(
    link: &mut CalibrationLink,
    reference: f64,
    home: &H,
    observer: &impl Observer,
) where
    H: SensorRegistry + ActuatorGateway + NumericSink,
{
    let skip = |reason: &'static str| {
        observer.report(&EngineEvent::CalibrationSkipped {
            actuator: link.actuator_id.clone(),
            reason,
        });
    };

    let Some(local) = home.get_reported_local_temp(&link.actuator_id) else {
        skip("no local temperature reported");
        return;
    };

    let current_offset = match home.get_value(&link.offset_entity) {
        SensorValue::Numeric(value) => value,
        SensorValue::Invalid(raw) => {
            observer.report(&EngineEvent::InvalidReading {
                entity: link.offset_entity.clone(),
                raw,
            });
            0.0
        }
        SensorValue::Unavailable => {
            skip("offset entity unavailable");
            return;
        }
    };

    let Some(new_offset) = next_offset(current_offset, reference, local) else {
        observer.report(&EngineEvent::OffsetUnchanged {
            actuator: link.actuator_id.clone(),
            offset: current_offset,
            difference: reference - local,
        });
        return;
    };

    match home.set_value(&link.offset_entity, new_offset) {
        Ok(()) => {
            link.last_applied_offset = Some(new_offset);
            observer.report(&EngineEvent::OffsetUpdated {
                actuator: link.actuator_id.clone(),
                previous: current_offset,
                applied: new_offset,
                reference,
                local,
            });
        }
        Err(error) => observer.report(&EngineEvent::DispatchFailed {
            entity: link.offset_entity.clone(),
            error,
        }),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
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
            heater: "climate.trv".to_string(),
            heater_offset_entity: Some("number.trv_offset".to_string()),
            auto_offset_update: true,
            ..ThermostatConfig::default()
        }
    }

    #[test]
    fn dead_zone_boundary_is_inclusive() {
        assert_eq!(next_offset(0.0, 22.0, 20.0), Some(2.0));
        assert_eq!(next_offset(2.0, 22.0, 21.9), Some(2.1));
        assert_eq!(next_offset(2.0, 22.0, 21.97), None);
        assert_eq!(next_offset(-1.0, 19.0, 20.5), Some(-2.5));
    }

    #[test]
    fn converges_over_cycles() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut calibrator = AutoCalibrator::new(&config());

        home.set_state("number.trv_offset", "0.0");
        home.set_local_temp("climate.trv", 20.0);
        calibrator.run(Some(22.0), &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![Command::SetValue {
                entity: "number.trv_offset".to_string(),
                value: 2.0,
            }]
        );
        assert_eq!(calibrator.links()[0].last_applied_offset, Some(2.0));

        home.set_local_temp("climate.trv", 21.9);
        calibrator.run(Some(22.0), &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![Command::SetValue {
                entity: "number.trv_offset".to_string(),
                value: 2.1,
            }]
        );

        home.set_local_temp("climate.trv", 22.0);
        calibrator.run(Some(22.0), &home, &observer);
        assert!(home.take_commands().is_empty());
    }

    #[test]
    fn disabled_or_unlinked_does_nothing() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        home.set_state("number.trv_offset", "0.0");
        home.set_local_temp("climate.trv", 20.0);

        let mut calibrator = AutoCalibrator::new(&ThermostatConfig {
            auto_offset_update: false,
            ..config()
        });
        calibrator.run(Some(22.0), &home, &observer);
        assert!(!calibrator.is_enabled());

        let mut calibrator = AutoCalibrator::new(&ThermostatConfig {
            heater_offset_entity: None,
            ..config()
        });
        calibrator.run(Some(22.0), &home, &observer);
        assert!(!calibrator.is_enabled());

        assert!(home.take_commands().is_empty());
    }

    #[test]
    fn unreadable_inputs_skip_or_fall_back() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut calibrator = AutoCalibrator::new(&config());

        home.set_state("number.trv_offset", "1.0");
        calibrator.run(Some(22.0), &home, &observer);
        assert!(home.take_commands().is_empty());

        // A garbage offset is treated as zero.
        home.set_local_temp("climate.trv", 21.0);
        home.set_state("number.trv_offset", "garbage");
        calibrator.run(Some(22.0), &home, &observer);
        assert_eq!(
            home.take_commands(),
            vec![Command::SetValue {
                entity: "number.trv_offset".to_string(),
                value: 1.0,
            }]
        );
    }

    #[test]
    fn write_failure_is_reported_and_retried_next_cycle() {
        let home = FakeHome::default();
        let observer = RecordingObserver::default();
        let mut calibrator = AutoCalibrator::new(&config());
        home.set_state("number.trv_offset", "0.0");
        home.set_local_temp("climate.trv", 20.0);

        home.fail("number.trv_offset");
        calibrator.run(Some(22.0), &home, &observer);
        assert!(matches!(
            observer.events().last(),
            Some(EngineEvent::DispatchFailed { .. })
        ));
        assert_eq!(calibrator.links()[0].last_applied_offset, None);

        home.recover("number.trv_offset");
        calibrator.run(Some(22.0), &home, &observer);
        assert_eq!(calibrator.links()[0].last_applied_offset, Some(2.0));
    }

    #[test]
    fn links_heater_and_cooler_separately() {
        let calibrator = AutoCalibrator::new(&ThermostatConfig {
            cooler: Some("climate.aircon".to_string()),
            cooler_offset_entity: Some("number.aircon_offset".to_string()),
            ..config()
        });

        let actuators: Vec<_> = calibrator
            .links()
            .iter()
            .map(|link| link.actuator_id.as_str())
            .collect();
        assert_eq!(actuators, vec!["climate.trv", "climate.aircon"]);
    }
}
