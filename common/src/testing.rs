use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use crate::{
    error::GatewayError,
    traits::{ActuatorGateway, ContactRegistry, NumericSink, SensorRegistry, SensorValue},
    types::HvacMode,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode { entity: String, mode: HvacMode },
    SetTarget { entity: String, temp: f64 },
    SetValue { entity: String, value: f64 },
}

/// In-memory entity states plus a log of every command sent.
#[derive(Debug, Default)]
pub struct FakeHome {
    states: RefCell<HashMap<String, String>>,
    local_temps: RefCell<HashMap<String, f64>>,
    commands: RefCell<Vec<Command>>,
    failing: RefCell<HashSet<String>>,
}

impl FakeHome {
    pub fn set_state(&self, entity: &str, state: &str) {
        self.states
            .borrow_mut()
            .insert(entity.to_string(), state.to_string());
    }

    pub fn set_local_temp(&self, actuator: &str, temp: f64) {
        self.local_temps
            .borrow_mut()
            .insert(actuator.to_string(), temp);
    }

    pub fn fail(&self, entity: &str) {
        self.failing.borrow_mut().insert(entity.to_string());
    }

    pub fn recover(&self, entity: &str) {
        self.failing.borrow_mut().remove(entity);
    }

    pub fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    pub fn commanded_mode(&self, entity: &str) -> Option<HvacMode> {
        self.commands
            .borrow()
            .iter()
            .rev()
            .find_map(|command| match command {
                Command::SetMode { entity: target, mode } if target == entity => Some(*mode),
                _ => None,
            })
    }

    fn check(&self, entity: &str) -> Result<(), GatewayError> {
        if self.failing.borrow().contains(entity) {
            return Err(GatewayError::Rejected {
                entity: entity.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

impl SensorRegistry for FakeHome {
    fn get_value(&self, entity_id: &str) -> SensorValue {
        SensorValue::from_state(self.states.borrow().get(entity_id).map(String::as_str))
    }
}

impl ContactRegistry for FakeHome {
    fn is_open(&self, entity_id: &str) -> bool {
        matches!(
            self.states.borrow().get(entity_id).map(String::as_str),
            Some("on" | "open")
        )
    }
}

impl ActuatorGateway for FakeHome {
    fn set_mode(&self, actuator_id: &str, mode: HvacMode) -> Result<(), GatewayError> {
        self.check(actuator_id)?;
        self.commands.borrow_mut().push(Command::SetMode {
            entity: actuator_id.to_string(),
            mode,
        });
        Ok(())
    }

    fn set_target(&self, actuator_id: &str, temp: f64) -> Result<(), GatewayError> {
        self.check(actuator_id)?;
        self.commands.borrow_mut().push(Command::SetTarget {
            entity: actuator_id.to_string(),
            temp,
        });
        Ok(())
    }

    fn get_reported_local_temp(&self, actuator_id: &str) -> Option<f64> {
        self.local_temps.borrow().get(actuator_id).copied()
    }
}

impl NumericSink for FakeHome {
    fn set_value(&self, entity_id: &str, value: f64) -> Result<(), GatewayError> {
        self.check(entity_id)?;
        self.commands.borrow_mut().push(Command::SetValue {
            entity: entity_id.to_string(),
            value,
        });
        self.set_state(entity_id, &value.to_string());
        Ok(())
    }
}
