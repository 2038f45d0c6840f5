pub const TOPIC_STATE_PREFIX: &str = "eco_thermostat/state/";
pub const TOPIC_STATE_WILDCARD: &str = "eco_thermostat/state/#";
pub const TOPIC_ENTITY_CMND_PREFIX: &str = "eco_thermostat/cmnd/";

pub const TOPIC_THERMOSTAT_STATE: &str = "eco_thermostat/thermostat/state";

pub const TOPIC_CMD_MODE: &str = "eco_thermostat/thermostat/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "eco_thermostat/thermostat/cmnd/target";
pub const TOPIC_CMD_PRESET: &str = "eco_thermostat/thermostat/cmnd/preset";
pub const TOPIC_CMD_POWER: &str = "eco_thermostat/thermostat/cmnd/power";

pub const LOCAL_TEMP_SUFFIX: &str = "/current_temperature";

/// Outbound command kinds, one topic leaf each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCommand {
    HvacMode,
    Temperature,
    SetValue,
}

impl EntityCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HvacMode => "hvac_mode",
            Self::Temperature => "temperature",
            Self::SetValue => "set_value",
        }
    }
}

pub fn entity_command_topic(entity_id: &str, command: EntityCommand) -> String {
    format!("{TOPIC_ENTITY_CMND_PREFIX}{entity_id}/{}", command.as_str())
}

/// What a message under the state prefix describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTopic<'a> {
    Entity(&'a str),
    LocalTemperature(&'a str),
}

pub fn parse_state_topic(topic: &str) -> Option<StateTopic<'_>> {
    let rest = topic.strip_prefix(TOPIC_STATE_PREFIX)?;
    if let Some(entity) = rest.strip_suffix(LOCAL_TEMP_SUFFIX) {
        return (!entity.is_empty()).then_some(StateTopic::LocalTemperature(entity));
    }
    (!rest.is_empty() && !rest.contains('/')).then_some(StateTopic::Entity(rest))
}
