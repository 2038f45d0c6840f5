use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    Auto,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "cool" => Some(Self::Cool),
            "auto" | "heat_cool" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Modes that drive the cooler, and so need one configured.
    pub fn requires_cooler(self) -> bool {
        matches!(self, Self::Cool | Self::Auto)
    }
}

/// Which actuator the control loop currently wants running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveOutput {
    #[default]
    None,
    Heating,
    Cooling,
}

impl ActiveOutput {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }

    pub fn is_on(self) -> bool {
        self != Self::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }

    pub fn from_state(mode: HvacMode, output: ActiveOutput) -> Self {
        match (mode, output) {
            (HvacMode::Off, _) => Self::Off,
            (_, ActiveOutput::Heating) => Self::Heating,
            (_, ActiveOutput::Cooling) => Self::Cooling,
            (_, ActiveOutput::None) => Self::Idle,
        }
    }
}

/// What to do while a window is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    Off,
    #[default]
    Frost,
}

impl WindowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Frost => "frost",
        }
    }
}

/// How the conditioned reading is mirrored onto a numeric entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMode {
    Disabled,
    #[default]
    ExternalValue,
    OffsetMode,
}

/// Conditioned inputs for a single evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub window_open: bool,
}

/// Output of one evaluation cycle, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDecision {
    pub hvac_mode: HvacMode,
    pub active_output: ActiveOutput,
    pub target_temperature: f64,
    pub preset_mode: Option<String>,
    /// Set when the decision came from a window override and bypassed the
    /// run/idle timers.
    pub forced: bool,
}

/// Record handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateDecision {
    #[serde(rename = "hvacMode")]
    pub hvac_mode: HvacMode,
    #[serde(rename = "hvacAction")]
    pub hvac_action: HvacAction,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: f64,
    #[serde(rename = "presetMode")]
    pub preset_mode: Option<String>,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<f64>,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetAttribute {
    pub entity: String,
    #[serde(rename = "currentOffset")]
    pub current_offset: Option<f64>,
}

/// Extra attributes exposed next to the decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateAttributes {
    pub deadband: f64,
    #[serde(rename = "minRunSeconds")]
    pub min_run_secs: u64,
    #[serde(rename = "minIdleSeconds")]
    pub min_idle_secs: u64,
    #[serde(rename = "windowMode")]
    pub window_mode: &'static str,
    #[serde(rename = "frostTemp")]
    pub frost_temp: f64,
    #[serde(rename = "autoOffsetUpdate")]
    pub auto_offset_update: bool,
    #[serde(rename = "windowOpen", skip_serializing_if = "Option::is_none")]
    pub window_open: Option<bool>,
    #[serde(rename = "heaterOffset", skip_serializing_if = "Option::is_none")]
    pub heater_offset: Option<OffsetAttribute>,
    #[serde(rename = "coolerOffset", skip_serializing_if = "Option::is_none")]
    pub cooler_offset: Option<OffsetAttribute>,
    #[serde(rename = "supportedModes")]
    pub supported_modes: Vec<HvacMode>,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<String>,
}

/// Retained state document published for the thermostat.
#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatePayload {
    #[serde(flatten)]
    pub decision: ClimateDecision,
    pub attributes: ClimateAttributes,
    #[serde(rename = "updatedEpoch")]
    pub updated_epoch: i64,
}
