use crate::{
    config::{ThermostatConfig, DEFAULT_PRESET},
    error::CommandError,
    events::{EngineEvent, Observer},
    types::{ActiveOutput, ControlDecision, HvacMode, SensorSnapshot, WindowMode},
};

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub hvac_mode: HvacMode,
    pub target_temperature: f64,
    pub preset_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub hvac_mode: HvacMode,
    pub preset_mode: Option<String>,
    pub target_temperature: f64,
    pub active_output: ActiveOutput,
    pub last_transition_ms: Option<u64>,
    // Some while a window override is in effect.
    pub saved_snapshot: Option<WindowSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    pub config: ThermostatConfig,
    state: ControlState,
}

impl ThermostatEngine {
    pub fn new(mut config: ThermostatConfig) -> Self {
        config.sanitize();
        let preset_mode = config
            .presets
            .contains_key(DEFAULT_PRESET)
            .then(|| DEFAULT_PRESET.to_string());
        let state = ControlState {
            hvac_mode: HvacMode::Heat,
            preset_mode,
            target_temperature: config.initial_target(),
            active_output: ActiveOutput::None,
            last_transition_ms: None,
            saved_snapshot: None,
        };
        Self { config, state }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.state.hvac_mode
    }

    pub fn target_temperature(&self) -> f64 {
        self.state.target_temperature
    }

    pub fn preset_mode(&self) -> Option<&str> {
        self.state.preset_mode.as_deref()
    }

    pub fn active_output(&self) -> ActiveOutput {
        self.state.active_output
    }

    pub fn is_window_override_active(&self) -> bool {
        self.state.saved_snapshot.is_some()
    }

    pub fn supported_modes(&self) -> Vec<HvacMode> {
        let mut modes = vec![HvacMode::Off, HvacMode::Heat];
        if self.config.has_cooler() {
            modes.extend([HvacMode::Cool, HvacMode::Auto]);
        }
        modes
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.config.presets.keys().cloned().collect()
    }

    pub fn set_target(&mut self, temp: f64) -> Result<bool, CommandError> {
        if !temp.is_finite() {
            return Err(CommandError::InvalidTarget(temp));
        }
        let clamped = self.config.clamp_target(temp);
        let slot = match self.state.saved_snapshot.as_mut() {
            Some(saved) => &mut saved.target_temperature,
            None => &mut self.state.target_temperature,
        };
        if (*slot - clamped).abs() > f64::EPSILON {
            *slot = clamped;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn set_mode(&mut self, mode: HvacMode) -> Result<bool, CommandError> {
        if mode.requires_cooler() && !self.config.has_cooler() {
            return Err(CommandError::UnsupportedMode(mode));
        }
        let slot = match self.state.saved_snapshot.as_mut() {
            Some(saved) => &mut saved.hvac_mode,
            None => &mut self.state.hvac_mode,
        };
        if *slot != mode {
            *slot = mode;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn set_preset(&mut self, name: &str) -> Result<bool, CommandError> {
        let Some(&temp) = self.config.presets.get(name) else {
            return Err(CommandError::UnknownPreset(name.to_string()));
        };
        let slot = match self.state.saved_snapshot.as_mut() {
            Some(saved) => &mut saved.preset_mode,
            None => &mut self.state.preset_mode,
        };
        let preset_changed = slot.as_deref() != Some(name);
        *slot = Some(name.to_string());
        let target_changed = self.set_target(temp)?;
        Ok(preset_changed || target_changed)
    }

    pub fn turn_on(&mut self) -> bool {
        let current = self
            .state
            .saved_snapshot
            .as_ref()
            .map(|saved| saved.hvac_mode)
            .unwrap_or(self.state.hvac_mode);
        if current != HvacMode::Off {
            return false;
        }
        self.set_mode(HvacMode::Heat).unwrap_or(false)
    }

    pub fn turn_off(&mut self) -> bool {
        self.set_mode(HvacMode::Off).unwrap_or(false)
    }

    /// `None` when there is no temperature to act on; state is untouched then.
    pub fn evaluate(
        &mut self,
        snapshot: &SensorSnapshot,
        now_ms: u64,
        observer: &impl Observer,
    ) -> Option<ControlDecision> {
        let temp = snapshot.temperature?;

        if snapshot.window_open {
            // Only the opening cycle bypasses the run/idle timers.
            let opened = self.state.saved_snapshot.is_none();
            if opened {
                self.state.saved_snapshot = Some(WindowSnapshot {
                    hvac_mode: self.state.hvac_mode,
                    target_temperature: self.state.target_temperature,
                    preset_mode: self.state.preset_mode.clone(),
                });
                observer.report(&EngineEvent::WindowOpened {
                    window_mode: self.config.window_mode,
                });
            }
            self.apply_window_mode();
            self.run_mode(temp, now_ms, opened, observer);
            return Some(self.decision(opened));
        }

        if let Some(saved) = self.state.saved_snapshot.take() {
            self.state.hvac_mode = saved.hvac_mode;
            self.state.target_temperature = saved.target_temperature;
            self.state.preset_mode = saved.preset_mode;
            observer.report(&EngineEvent::WindowClosed {
                restored_mode: saved.hvac_mode,
                restored_target: saved.target_temperature,
            });
        }

        self.run_mode(temp, now_ms, false, observer);
        Some(self.decision(false))
    }

    fn apply_window_mode(&mut self) {
        match self.config.window_mode {
            WindowMode::Off => {
                self.state.hvac_mode = HvacMode::Off;
            }
            WindowMode::Frost => {
                self.state.hvac_mode = HvacMode::Heat;
                self.state.target_temperature = self.config.clamp_target(self.config.frost_temp);
            }
        }
    }

    fn run_mode(&mut self, temp: f64, now_ms: u64, forced: bool, observer: &impl Observer) {
        match self.state.hvac_mode {
            HvacMode::Off => {
                self.switch_to(ActiveOutput::None, temp, now_ms, forced, observer);
            }
            HvacMode::Heat => {
                self.control_single(ActiveOutput::Heating, temp, now_ms, forced, observer);
            }
            HvacMode::Cool => {
                self.control_single(ActiveOutput::Cooling, temp, now_ms, forced, observer);
            }
            HvacMode::Auto => self.control_auto(temp, now_ms, forced, observer),
        }
    }

    fn band(&self) -> (f64, f64) {
        (
            self.state.target_temperature - self.config.deadband,
            self.state.target_temperature + self.config.deadband,
        )
    }

    fn control_single(
        &mut self,
        output: ActiveOutput,
        temp: f64,
        now_ms: u64,
        forced: bool,
        observer: &impl Observer,
    ) {
        // An output the current mode does not drive is dropped straight away.
        if self.state.active_output.is_on() && self.state.active_output != output {
            self.switch_to(ActiveOutput::None, temp, now_ms, forced, observer);
        }

        let (lower, upper) = self.band();
        let (needs_output, satisfied) = match output {
            ActiveOutput::Cooling => (temp > upper, temp < lower),
            _ => (temp < lower, temp > upper),
        };
        let running = self.state.active_output == output;

        if needs_output && !running {
            self.try_switch(output, temp, now_ms, forced, observer);
        } else if satisfied && running {
            self.try_switch(ActiveOutput::None, temp, now_ms, forced, observer);
        }
    }

    fn control_auto(&mut self, temp: f64, now_ms: u64, forced: bool, observer: &impl Observer) {
        let (lower, upper) = self.band();
        let desired = if temp < lower {
            ActiveOutput::Heating
        } else if temp > upper {
            ActiveOutput::Cooling
        } else {
            return;
        };
        if desired != self.state.active_output {
            self.try_switch(desired, temp, now_ms, forced, observer);
        }
    }

    fn try_switch(
        &mut self,
        to: ActiveOutput,
        temp: f64,
        now_ms: u64,
        forced: bool,
        observer: &impl Observer,
    ) {
        let required_ms = if self.state.active_output.is_on() {
            self.config.min_run_ms()
        } else {
            self.config.min_idle_ms()
        };
        let remaining_ms = self.remaining_ms(required_ms, now_ms);

        if forced || remaining_ms == 0 {
            self.switch_to(to, temp, now_ms, forced, observer);
        } else {
            observer.report(&EngineEvent::TransitionDeferred {
                wanted: to,
                remaining_ms,
            });
        }
    }

    fn remaining_ms(&self, required_ms: u64, now_ms: u64) -> u64 {
        match self.state.last_transition_ms {
            Some(last) => required_ms.saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }

    fn switch_to(
        &mut self,
        to: ActiveOutput,
        temp: f64,
        now_ms: u64,
        forced: bool,
        observer: &impl Observer,
    ) {
        let from = self.state.active_output;
        if from == to {
            return;
        }
        self.state.active_output = to;
        self.state.last_transition_ms = Some(now_ms);
        observer.report(&EngineEvent::OutputChanged {
            from,
            to,
            temperature: temp,
            forced,
        });
    }

    fn decision(&self, forced: bool) -> ControlDecision {
        ControlDecision {
            hvac_mode: self.state.hvac_mode,
            active_output: self.state.active_output,
            target_temperature: self.state.target_temperature,
            preset_mode: self.state.preset_mode.clone(),
            forced,
        }
    }
}
