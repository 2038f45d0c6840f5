//! Observability for the decision core.
//!
//! Components report what happened through an [`Observer`] handed to them by
//! the owner, instead of writing to a process-wide logger. The host uses
//! [`TracingObserver`]; tests record events to assert on what was reported.

#[cfg(test)]
use std::cell::RefCell;

use tracing::{debug, info, warn};

use crate::{
    error::{CommandError, GatewayError},
    types::{ActiveOutput, HvacMode, WindowMode},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    InvalidReading {
        entity: String,
        raw: String,
    },
    SensorUnavailable {
        entity: String,
    },
    OutputChanged {
        from: ActiveOutput,
        to: ActiveOutput,
        temperature: f64,
        forced: bool,
    },
    /// A boundary was crossed but the run/idle timer has not elapsed yet.
    TransitionDeferred {
        wanted: ActiveOutput,
        remaining_ms: u64,
    },
    WindowOpened {
        window_mode: WindowMode,
    },
    WindowClosed {
        restored_mode: HvacMode,
        restored_target: f64,
    },
    CommandRejected {
        error: CommandError,
    },
    DispatchFailed {
        entity: String,
        error: GatewayError,
    },
    OffsetUpdated {
        actuator: String,
        previous: f64,
        applied: f64,
        reference: f64,
        local: f64,
    },
    OffsetUnchanged {
        actuator: String,
        offset: f64,
        difference: f64,
    },
    CalibrationSkipped {
        actuator: String,
        reason: &'static str,
    },
}

pub trait Observer {
    fn report(&self, event: &EngineEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn report(&self, event: &EngineEvent) {
        match event {
            EngineEvent::InvalidReading { entity, raw } => {
                warn!("invalid value from {entity}: {raw:?}");
            }
            EngineEvent::SensorUnavailable { entity } => {
                debug!("sensor {entity} unavailable");
            }
            EngineEvent::OutputChanged {
                from,
                to,
                temperature,
                forced,
            } => {
                info!(
                    "output {} -> {} at {temperature:.1}°C{}",
                    from.as_str(),
                    to.as_str(),
                    if *forced { " (forced)" } else { "" }
                );
            }
            EngineEvent::TransitionDeferred {
                wanted,
                remaining_ms,
            } => {
                debug!(
                    "anti-short-cycling: {} in {:.0}s",
                    wanted.as_str(),
                    *remaining_ms as f64 / 1_000.0
                );
            }
            EngineEvent::WindowOpened { window_mode } => {
                info!("window opened, applying window mode {}", window_mode.as_str());
            }
            EngineEvent::WindowClosed {
                restored_mode,
                restored_target,
            } => {
                info!(
                    "window closed, restoring {} at {restored_target:.1}°C",
                    restored_mode.as_str()
                );
            }
            EngineEvent::CommandRejected { error } => {
                warn!("command rejected: {error}");
            }
            EngineEvent::DispatchFailed { entity, error } => {
                warn!("command to {entity} failed: {error}");
            }
            EngineEvent::OffsetUpdated {
                actuator,
                previous,
                applied,
                reference,
                local,
            } => {
                info!(
                    "{actuator} offset updated: {previous:.1}°C -> {applied:.1}°C \
                     (sensor: {reference:.1}°C, local: {local:.1}°C)"
                );
            }
            EngineEvent::OffsetUnchanged {
                actuator,
                offset,
                difference,
            } => {
                debug!("{actuator} offset unchanged: {offset:.1}°C (diff: {difference:.1}°C)");
            }
            EngineEvent::CalibrationSkipped { actuator, reason } => {
                debug!("{actuator} calibration skipped: {reason}");
            }
        }
    }
}

impl<T: Observer + ?Sized> Observer for &T {
    fn report(&self, event: &EngineEvent) {
        (**self).report(event);
    }
}

/// Keeps every reported event in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<EngineEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }
}

#[cfg(test)]
impl Observer for RecordingObserver {
    fn report(&self, event: &EngineEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
