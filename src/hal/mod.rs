// src/hal/mod.rs
//! Hardware Abstraction Layer for the pump network and position switches

pub mod traits;
pub mod types;
pub mod simulator;


pub use traits::*;
pub use types::*;

use thiserror::Error;

/// A switch-gated action was requested on a build without switches
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{action} requires position switches, unavailable on {variant:?}")]
pub struct HardwareUnavailable {
    pub action: String,
    pub variant: DeviceVariant,
}

/// Errors raised by pump and switch drivers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HalError {
    #[error(transparent)]
    Unavailable(#[from] HardwareUnavailable),

    #[error("pump {addr} rejected {command}: {reason}")]
    CommandFailed {
        addr: ChannelAddr,
        command: String,
        reason: String,
    },

    #[error("switch '{switch}' could not be read: {reason}")]
    SensorRead { switch: String, reason: String },

    #[error("no pump channel configured for target '{0}'")]
    UnknownChannel(Target),
}

impl HalError {
    pub fn command_failed(addr: ChannelAddr, command: &str, reason: impl Into<String>) -> Self {
        HalError::CommandFailed {
            addr,
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// Hardware handles owned by the engine for one device
pub struct Hardware {
    pub pumps: Box<dyn PumpNetwork>,
    /// Absent on the switchless variant
    pub switches: Option<Box<dyn SwitchSensor>>,
}

impl Hardware {
    pub fn new(pumps: Box<dyn PumpNetwork>, switches: Option<Box<dyn SwitchSensor>>) -> Self {
        Self { pumps, switches }
    }

    /// Simulated device plus inspection handles sharing its state
    pub fn simulated(
        config: simulator::SimulatorConfig,
        with_switches: bool,
    ) -> (Self, simulator::SimulatedPumpNetwork, simulator::SimulatedSwitches) {
        let (pumps, switches) = simulator::simulated_device(config);
        let sensor: Option<Box<dyn SwitchSensor>> = if with_switches {
            Some(Box::new(switches.clone()))
        } else {
            None
        };
        (Self::new(Box::new(pumps.clone()), sensor), pumps, switches)
    }
}
