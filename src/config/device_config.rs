// src/config/device_config.rs
//! Device-specific configuration and the immutable per-run device context

use crate::config::constants::{pumps, switches};
use crate::hal::{ChannelAddr, DeviceVariant, HalError, SwitchRole, Target};
use serde::{Deserialize, Serialize};

/// Hardware description of one device
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "defaults::variant")]
    pub variant: DeviceVariant,

    #[serde(default = "defaults::waste_addr")]
    pub waste_addr: u8,

    /// Ignored on the switchless build, which carries a single pump
    #[serde(default = "defaults::lysate_addr")]
    pub lysate_addr: Option<u8>,

    #[serde(default = "defaults::diameter_mm")]
    pub waste_diameter_mm: f64,

    #[serde(default)]
    pub lysate_diameter_mm: Option<f64>,

    /// Calibrated post-grab rate (ml/min); supersedes protocol values
    #[serde(default)]
    pub post_run_rate_mm: Option<f64>,

    /// Calibrated post-grab volume (ml); supersedes protocol values
    #[serde(default)]
    pub post_run_vol_ml: Option<f64>,

    #[serde(default)]
    pub switches: SwitchNames,

    #[serde(default = "defaults::serial_port")]
    pub serial_port: String,

    #[serde(default = "defaults::baud_rate")]
    pub baud_rate: u32,
}

/// Microcontroller pin names of the four position switches
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SwitchNames {
    pub waste_home: String,
    pub lysate_home: String,
    pub waste_grab: String,
    pub lysate_grab: String,
}

impl Default for SwitchNames {
    fn default() -> Self {
        Self {
            waste_home: switches::WASTE_HOME.to_string(),
            lysate_home: switches::LYSATE_HOME.to_string(),
            waste_grab: switches::WASTE_GRAB.to_string(),
            lysate_grab: switches::LYSATE_GRAB.to_string(),
        }
    }
}

mod defaults {
    use crate::config::constants::pumps;
    use crate::hal::DeviceVariant;

    pub fn variant() -> DeviceVariant { DeviceVariant::WithSwitches }
    pub fn waste_addr() -> u8 { pumps::DEFAULT_WASTE_ADDR }
    pub fn lysate_addr() -> Option<u8> { Some(pumps::DEFAULT_LYSATE_ADDR) }
    pub fn diameter_mm() -> f64 { pumps::DEFAULT_SYRINGE_DIAMETER_MM }
    pub fn serial_port() -> String { pumps::DEFAULT_SERIAL_PORT.to_string() }
    pub fn baud_rate() -> u32 { pumps::DEFAULT_BAUD_RATE }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            variant: defaults::variant(),
            waste_addr: defaults::waste_addr(),
            lysate_addr: defaults::lysate_addr(),
            waste_diameter_mm: defaults::diameter_mm(),
            lysate_diameter_mm: Some(defaults::diameter_mm()),
            post_run_rate_mm: None,
            post_run_vol_ml: None,
            switches: SwitchNames::default(),
            serial_port: defaults::serial_port(),
            baud_rate: defaults::baud_rate(),
        }
    }
}

impl DeviceConfig {
    /// Freeze this configuration into the context handed to a run
    pub fn context(&self) -> DeviceContext {
        DeviceContext {
            variant: self.variant,
            waste: ChannelAddr(self.waste_addr),
            lysate: self
                .lysate_addr
                .filter(|_| self.variant.has_switches())
                .map(ChannelAddr),
            calibration: Calibration {
                post_run_rate_mm: self.post_run_rate_mm,
                post_run_vol_ml: self.post_run_vol_ml,
            },
            switches: self.switches.clone(),
        }
    }
}

/// Device calibration overrides for the post-grab precision run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub post_run_rate_mm: Option<f64>,
    pub post_run_vol_ml: Option<f64>,
}

impl Calibration {
    /// Resolve the post-run rate and volume; calibration wins over the protocol
    pub fn resolve(&self, protocol_rate: f64, protocol_volume: f64) -> (f64, f64) {
        (
            self.post_run_rate_mm.unwrap_or(protocol_rate),
            self.post_run_vol_ml.unwrap_or(protocol_volume),
        )
    }
}

/// Immutable hardware context for one run
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceContext {
    pub variant: DeviceVariant,
    pub waste: ChannelAddr,
    pub lysate: Option<ChannelAddr>,
    pub calibration: Calibration,
    pub switches: SwitchNames,
}

impl DeviceContext {
    /// Physical address of a protocol target
    pub fn resolve(&self, target: Target) -> Result<ChannelAddr, HalError> {
        match target {
            Target::Waste => Ok(self.waste),
            Target::Lysate => self.lysate.ok_or(HalError::UnknownChannel(target)),
        }
    }

    /// Every pump channel on the device
    pub fn channels(&self) -> Vec<ChannelAddr> {
        std::iter::once(self.waste).chain(self.lysate).collect()
    }

    /// Pin name of the switch watching a target's carriage
    pub fn switch_name(&self, target: Target, role: SwitchRole) -> &str {
        match (target, role) {
            (Target::Waste, SwitchRole::Home) => &self.switches.waste_home,
            (Target::Lysate, SwitchRole::Home) => &self.switches.lysate_home,
            (Target::Waste, SwitchRole::Grab) => &self.switches.waste_grab,
            (Target::Lysate, SwitchRole::Grab) => &self.switches.lysate_grab,
        }
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        DeviceConfig::default().context()
    }
}

/// Device configuration validation
pub fn validate_device_config(config: &DeviceConfig) -> Result<(), String> {
    if config.waste_addr > pumps::MAX_PUMP_ADDR {
        return Err(format!("Waste pump address {} out of range", config.waste_addr));
    }
    match (config.variant, config.lysate_addr) {
        (DeviceVariant::WithSwitches, None) => {
            return Err("Switch-equipped device requires a lysate pump address".to_string());
        }
        (DeviceVariant::WithSwitches, Some(addr)) if addr > pumps::MAX_PUMP_ADDR => {
            return Err(format!("Lysate pump address {} out of range", addr));
        }
        (DeviceVariant::WithSwitches, Some(addr)) if addr == config.waste_addr => {
            return Err("Waste and lysate pumps must have distinct addresses".to_string());
        }
        _ => {}
    }

    let diameter_range = pumps::MIN_SYRINGE_DIAMETER_MM..=pumps::MAX_SYRINGE_DIAMETER_MM;
    if !diameter_range.contains(&config.waste_diameter_mm) {
        return Err(format!("Waste syringe diameter {} mm out of range", config.waste_diameter_mm));
    }
    if let Some(diameter) = config.lysate_diameter_mm {
        if !diameter_range.contains(&diameter) {
            return Err(format!("Lysate syringe diameter {} mm out of range", diameter));
        }
    }

    if config.post_run_rate_mm.is_some_and(|rate| rate <= 0.0) {
        return Err("Calibrated post-run rate must be greater than 0".to_string());
    }
    if config.post_run_vol_ml.is_some_and(|vol| vol <= 0.0) {
        return Err("Calibrated post-run volume must be greater than 0".to_string());
    }
    if config.serial_port.is_empty() {
        return Err("Serial port name cannot be empty".to_string());
    }
    if config.baud_rate == 0 {
        return Err("Serial baud rate must be greater than 0".to_string());
    }
    Ok(())
}
