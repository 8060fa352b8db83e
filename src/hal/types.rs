// src/hal/types.rs
//! Core types for pump and switch hardware abstraction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of one pump on the shared pump network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelAddr(pub u8);

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical pump role named by protocol files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Waste,
    Lysate,
}

impl Target {
    /// Human label used in operator-facing messages
    pub fn position_label(&self) -> &'static str {
        match self {
            Target::Waste => "1 (waste)",
            Target::Lysate => "2 (lysate)",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Waste => write!(f, "waste"),
            Target::Lysate => write!(f, "lysate"),
        }
    }
}

/// Pump run state as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpStatus {
    Stopped,
    Running,
    Paused,
    Purging,
    Unknown,
}

impl PumpStatus {
    /// Map the single-letter status code of the pump firmware
    pub fn from_code(code: char) -> Self {
        match code {
            'S' => PumpStatus::Stopped,
            'I' | 'W' => PumpStatus::Running,
            'P' => PumpStatus::Paused,
            'X' => PumpStatus::Purging,
            _ => PumpStatus::Unknown,
        }
    }
}

/// Flow rate units understood by the pump firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    /// ml per hour
    MlPerHour,
    /// ml per minute
    MlPerMinute,
}

impl RateUnit {
    pub fn code(&self) -> &'static str {
        match self {
            RateUnit::MlPerHour => "MH",
            RateUnit::MlPerMinute => "MM",
        }
    }
}

/// Volume units understood by the pump firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeUnit {
    Milliliters,
    Microliters,
}

impl VolumeUnit {
    pub fn code(&self) -> &'static str {
        match self {
            VolumeUnit::Milliliters => "ML",
            VolumeUnit::Microliters => "UL",
        }
    }
}

/// Purge direction; forward advances the carriage towards the grab position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeDirection {
    Forward,
    Reverse,
}

/// Hardware build of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceVariant {
    /// V0: two pumps with home/grab switches on a microcontroller link
    #[serde(rename = "V0", alias = "with_switches")]
    WithSwitches,
    /// R0: no position switches
    #[serde(rename = "R0", alias = "switchless")]
    SwitchlessVariant,
}

impl DeviceVariant {
    pub fn has_switches(&self) -> bool {
        matches!(self, DeviceVariant::WithSwitches)
    }
}

/// One hardware command, as recorded by the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum PumpCommand {
    SetRate { addr: ChannelAddr, value: f64, unit: RateUnit },
    SetVolume { addr: ChannelAddr, value: f64, unit: VolumeUnit },
    Run { addr: ChannelAddr },
    Stop { addr: ChannelAddr },
    Purge { addr: ChannelAddr, direction: PurgeDirection },
    SetDiameter { addr: ChannelAddr, diameter_mm: f64 },
    Buzz { addr: ChannelAddr, repetitions: u32 },
    StopAll { addrs: Vec<ChannelAddr> },
}

impl PumpCommand {
    /// Address the command is sent to, `None` for fleet-wide commands
    pub fn addr(&self) -> Option<ChannelAddr> {
        match self {
            PumpCommand::SetRate { addr, .. }
            | PumpCommand::SetVolume { addr, .. }
            | PumpCommand::Run { addr }
            | PumpCommand::Stop { addr }
            | PumpCommand::Purge { addr, .. }
            | PumpCommand::SetDiameter { addr, .. }
            | PumpCommand::Buzz { addr, .. } => Some(*addr),
            PumpCommand::StopAll { .. } => None,
        }
    }
}

/// Switch roles on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchRole {
    Home,
    Grab,
}
