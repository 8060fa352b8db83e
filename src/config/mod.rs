// src/config/mod.rs
//! Configuration management: device description, engine timing, run settings

pub mod constants;
pub mod loader;
pub mod device_config;

pub use constants::*;
pub use loader::{ConfigLoader, ConfigError};
pub use device_config::*;

use crate::utils::time::millis;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete system configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Engine timer periods and delays
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "defaults::progress_tick_ms")]
    pub progress_tick_ms: u64,

    #[serde(default = "defaults::switch_poll_ms")]
    pub switch_poll_ms: u64,

    #[serde(default = "defaults::grab_deadline_ms")]
    pub grab_deadline_ms: u64,

    #[serde(default = "defaults::done_delay_ms")]
    pub done_delay_ms: u64,

    #[serde(default = "defaults::finished_delay_ms")]
    pub finished_delay_ms: u64,

    #[serde(default = "defaults::reset_settle_ms")]
    pub reset_settle_ms: u64,

    #[serde(default = "defaults::completion_buzz")]
    pub completion_buzz_repetitions: u32,

    #[serde(default = "defaults::fault_buzz")]
    pub fault_buzz_repetitions: u32,
}

/// Run selection and operator settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default = "defaults::protocol_dir")]
    pub protocol_dir: PathBuf,

    #[serde(default = "defaults::protocol_file")]
    pub protocol_file: String,

    #[serde(default = "defaults::start_step")]
    pub start_step: String,

    /// Offer the skip affordance on machine steps
    #[serde(default)]
    pub debug_mode: bool,
}

/// Default value providers using constants
mod defaults {
    use crate::config::constants::*;
    use std::path::PathBuf;

    pub fn progress_tick_ms() -> u64 { timing::PROGRESS_TICK_MS }
    pub fn switch_poll_ms() -> u64 { timing::SWITCH_POLL_MS }
    pub fn grab_deadline_ms() -> u64 { timing::GRAB_DEADLINE_MS }
    pub fn done_delay_ms() -> u64 { timing::DONE_DELAY_MS }
    pub fn finished_delay_ms() -> u64 { timing::FINISHED_DELAY_MS }
    pub fn reset_settle_ms() -> u64 { timing::RESET_SETTLE_MS }
    pub fn completion_buzz() -> u32 { buzzer::COMPLETION_REPETITIONS }
    pub fn fault_buzz() -> u32 { buzzer::FAULT_REPETITIONS }

    pub fn protocol_dir() -> PathBuf { PathBuf::from(protocol::DEFAULT_PROTOCOL_DIR) }
    pub fn protocol_file() -> String { protocol::DEFAULT_PROTOCOL_FILE.to_string() }
    pub fn start_step() -> String { protocol::HOME_STEP.to_string() }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: defaults::progress_tick_ms(),
            switch_poll_ms: defaults::switch_poll_ms(),
            grab_deadline_ms: defaults::grab_deadline_ms(),
            done_delay_ms: defaults::done_delay_ms(),
            finished_delay_ms: defaults::finished_delay_ms(),
            reset_settle_ms: defaults::reset_settle_ms(),
            completion_buzz_repetitions: defaults::completion_buzz(),
            fault_buzz_repetitions: defaults::fault_buzz(),
        }
    }
}

impl TimingConfig {
    pub fn progress_tick(&self) -> Duration { millis(self.progress_tick_ms) }
    pub fn switch_poll(&self) -> Duration { millis(self.switch_poll_ms) }
    pub fn grab_deadline(&self) -> Duration { millis(self.grab_deadline_ms) }
    pub fn done_delay(&self) -> Duration { millis(self.done_delay_ms) }
    pub fn finished_delay(&self) -> Duration { millis(self.finished_delay_ms) }
    pub fn reset_settle(&self) -> Duration { millis(self.reset_settle_ms) }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            protocol_dir: defaults::protocol_dir(),
            protocol_file: defaults::protocol_file(),
            start_step: defaults::start_step(),
            debug_mode: false,
        }
    }
}

impl RunConfig {
    /// Full path of the selected protocol file
    pub fn protocol_path(&self) -> PathBuf {
        self.protocol_dir.join(&self.protocol_file)
    }
}

impl SystemConfig {
    /// Validate configuration consistency
    pub fn validate_consistency(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(err) = validate_device_config(&self.device) {
            errors.push(err);
        }

        let tick_range = timing::MIN_TICK_MS..=timing::MAX_TICK_MS;
        for (name, value) in [
            ("progress_tick_ms", self.timing.progress_tick_ms),
            ("switch_poll_ms", self.timing.switch_poll_ms),
        ] {
            if !tick_range.contains(&value) {
                errors.push(format!(
                    "{} ({} ms) must be within {}..={} ms",
                    name, value, timing::MIN_TICK_MS, timing::MAX_TICK_MS
                ));
            }
        }

        if self.timing.grab_deadline_ms <= self.timing.switch_poll_ms {
            errors.push(format!(
                "Grab deadline ({} ms) must exceed the switch poll period ({} ms)",
                self.timing.grab_deadline_ms, self.timing.switch_poll_ms
            ));
        }
        if self.timing.grab_deadline_ms > timing::MAX_DEADLINE_MS {
            errors.push(format!(
                "Grab deadline ({} ms) exceeds {} ms",
                self.timing.grab_deadline_ms, timing::MAX_DEADLINE_MS
            ));
        }

        for (name, value) in [
            ("completion_buzz_repetitions", self.timing.completion_buzz_repetitions),
            ("fault_buzz_repetitions", self.timing.fault_buzz_repetitions),
        ] {
            if value > buzzer::MAX_REPETITIONS {
                errors.push(format!("{} ({}) exceeds {}", name, value, buzzer::MAX_REPETITIONS));
            }
        }

        if self.run.protocol_file.is_empty() {
            errors.push("Protocol file name cannot be empty".to_string());
        }
        if self.run.start_step.is_empty() {
            errors.push("Start step cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get configuration summary
    pub fn get_summary(&self) -> ConfigSummary {
        ConfigSummary {
            variant: self.device.variant,
            channels: self.device.context().channels().len(),
            protocol: self.run.protocol_path(),
            start_step: self.run.start_step.clone(),
            debug_mode: self.run.debug_mode,
            calibrated: self.device.post_run_rate_mm.is_some() || self.device.post_run_vol_ml.is_some(),
        }
    }
}

/// Configuration summary for display/logging
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub variant: crate::hal::DeviceVariant,
    pub channels: usize,
    pub protocol: PathBuf,
    pub start_step: String,
    pub debug_mode: bool,
    pub calibrated: bool,
}
