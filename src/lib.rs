// src/lib.rs
//! ChipFlow core: protocol-driven hardware action executor for the fluidics device
//!
//! This library interprets declarative protocols and drives the device's
//! syringe pumps and position switches through them. It features:
//!
//! - Protocol model and loader for the ordered step/action JSON format
//! - Step sequencer with advance/skip/abort/start-over and fault latching
//! - Action executor for timed, switch-gated and synchronous actions
//! - Cooperative virtual-time scheduler with generation-tagged timers
//! - Hardware abstraction layer with a scriptable simulated device
//! - Layered TOML/environment configuration
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chipflow_core::engine::Sequencer;
//! use chipflow_core::hal::{simulator::SimulatorConfig, Hardware};
//! use chipflow_core::protocol::ProtocolLoader;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let protocol = ProtocolLoader::from_path("protocols/default.json", "home")?;
//!     let (hardware, _pumps, _switches) = Hardware::simulated(SimulatorConfig::default(), true);
//!     let (mut sequencer, events) = Sequencer::builder()
//!         .protocol(protocol)
//!         .hardware(hardware)
//!         .build()?;
//!
//!     sequencer.advance()?;
//!     sequencer.tick(Duration::from_millis(500));
//!     for event in events.try_iter() {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod engine;
pub mod error;
pub mod hal;
pub mod protocol;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{ConfigLoader, DeviceContext, SystemConfig};
pub use engine::{EngineEvent, Fault, FaultKind, RecoveryAction, Sequencer, SequencerError, SkipOutcome};
pub use error::{EngineError, EngineResult, IntoEngineError};
pub use hal::{HalError, Hardware, PumpNetwork, SwitchSensor};
pub use protocol::{Protocol, ProtocolError, ProtocolLoader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "Protocol-driven hardware action executor for ChipFlow fluidics".to_string(),
        features: vec![
            "Protocol loading and validation".to_string(),
            "Step sequencing with fault latching".to_string(),
            "Timed and switch-gated pump actions".to_string(),
            "Simulated pump network and switches".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}
