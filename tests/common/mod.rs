// tests/common/mod.rs
//! Shared fixtures for integration tests

#![allow(dead_code)]

use chipflow_core::engine::{EngineEvent, Sequencer};
use chipflow_core::hal::simulator::{SimulatedPumpNetwork, SimulatedSwitches, SimulatorConfig};
use chipflow_core::hal::Hardware;
use chipflow_core::protocol::ProtocolLoader;
use chipflow_core::utils::time::ManualClock;
use crossbeam::channel::Receiver;

/// A sequencer over the uncoupled simulator, plus every handle a test needs
pub struct Bench {
    pub sequencer: Sequencer,
    pub events: Receiver<EngineEvent>,
    pub pumps: SimulatedPumpNetwork,
    pub switches: SimulatedSwitches,
    pub clock: ManualClock,
}

impl Bench {
    pub fn from_json(json: &str) -> Self {
        Self::from_json_at(json, "home")
    }

    pub fn from_json_at(json: &str, start_step: &str) -> Self {
        let protocol = ProtocolLoader::parse(json, start_step).expect("Failed to parse protocol");
        let (hardware, pumps, switches) = Hardware::simulated(SimulatorConfig::default(), true);
        let clock = ManualClock::new();
        let (sequencer, events) = Sequencer::builder()
            .protocol(protocol)
            .hardware(hardware)
            .clock(clock.clone())
            .build()
            .expect("Failed to build sequencer");
        Self { sequencer, events, pumps, switches, clock }
    }

    /// Drain and return every event emitted so far
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
}

pub fn completed(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StepCompleted { name } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn entered(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StepChanged { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Operator step, one machine step running `action`, then two operator steps
pub fn around(action: &str) -> String {
    format!(
        r#"{{
            "home": {{"type": "UserActionScreen"}},
            "work": {{"type": "MachineActionScreen", "action": {{{action}}}}},
            "inspect": {{"type": "UserActionScreen"}},
            "finished": {{"type": "UserActionScreen"}}
        }}"#
    )
}
