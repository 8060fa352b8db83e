// src/hal/simulator.rs
//! Simulated pump network and switch sensor
//!
//! Both halves share one [`DeviceState`] behind a `parking_lot::Mutex`, so a
//! test (or the desktop simulator) can keep a cloned handle, script switch
//! transitions and pump statuses, and inspect every command the engine sent
//! after the hardware has been moved into the engine.
//!
//! With `carriage_travel_polls` set, the simulator also couples the two: a
//! forward purge releases the channel's grab switch and a reverse purge
//! releases its home switch after that many sensor refreshes; the switch
//! the carriage leaves is re-armed at once.

use crate::config::constants::{pumps, switches};
use crate::config::DeviceContext;
use crate::hal::{
    ChannelAddr, HalError, PumpCommand, PumpNetwork, PumpStatus, PurgeDirection, RateUnit,
    SwitchSensor, VolumeUnit,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    pub channels: Vec<ChannelAddr>,
    /// Switch names and their state at power-on (`true` = active)
    pub switches: BTreeMap<String, bool>,
    /// Refreshes until a purging carriage reaches its switch; `None` disables coupling
    pub carriage_travel_polls: Option<u32>,
    /// Which switches each channel reaches when purging (home, grab)
    pub channel_switches: BTreeMap<u8, (String, String)>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let waste = pumps::DEFAULT_WASTE_ADDR;
        let lysate = pumps::DEFAULT_LYSATE_ADDR;
        let switches = [
            switches::WASTE_HOME,
            switches::LYSATE_HOME,
            switches::WASTE_GRAB,
            switches::LYSATE_GRAB,
        ]
        .iter()
        .map(|name| (name.to_string(), true))
        .collect();
        let channel_switches = [
            (waste, (switches::WASTE_HOME.to_string(), switches::WASTE_GRAB.to_string())),
            (lysate, (switches::LYSATE_HOME.to_string(), switches::LYSATE_GRAB.to_string())),
        ]
        .into_iter()
        .collect();

        Self {
            channels: vec![ChannelAddr(waste), ChannelAddr(lysate)],
            switches,
            carriage_travel_polls: None,
            channel_switches,
        }
    }
}

impl SimulatorConfig {
    /// Simulator matching a device's channels and switch names
    pub fn for_device(device: &DeviceContext, carriage_travel_polls: Option<u32>) -> Self {
        let names = &device.switches;
        let mut switches = BTreeMap::new();
        let mut channel_switches = BTreeMap::new();
        switches.insert(names.waste_home.clone(), true);
        switches.insert(names.waste_grab.clone(), true);
        channel_switches.insert(device.waste.0, (names.waste_home.clone(), names.waste_grab.clone()));
        if let Some(lysate) = device.lysate {
            switches.insert(names.lysate_home.clone(), true);
            switches.insert(names.lysate_grab.clone(), true);
            channel_switches.insert(lysate.0, (names.lysate_home.clone(), names.lysate_grab.clone()));
        }

        Self {
            channels: device.channels(),
            switches,
            carriage_travel_polls,
            channel_switches,
        }
    }
}

/// Shared state behind both simulator handles
#[derive(Debug, Default)]
pub struct DeviceState {
    commands: Vec<PumpCommand>,
    statuses: HashMap<ChannelAddr, PumpStatus>,
    failing: HashSet<(ChannelAddr, &'static str)>,
    live: BTreeMap<String, bool>,
    snapshot: BTreeMap<String, bool>,
    pending_releases: Vec<(String, u32)>,
    refresh_count: u64,
    sensor_offline: bool,
    travel_polls: Option<u32>,
    channel_switches: BTreeMap<u8, (String, String)>,
}

impl DeviceState {
    fn record(&mut self, command: PumpCommand, name: &'static str) -> Result<(), HalError> {
        trace!(?command, "simulated pump command");
        let addr = command.addr();
        self.commands.push(command);
        match addr {
            Some(addr) if self.failing.contains(&(addr, name)) => {
                Err(HalError::command_failed(addr, name, "simulated failure"))
            }
            _ => Ok(()),
        }
    }

    /// Carriage heads for `reached`, leaving `left`
    fn travel(&mut self, reached: String, left: String) {
        let Some(polls) = self.travel_polls else {
            return;
        };
        self.pending_releases
            .retain(|(name, _)| *name != reached && *name != left);
        self.pending_releases.push((reached, polls));
        self.live.insert(left, true);
    }
}

/// Build a coupled pump network and switch sensor
pub fn simulated_device(config: SimulatorConfig) -> (SimulatedPumpNetwork, SimulatedSwitches) {
    let mut state = DeviceState {
        live: config.switches.clone(),
        snapshot: config.switches.clone(),
        travel_polls: config.carriage_travel_polls,
        channel_switches: config.channel_switches,
        ..DeviceState::default()
    };
    for addr in &config.channels {
        state.statuses.insert(*addr, PumpStatus::Stopped);
    }
    let shared = Arc::new(Mutex::new(state));
    (
        SimulatedPumpNetwork { state: shared.clone() },
        SimulatedSwitches { state: shared },
    )
}

/// Simulated pump network handle
#[derive(Debug, Clone)]
pub struct SimulatedPumpNetwork {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedPumpNetwork {
    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<PumpCommand> {
        self.state.lock().commands.clone()
    }

    /// Commands addressed to one channel
    pub fn commands_for(&self, addr: ChannelAddr) -> Vec<PumpCommand> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.addr() == Some(addr))
            .cloned()
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Override the status a channel reports
    pub fn set_status(&self, addr: ChannelAddr, status: PumpStatus) {
        self.state.lock().statuses.insert(addr, status);
    }

    /// Mark every channel as stopped, as if all runs finished
    pub fn finish_all(&self) {
        for status in self.state.lock().statuses.values_mut() {
            *status = PumpStatus::Stopped;
        }
    }

    /// Make one command kind (`"stop"`, `"run"`, ...) fail on a channel
    pub fn fail_command(&self, addr: ChannelAddr, command: &'static str) {
        self.state.lock().failing.insert((addr, command));
    }
}

impl PumpNetwork for SimulatedPumpNetwork {
    fn set_rate(&mut self, addr: ChannelAddr, value: f64, unit: RateUnit) -> Result<(), HalError> {
        self.state.lock().record(PumpCommand::SetRate { addr, value, unit }, "set_rate")
    }

    fn set_volume(&mut self, addr: ChannelAddr, value: f64, unit: VolumeUnit) -> Result<(), HalError> {
        self.state.lock().record(PumpCommand::SetVolume { addr, value, unit }, "set_volume")
    }

    fn run(&mut self, addr: ChannelAddr) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.record(PumpCommand::Run { addr }, "run")?;
        state.statuses.insert(addr, PumpStatus::Running);
        Ok(())
    }

    fn stop(&mut self, addr: ChannelAddr) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.record(PumpCommand::Stop { addr }, "stop")?;
        state.statuses.insert(addr, PumpStatus::Stopped);
        Ok(())
    }

    fn purge(&mut self, addr: ChannelAddr, direction: PurgeDirection) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.record(PumpCommand::Purge { addr, direction }, "purge")?;
        state.statuses.insert(addr, PumpStatus::Purging);
        if let Some((home, grab)) = state.channel_switches.get(&addr.0).cloned() {
            match direction {
                PurgeDirection::Forward => state.travel(grab, home),
                PurgeDirection::Reverse => state.travel(home, grab),
            }
        }
        Ok(())
    }

    fn set_diameter(&mut self, addr: ChannelAddr, diameter_mm: f64) -> Result<(), HalError> {
        self.state
            .lock()
            .record(PumpCommand::SetDiameter { addr, diameter_mm }, "set_diameter")
    }

    fn status(&mut self, addr: ChannelAddr) -> Result<PumpStatus, HalError> {
        let state = self.state.lock();
        if state.failing.contains(&(addr, "status")) {
            return Err(HalError::command_failed(addr, "status", "simulated failure"));
        }
        Ok(state.statuses.get(&addr).copied().unwrap_or(PumpStatus::Unknown))
    }

    fn buzz(&mut self, addr: ChannelAddr, repetitions: u32) -> Result<(), HalError> {
        self.state.lock().record(PumpCommand::Buzz { addr, repetitions }, "buzz")
    }

    fn stop_all(&mut self, addrs: &[ChannelAddr]) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.commands.push(PumpCommand::StopAll { addrs: addrs.to_vec() });
        for addr in addrs {
            state.statuses.insert(*addr, PumpStatus::Stopped);
        }
        Ok(())
    }
}

/// Simulated microcontroller switch link handle
#[derive(Debug, Clone)]
pub struct SimulatedSwitches {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedSwitches {
    /// Set the live (physical) state of a switch; visible after the next refresh
    pub fn set(&self, switch: &str, active: bool) {
        self.state.lock().live.insert(switch.to_string(), active);
    }

    /// Number of refreshes performed so far
    pub fn refresh_count(&self) -> u64 {
        self.state.lock().refresh_count
    }

    /// Simulate a dropped microcontroller link
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().sensor_offline = offline;
    }
}

impl SwitchSensor for SimulatedSwitches {
    fn refresh(&mut self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.sensor_offline {
            return Err(HalError::SensorRead {
                switch: "*".to_string(),
                reason: "link offline".to_string(),
            });
        }
        state.refresh_count += 1;

        let mut released = Vec::new();
        for (name, remaining) in state.pending_releases.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                released.push(name.clone());
            }
        }
        state.pending_releases.retain(|(_, remaining)| *remaining > 0);
        for name in released {
            state.live.insert(name, false);
        }

        state.snapshot = state.live.clone();
        Ok(())
    }

    fn is_active(&self, switch: &str) -> Result<bool, HalError> {
        self.state
            .lock()
            .snapshot
            .get(switch)
            .copied()
            .ok_or_else(|| HalError::SensorRead {
                switch: switch.to_string(),
                reason: "no such switch".to_string(),
            })
    }
}
