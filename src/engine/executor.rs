// src/engine/executor.rs
//! Action executor: drives one machine step's actions to completion
//!
//! An [`ExecutorState`] lives exactly as long as its machine step is current.
//! Synchronous work (hardware commands, the reset settle stall) happens in
//! [`ExecutorState::start`]; everything else is driven by timers the state
//! owns and the sequencer routes back through [`ExecutorState::on_timer`].
//! The step completes once every action has finished, and that edge is
//! reported exactly once.

use crate::engine::events::{EngineEvent, Fault};
use crate::engine::progress::progress_percent;
use crate::engine::scheduler::{Firing, TimerId, TimerTask};
use crate::engine::Runtime;
use crate::hal::{
    ChannelAddr, HalError, HardwareUnavailable, PurgeDirection, RateUnit, SwitchRole, Target,
    VolumeUnit,
};
use crate::protocol::{Action, FlowParams, GrabParams, MachineStep, Step};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the sequencer must do after driving the executor
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Pending,
    Complete,
    Fault(Fault),
}

#[derive(Debug)]
enum ActionState {
    Finished,
    Timed {
        total: Duration,
        elapsed: Duration,
        timer: TimerId,
    },
    Switched(SwitchWatch),
}

/// Per-action switch bookkeeping for Reset and Grab
#[derive(Debug)]
struct SwitchWatch {
    role: SwitchRole,
    required: usize,
    triggered: usize,
    /// Channels still waiting for their switch, with their poll timers
    polls: Vec<(Target, ChannelAddr, TimerId)>,
    deadline: Option<TimerId>,
    /// Post-grab precision run (ml/min, ml)
    post_run: Option<(f64, f64)>,
}

/// Live execution state of the current machine step
#[derive(Debug)]
pub struct ExecutorState {
    step: String,
    generation: u64,
    actions: Vec<ActionState>,
    unavailable: Vec<HardwareUnavailable>,
    completed: bool,
}

impl ExecutorState {
    /// Issue the synchronous part of every action in declared order and arm
    /// the timers of the asynchronous ones
    pub fn start(step: &Step, machine: &MachineStep, generation: u64, rt: &mut Runtime) -> (Self, Signal) {
        info!(step = %step.name, generation, actions = machine.actions.len(), "starting machine step");
        let mut state = Self {
            step: step.name.clone(),
            generation,
            actions: Vec::with_capacity(machine.actions.len()),
            unavailable: Vec::new(),
            completed: false,
        };

        for (index, action) in machine.actions.iter().enumerate() {
            match state.start_action(index, action, rt) {
                Ok(action_state) => state.actions.push(action_state),
                Err(err) => {
                    state.teardown(rt);
                    let fault = Fault::hardware(format!(
                        "Step '{}' could not start {}: {}",
                        step.name,
                        action.keyword(),
                        err
                    ));
                    return (state, Signal::Fault(fault));
                }
            }
        }

        let signal = state.check_complete();
        (state, signal)
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Switch-gated actions that were skipped on this variant
    pub fn unavailable(&self) -> &[HardwareUnavailable] {
        &self.unavailable
    }

    /// Every timer this state still owns
    pub fn live_timers(&self) -> Vec<TimerId> {
        let mut timers = Vec::new();
        for action in &self.actions {
            match action {
                ActionState::Finished => {}
                ActionState::Timed { timer, .. } => timers.push(*timer),
                ActionState::Switched(watch) => {
                    timers.extend(watch.polls.iter().map(|(_, _, timer)| *timer));
                    timers.extend(watch.deadline);
                }
            }
        }
        timers
    }

    /// Switch triggers counted so far for the action at `index`
    pub fn trigger_count(&self, index: usize) -> Option<usize> {
        match self.actions.get(index) {
            Some(ActionState::Switched(watch)) => Some(watch.triggered),
            _ => None,
        }
    }

    /// Cancel every owned timer
    pub fn teardown(&mut self, rt: &mut Runtime) {
        let timers = self.live_timers();
        for timer in &timers {
            rt.scheduler.cancel(*timer);
        }
        debug!(step = %self.step, generation = self.generation, cancelled = timers.len(), "executor torn down");
        for action in &mut self.actions {
            *action = ActionState::Finished;
        }
        self.completed = true;
    }

    /// Handle one timer firing addressed to this state
    pub fn on_timer(&mut self, firing: &Firing<TimerTask>, rt: &mut Runtime) -> Signal {
        if self.completed || firing.generation != self.generation {
            return Signal::Pending;
        }
        match firing.task {
            TimerTask::Progress { action } => self.progress_tick(action, firing.dt, rt),
            TimerTask::SwitchPoll { action, target } => self.poll(action, target, rt),
            TimerTask::GrabDeadline { action } => self.deadline(action, rt),
            TimerTask::DoneAdvance | TimerTask::StartOver => Signal::Pending,
        }
    }

    fn start_action(&mut self, index: usize, action: &Action, rt: &mut Runtime) -> Result<ActionState, HalError> {
        match action {
            Action::Pump(flow) | Action::Release(flow) => {
                self.command_flow(action.keyword(), flow, rt)?;
                Ok(self.timed(index, flow.duration(), rt))
            }
            Action::Incubate { seconds } => {
                debug!(step = %self.step, seconds, "incubating");
                Ok(self.timed(index, action.timed_duration().unwrap_or_default(), rt))
            }
            Action::Reset | Action::ResetWaste => {
                if !self.switches_present(action, rt) {
                    return Ok(ActionState::Finished);
                }
                let targets: &[Target] = match action {
                    Action::Reset => &[Target::Waste, Target::Lysate],
                    _ => &[Target::Waste],
                };
                self.start_reset(index, targets, rt)
            }
            Action::Grab(params) | Action::GrabWaste(params) => {
                if !self.switches_present(action, rt) {
                    return Ok(ActionState::Finished);
                }
                let targets: &[Target] = match action {
                    Action::Grab(_) => &[Target::Waste, Target::Lysate],
                    _ => &[Target::Waste],
                };
                self.start_grab(index, targets, params, rt)
            }
            Action::ChangeSyringe { diameter_mm, channel } => {
                info!(step = %self.step, channel = %channel, diameter_mm, "changing syringe diameter");
                rt.hardware.pumps.set_diameter(*channel, *diameter_mm)?;
                Ok(ActionState::Finished)
            }
        }
    }

    fn command_flow(&self, keyword: &str, flow: &FlowParams, rt: &mut Runtime) -> Result<(), HalError> {
        let addr = rt.device.resolve(flow.target)?;
        info!(
            step = %self.step,
            action = keyword,
            channel = %addr,
            rate_mh = flow.rate_ml_per_hour,
            vol_ml = flow.volume_ml,
            "starting pump run"
        );
        let pumps = &mut rt.hardware.pumps;
        pumps.set_rate(addr, flow.rate_ml_per_hour, RateUnit::MlPerHour)?;
        pumps.set_volume(addr, flow.volume_ml, VolumeUnit::Milliliters)?;
        pumps.run(addr)
    }

    fn timed(&self, index: usize, total: Duration, rt: &mut Runtime) -> ActionState {
        let timer = rt.scheduler.schedule_repeating(
            rt.timing.progress_tick(),
            self.generation,
            TimerTask::Progress { action: index },
        );
        ActionState::Timed {
            total,
            elapsed: Duration::ZERO,
            timer,
        }
    }

    fn switches_present(&mut self, action: &Action, rt: &Runtime) -> bool {
        if rt.device.variant.has_switches() && rt.hardware.switches.is_some() {
            return true;
        }
        let unavailable = HardwareUnavailable {
            action: action.keyword().to_string(),
            variant: rt.device.variant,
        };
        warn!(step = %self.step, error = %unavailable, "treating switch-gated action as complete");
        self.unavailable.push(unavailable);
        false
    }

    fn resolve_all(targets: &[Target], rt: &Runtime) -> Result<Vec<(Target, ChannelAddr)>, HalError> {
        targets
            .iter()
            .map(|target| rt.device.resolve(*target).map(|addr| (*target, addr)))
            .collect()
    }

    fn start_reset(&self, index: usize, targets: &[Target], rt: &mut Runtime) -> Result<ActionState, HalError> {
        let channels = Self::resolve_all(targets, rt)?;
        info!(step = %self.step, channels = channels.len(), "homing carriages");

        for (_, addr) in &channels {
            rt.hardware.pumps.purge(*addr, PurgeDirection::Forward)?;
        }
        rt.clock.sleep(rt.timing.reset_settle());
        for (_, addr) in &channels {
            rt.hardware.pumps.stop(*addr)?;
            rt.hardware.pumps.purge(*addr, PurgeDirection::Reverse)?;
        }

        Ok(ActionState::Switched(SwitchWatch {
            role: SwitchRole::Home,
            required: channels.len(),
            triggered: 0,
            polls: self.arm_polls(index, &channels, rt),
            deadline: None,
            post_run: None,
        }))
    }

    fn start_grab(
        &self,
        index: usize,
        targets: &[Target],
        params: &GrabParams,
        rt: &mut Runtime,
    ) -> Result<ActionState, HalError> {
        let channels = Self::resolve_all(targets, rt)?;
        let (rate, volume) = rt
            .device
            .calibration
            .resolve(params.post_run_rate, params.post_run_volume);
        info!(step = %self.step, post_run_rate_mm = rate, post_run_vol_ml = volume, "grabbing syringes");

        for (_, addr) in &channels {
            rt.hardware.pumps.purge(*addr, PurgeDirection::Forward)?;
        }

        let polls = self.arm_polls(index, &channels, rt);
        let deadline = rt.scheduler.schedule_once(
            rt.timing.grab_deadline(),
            self.generation,
            TimerTask::GrabDeadline { action: index },
        );
        Ok(ActionState::Switched(SwitchWatch {
            role: SwitchRole::Grab,
            required: channels.len(),
            triggered: 0,
            polls,
            deadline: Some(deadline),
            post_run: Some((rate, volume)),
        }))
    }

    fn arm_polls(
        &self,
        index: usize,
        channels: &[(Target, ChannelAddr)],
        rt: &mut Runtime,
    ) -> Vec<(Target, ChannelAddr, TimerId)> {
        channels
            .iter()
            .map(|(target, addr)| {
                let timer = rt.scheduler.schedule_repeating(
                    rt.timing.switch_poll(),
                    self.generation,
                    TimerTask::SwitchPoll { action: index, target: *target },
                );
                (*target, *addr, timer)
            })
            .collect()
    }

    fn progress_tick(&mut self, index: usize, dt: Duration, rt: &mut Runtime) -> Signal {
        let Some(ActionState::Timed { total, elapsed, timer }) = self.actions.get_mut(index) else {
            return Signal::Pending;
        };

        *elapsed += dt;
        let remaining = total.saturating_sub(*elapsed);
        let percent = progress_percent(*elapsed, *total);
        rt.events.emit(EngineEvent::ProgressUpdated { percent, remaining });

        if *elapsed < *total {
            return Signal::Pending;
        }
        rt.scheduler.cancel(*timer);
        debug!(step = %self.step, action = index, "timed action finished");
        self.actions[index] = ActionState::Finished;
        self.check_complete()
    }

    fn poll(&mut self, index: usize, target: Target, rt: &mut Runtime) -> Signal {
        let Some(ActionState::Switched(watch)) = self.actions.get_mut(index) else {
            return Signal::Pending;
        };
        let Some(slot) = watch.polls.iter().position(|(t, _, _)| *t == target) else {
            return Signal::Pending;
        };
        let switch = rt.device.switch_name(target, watch.role).to_string();
        let Some(sensor) = rt.hardware.switches.as_mut() else {
            return Signal::Pending;
        };

        match sensor.refresh().and_then(|()| sensor.is_active(&switch)) {
            Ok(true) => return Signal::Pending,
            Ok(false) => {}
            Err(err) => {
                warn!(step = %self.step, %switch, error = %err, "switch poll failed");
                return Signal::Pending;
            }
        }

        let (_, addr, timer) = watch.polls.remove(slot);
        rt.scheduler.cancel(timer);
        info!(step = %self.step, %switch, channel = %addr, role = ?watch.role, "switch triggered, stopping pump");

        if let Err(err) = rt.hardware.pumps.stop(addr) {
            return Signal::Fault(Fault::hardware(format!(
                "Pump {} did not stop after switch {} triggered: {}",
                addr, switch, err
            )));
        }
        if let Some((rate, volume)) = watch.post_run {
            debug!(channel = %addr, rate_mm = rate, vol_ml = volume, "seating syringe");
            let pumps = &mut rt.hardware.pumps;
            let seated = pumps
                .set_rate(addr, rate, RateUnit::MlPerMinute)
                .and_then(|()| pumps.set_volume(addr, volume, VolumeUnit::Milliliters))
                .and_then(|()| pumps.run(addr));
            if let Err(err) = seated {
                return Signal::Fault(Fault::hardware(format!(
                    "Pump {} could not seat the syringe: {}",
                    addr, err
                )));
            }
        }

        watch.triggered += 1;
        if watch.triggered < watch.required {
            return Signal::Pending;
        }
        if let Some(deadline) = watch.deadline.take() {
            rt.scheduler.cancel(deadline);
        }
        debug!(step = %self.step, action = index, "all switches triggered");
        self.actions[index] = ActionState::Finished;
        self.check_complete()
    }

    fn deadline(&mut self, index: usize, rt: &mut Runtime) -> Signal {
        let Some(ActionState::Switched(watch)) = self.actions.get_mut(index) else {
            return Signal::Pending;
        };
        watch.deadline = None;
        if watch.polls.is_empty() {
            return Signal::Pending;
        }

        let Some(sensor) = rt.hardware.switches.as_mut() else {
            return Signal::Pending;
        };
        if let Err(err) = sensor.refresh() {
            warn!(step = %self.step, error = %err, "switch refresh failed at grab deadline");
        }

        let role = watch.role;
        let mut overruns = Vec::new();
        watch.polls.retain(|(target, _, timer)| {
            let switch = rt.device.switch_name(*target, role);
            let still_active = sensor.is_active(switch).unwrap_or(true);
            if still_active {
                rt.scheduler.cancel(*timer);
                overruns.push(*target);
            }
            !still_active
        });

        if overruns.is_empty() {
            return Signal::Pending;
        }
        warn!(step = %self.step, overruns = ?overruns, "grab overrun");
        Signal::Fault(Fault::switch_overrun(&overruns))
    }

    fn check_complete(&mut self) -> Signal {
        if self.completed {
            return Signal::Pending;
        }
        if self.actions.iter().all(|a| matches!(a, ActionState::Finished)) {
            self.completed = true;
            info!(step = %self.step, "machine step complete");
            return Signal::Complete;
        }
        Signal::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, TimingConfig};
    use crate::engine::events::{EventBus, FaultKind};
    use crate::engine::scheduler::Scheduler;
    use crate::hal::simulator::{SimulatedPumpNetwork, SimulatedSwitches, SimulatorConfig};
    use crate::hal::{DeviceVariant, Hardware, PumpCommand};
    use crate::utils::time::ManualClock;
    use crossbeam::channel::Receiver;

    struct Rig {
        rt: Runtime,
        pumps: SimulatedPumpNetwork,
        switches: SimulatedSwitches,
        clock: ManualClock,
        events: Receiver<EngineEvent>,
    }

    fn rig(variant: DeviceVariant) -> Rig {
        let (hardware, pumps, switches) =
            Hardware::simulated(SimulatorConfig::default(), variant.has_switches());
        let (bus, events) = EventBus::new();
        let clock = ManualClock::new();
        let device = DeviceConfig {
            variant,
            ..DeviceConfig::default()
        };
        let rt = Runtime {
            hardware,
            scheduler: Scheduler::new(),
            device: device.context(),
            timing: TimingConfig::default(),
            clock: Box::new(clock.clone()),
            events: bus,
        };
        Rig { rt, pumps, switches, clock, events }
    }

    fn machine(actions: Vec<Action>) -> Step {
        Step::machine("run", actions)
    }

    fn start(rig: &mut Rig, step: &Step) -> (ExecutorState, Signal) {
        let machine = step.machine_step().unwrap().clone();
        ExecutorState::start(step, &machine, 1, &mut rig.rt)
    }

    /// Advance virtual time and dispatch firings until a non-pending signal
    fn run_for(rig: &mut Rig, state: &mut ExecutorState, dt: Duration) -> Vec<Signal> {
        rig.rt.scheduler.advance(dt);
        let mut signals = Vec::new();
        while let Some(firing) = rig.rt.scheduler.pop_due() {
            let signal = state.on_timer(&firing, &mut rig.rt);
            if signal != Signal::Pending {
                signals.push(signal);
            }
        }
        signals
    }

    fn pump(volume_ml: f64, rate: f64, eq: f64) -> Action {
        Action::Pump(FlowParams {
            target: Target::Waste,
            rate_ml_per_hour: rate,
            volume_ml,
            equilibration_seconds: eq,
        })
    }

    fn grab() -> Action {
        Action::Grab(GrabParams { post_run_rate: 1.5, post_run_volume: 0.05 })
    }

    #[test]
    fn test_pump_commands_and_completion() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![pump(2.0, 1.0, 30.0)]);
        let (mut state, signal) = start(&mut rig, &step);
        assert_eq!(signal, Signal::Pending);

        assert_eq!(
            rig.pumps.commands(),
            vec![
                PumpCommand::SetRate { addr: ChannelAddr(0), value: 1.0, unit: RateUnit::MlPerHour },
                PumpCommand::SetVolume { addr: ChannelAddr(0), value: 2.0, unit: VolumeUnit::Milliliters },
                PumpCommand::Run { addr: ChannelAddr(0) },
            ]
        );

        assert!(run_for(&mut rig, &mut state, Duration::from_secs(3615)).is_empty());
        let halfway = rig.events.try_iter().last().unwrap();
        assert_eq!(
            halfway,
            EngineEvent::ProgressUpdated { percent: 50.0, remaining: Duration::from_secs(3615) }
        );

        let signals = run_for(&mut rig, &mut state, Duration::from_secs(4000));
        assert_eq!(signals, vec![Signal::Complete]);
        assert!(state.live_timers().is_empty());

        let last = rig.events.try_iter().last().unwrap();
        assert_eq!(last, EngineEvent::ProgressUpdated { percent: 100.0, remaining: Duration::ZERO });
    }

    #[test]
    fn test_release_is_timed_like_pump() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![Action::Release(FlowParams {
            target: Target::Lysate,
            rate_ml_per_hour: -2.0,
            volume_ml: 1.0,
            equilibration_seconds: 0.0,
        })]);
        let (mut state, _) = start(&mut rig, &step);

        assert_eq!(rig.pumps.commands_for(ChannelAddr(1)).len(), 3);
        assert!(run_for(&mut rig, &mut state, Duration::from_millis(1_799_500)).is_empty());
        assert_eq!(run_for(&mut rig, &mut state, Duration::from_millis(500)), vec![Signal::Complete]);
    }

    #[test]
    fn test_reset_with_inactive_switches_completes_once() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        rig.switches.set("d2", false);
        rig.switches.set("d3", false);
        let step = machine(vec![Action::Reset]);
        let (mut state, signal) = start(&mut rig, &step);
        assert_eq!(signal, Signal::Pending);
        assert_eq!(rig.clock.stalls(), vec![Duration::from_secs(1)]);

        let signals = run_for(&mut rig, &mut state, Duration::from_millis(100));
        assert_eq!(signals, vec![Signal::Complete]);
        assert_eq!(state.trigger_count(0), None);

        let stops = rig
            .pumps
            .commands()
            .into_iter()
            .filter(|c| matches!(c, PumpCommand::Stop { .. }))
            .count();
        // One stop per channel during the homing sequence, one per trigger
        assert_eq!(stops, 4);

        assert!(run_for(&mut rig, &mut state, Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_reset_waste_waits_for_home_switch() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![Action::ResetWaste]);
        let (mut state, _) = start(&mut rig, &step);

        assert!(run_for(&mut rig, &mut state, Duration::from_secs(2)).is_empty());
        assert_eq!(state.trigger_count(0), Some(0));

        rig.switches.set("d2", false);
        assert_eq!(run_for(&mut rig, &mut state, Duration::from_millis(100)), vec![Signal::Complete]);
    }

    #[test]
    fn test_switchless_variant_skips_switch_actions() {
        let mut rig = rig(DeviceVariant::SwitchlessVariant);
        let step = machine(vec![Action::Reset, grab()]);
        let (state, signal) = start(&mut rig, &step);

        assert_eq!(signal, Signal::Complete);
        assert_eq!(state.unavailable().len(), 2);
        assert_eq!(state.unavailable()[0].action, "RESET");
        assert!(rig.pumps.commands().is_empty());
        assert!(rig.rt.scheduler.is_empty());
    }

    #[test]
    fn test_grab_success_runs_post_run_and_cancels_deadline() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![grab()]);
        let (mut state, _) = start(&mut rig, &step);
        assert_eq!(state.live_timers().len(), 3);

        rig.switches.set("d4", false);
        assert!(run_for(&mut rig, &mut state, Duration::from_millis(100)).is_empty());
        assert_eq!(state.trigger_count(0), Some(1));
        assert_eq!(
            rig.pumps.commands_for(ChannelAddr(0))[1..].to_vec(),
            vec![
                PumpCommand::Stop { addr: ChannelAddr(0) },
                PumpCommand::SetRate { addr: ChannelAddr(0), value: 1.5, unit: RateUnit::MlPerMinute },
                PumpCommand::SetVolume { addr: ChannelAddr(0), value: 0.05, unit: VolumeUnit::Milliliters },
                PumpCommand::Run { addr: ChannelAddr(0) },
            ]
        );

        rig.switches.set("d5", false);
        assert_eq!(run_for(&mut rig, &mut state, Duration::from_millis(100)), vec![Signal::Complete]);
        assert!(rig.rt.scheduler.is_empty());
    }

    #[test]
    fn test_grab_uses_calibration_override() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        rig.rt.device.calibration.post_run_rate_mm = Some(3.0);
        let step = machine(vec![Action::GrabWaste(GrabParams { post_run_rate: 1.0, post_run_volume: 0.02 })]);
        let (mut state, _) = start(&mut rig, &step);

        rig.switches.set("d4", false);
        assert_eq!(run_for(&mut rig, &mut state, Duration::from_millis(100)), vec![Signal::Complete]);
        assert!(rig.pumps.commands().contains(&PumpCommand::SetRate {
            addr: ChannelAddr(0),
            value: 3.0,
            unit: RateUnit::MlPerMinute,
        }));
    }

    #[test]
    fn test_grab_double_overrun() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![grab()]);
        let (mut state, _) = start(&mut rig, &step);

        assert!(run_for(&mut rig, &mut state, Duration::from_millis(19_900)).is_empty());
        let signals = run_for(&mut rig, &mut state, Duration::from_millis(100));
        assert_eq!(signals.len(), 1);
        let Signal::Fault(fault) = &signals[0] else {
            panic!("expected fault, got {:?}", signals[0]);
        };
        assert_eq!(fault.kind, FaultKind::SwitchOverrun);
        assert!(fault.message.contains("1 (waste) and 2 (lysate)"));
        assert!(state.live_timers().is_empty());
    }

    #[test]
    fn test_grab_single_overrun_after_waste_success() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![grab()]);
        let (mut state, _) = start(&mut rig, &step);
        let timers_before = state.live_timers();

        rig.switches.set("d4", false);
        assert!(run_for(&mut rig, &mut state, Duration::from_secs(1)).is_empty());
        // Waste poll is gone; lysate poll and the deadline remain
        assert_eq!(state.live_timers().len(), 2);
        assert!(!rig.rt.scheduler.is_live(timers_before[0]));

        let signals = run_for(&mut rig, &mut state, Duration::from_secs(19));
        let Some(Signal::Fault(fault)) = signals.first() else {
            panic!("expected fault");
        };
        assert_eq!(fault.title, "Syringe not detected");
        assert!(fault.message.contains("position 2 (lysate)"));
        assert!(!fault.message.contains("waste"));
    }

    #[test]
    fn test_failed_stop_after_trigger_is_fatal() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![Action::ResetWaste]);
        let (mut state, _) = start(&mut rig, &step);

        rig.pumps.fail_command(ChannelAddr(0), "stop");
        rig.switches.set("d2", false);
        let signals = run_for(&mut rig, &mut state, Duration::from_millis(100));
        assert!(matches!(
            signals.as_slice(),
            [Signal::Fault(Fault { kind: FaultKind::HardwareFault, .. })]
        ));
    }

    #[test]
    fn test_change_syringe_is_synchronous() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![Action::ChangeSyringe { diameter_mm: 4.78, channel: ChannelAddr(1) }]);
        let (_, signal) = start(&mut rig, &step);

        assert_eq!(signal, Signal::Complete);
        assert_eq!(
            rig.pumps.commands(),
            vec![PumpCommand::SetDiameter { addr: ChannelAddr(1), diameter_mm: 4.78 }]
        );
    }

    #[test]
    fn test_mixed_step_waits_for_every_async_action() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![
            Action::ChangeSyringe { diameter_mm: 4.78, channel: ChannelAddr(0) },
            Action::Incubate { seconds: 1.0 },
            Action::ResetWaste,
        ]);
        let (mut state, signal) = start(&mut rig, &step);
        assert_eq!(signal, Signal::Pending);

        assert!(run_for(&mut rig, &mut state, Duration::from_secs(2)).is_empty());
        rig.switches.set("d2", false);
        assert_eq!(run_for(&mut rig, &mut state, Duration::from_millis(100)), vec![Signal::Complete]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut rig = rig(DeviceVariant::WithSwitches);
        let step = machine(vec![Action::Incubate { seconds: 0.5 }]);
        let (mut state, _) = start(&mut rig, &step);

        let stale = Firing {
            id: state.live_timers()[0],
            generation: 0,
            task: TimerTask::Progress { action: 0 },
            dt: Duration::from_secs(10),
        };
        assert_eq!(state.on_timer(&stale, &mut rig.rt), Signal::Pending);
        assert!(!state.is_complete());
    }
}
