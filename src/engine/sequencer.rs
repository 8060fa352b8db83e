// src/engine/sequencer.rs
//! Step sequencer: the top-level run state machine
//!
//! Stages are the protocol's steps in declared order, each machine step with
//! a completion message followed by its transient `<name>_done` stage.
//! Forward navigation past the last stage lands on `home` (or the first
//! stage when the run was started past it).

use crate::config::constants::protocol as names;
use crate::config::{DeviceContext, SystemConfig, TimingConfig};
use crate::engine::events::{EngineEvent, EventBus, Fault, LifecycleRequest, RecoveryAction};
use crate::engine::executor::{ExecutorState, Signal};
use crate::engine::progress::{dots, DisplayFlags, DotStatus};
use crate::engine::scheduler::{Firing, Scheduler, TimerId, TimerTask};
use crate::engine::Runtime;
use crate::hal::{ChannelAddr, Hardware, PumpStatus};
use crate::protocol::{Protocol, Step, StepKind, StepRole};
use crate::utils::time::{Clock, SystemClock};
use crossbeam::channel::Receiver;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Sequencer operation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequencerError {
    #[error("fault awaiting acknowledgment: {title}")]
    FaultPending { title: String },

    #[error("no fault to acknowledge")]
    NoFault,

    #[error("shutdown is only offered on the home step (current: {current})")]
    NotAtHome { current: String },

    #[error("sequencer requires a protocol")]
    NoProtocol,

    #[error("sequencer requires hardware")]
    NoHardware,
}

/// Result of a skip request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped,
    /// Channels that did not report `Stopped`
    Refused { busy: Vec<ChannelAddr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Step(usize),
    Done(usize),
}

/// Builder for [`Sequencer`]
pub struct SequencerBuilder {
    protocol: Option<Protocol>,
    hardware: Option<Hardware>,
    device: DeviceContext,
    timing: TimingConfig,
    clock: Box<dyn Clock>,
    debug_mode: bool,
}

impl SequencerBuilder {
    pub fn new() -> Self {
        Self {
            protocol: None,
            hardware: None,
            device: DeviceContext::default(),
            timing: TimingConfig::default(),
            clock: Box::new(SystemClock),
            debug_mode: false,
        }
    }

    /// Take device context, timing and debug mode from a loaded configuration
    pub fn config(mut self, config: &SystemConfig) -> Self {
        self.device = config.device.context();
        self.timing = config.timing.clone();
        self.debug_mode = config.run.debug_mode;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = Some(hardware);
        self
    }

    pub fn device(mut self, device: DeviceContext) -> Self {
        self.device = device;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    /// Build the sequencer and enter the first step
    pub fn build(self) -> Result<(Sequencer, Receiver<EngineEvent>), SequencerError> {
        let protocol = self.protocol.ok_or(SequencerError::NoProtocol)?;
        let hardware = self.hardware.ok_or(SequencerError::NoHardware)?;
        let (events, rx) = EventBus::new();

        let mut stages = Vec::with_capacity(protocol.len());
        for (index, step) in protocol.steps().iter().enumerate() {
            stages.push(Stage::Step(index));
            if step.done_name().is_some() {
                stages.push(Stage::Done(index));
            }
        }
        let progress_names = protocol.names().map(str::to_string).collect();

        let mut sequencer = Sequencer {
            protocol,
            stages,
            current: 0,
            progress_names,
            runtime: Runtime {
                hardware,
                scheduler: Scheduler::new(),
                device: self.device,
                timing: self.timing,
                clock: self.clock,
                events,
            },
            executor: None,
            generation: 0,
            stage_timers: Vec::new(),
            fault: None,
            debug_mode: self.debug_mode,
        };
        info!(
            steps = sequencer.protocol.len(),
            stages = sequencer.stages.len(),
            variant = ?sequencer.runtime.device.variant,
            "sequencer ready"
        );
        sequencer.enter(0);
        Ok((sequencer, rx))
    }
}

impl Default for SequencerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a protocol run over one device
pub struct Sequencer {
    protocol: Protocol,
    stages: Vec<Stage>,
    current: usize,
    progress_names: Vec<String>,
    runtime: Runtime,
    executor: Option<ExecutorState>,
    generation: u64,
    stage_timers: Vec<TimerId>,
    fault: Option<Fault>,
    debug_mode: bool,
}

impl Sequencer {
    pub fn builder() -> SequencerBuilder {
        SequencerBuilder::new()
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Name of the current stage, `<step>_done` for completion sub-states
    pub fn current_name(&self) -> String {
        self.stage_name(self.stages[self.current])
    }

    /// Current step, `None` while in a completion sub-state
    pub fn current_step(&self) -> Option<&Step> {
        match self.stages[self.current] {
            Stage::Step(index) => self.protocol.steps().get(index),
            Stage::Done(_) => None,
        }
    }

    /// Index of the current step within the progress-bearing names
    pub fn position(&self) -> usize {
        match self.stages[self.current] {
            Stage::Step(index) | Stage::Done(index) => index,
        }
    }

    pub fn progress_names(&self) -> &[String] {
        &self.progress_names
    }

    pub fn dots(&self) -> Vec<DotStatus> {
        dots(self.position(), self.progress_names.len())
    }

    pub fn display_flags(&self) -> DisplayFlags {
        self.current_step()
            .map(|step| DisplayFlags::for_step(step, self.runtime.device.variant, self.debug_mode))
            .unwrap_or_default()
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn executor(&self) -> Option<&ExecutorState> {
        self.executor.as_ref()
    }

    /// Number of timers currently armed
    pub fn pending_timers(&self) -> usize {
        self.runtime.scheduler.len()
    }

    /// Virtual time since the sequencer was built
    pub fn now(&self) -> Duration {
        self.runtime.scheduler.now()
    }

    /// Advance virtual time by `dt` and dispatch every timer that came due
    pub fn tick(&mut self, dt: Duration) -> usize {
        self.runtime.scheduler.advance(dt);
        let mut dispatched = 0;
        while let Some(firing) = self.runtime.scheduler.pop_due() {
            self.dispatch(firing);
            dispatched += 1;
        }
        dispatched
    }

    /// Advance virtual time without dispatching
    pub fn advance_clock(&mut self, dt: Duration) {
        self.runtime.scheduler.advance(dt);
    }

    /// Take the next due firing for manual dispatch
    pub fn pop_due(&mut self) -> Option<Firing<TimerTask>> {
        self.runtime.scheduler.pop_due()
    }

    /// Route one firing; firings from an earlier stage are ignored
    pub fn dispatch(&mut self, firing: Firing<TimerTask>) {
        if firing.generation != self.generation || self.fault.is_some() {
            debug!(
                timer = %firing.id,
                generation = firing.generation,
                current = self.generation,
                "ignoring stale firing"
            );
            return;
        }

        match firing.task {
            TimerTask::DoneAdvance => {
                self.stage_timers.retain(|id| *id != firing.id);
                self.go_forward();
            }
            TimerTask::StartOver => {
                self.stage_timers.retain(|id| *id != firing.id);
                info!("terminal step elapsed, starting over");
                self.reset_to_start();
            }
            _ => {
                let Some(executor) = self.executor.as_mut() else {
                    return;
                };
                match executor.on_timer(&firing, &mut self.runtime) {
                    Signal::Pending => {}
                    Signal::Complete => self.complete_current(),
                    Signal::Fault(fault) => self.raise_fault(fault),
                }
            }
        }
    }

    /// Operator confirmation: move to the next stage
    pub fn advance(&mut self) -> Result<(), SequencerError> {
        self.ensure_no_fault()?;
        self.go_forward();
        Ok(())
    }

    /// Advance past the current step, only while every pump is stopped
    pub fn skip(&mut self) -> Result<SkipOutcome, SequencerError> {
        self.ensure_no_fault()?;

        let mut busy = Vec::new();
        for addr in self.runtime.device.channels() {
            match self.runtime.hardware.pumps.status(addr) {
                Ok(PumpStatus::Stopped) => {}
                Ok(status) => {
                    debug!(channel = %addr, ?status, "pump busy");
                    busy.push(addr);
                }
                Err(err) => {
                    warn!(channel = %addr, error = %err, "pump status unavailable");
                    busy.push(addr);
                }
            }
        }

        if !busy.is_empty() {
            warn!(step = %self.current_name(), ?busy, "pump not stopped, refusing to skip");
            self.runtime.events.emit(EngineEvent::SkipRefused { busy: busy.clone() });
            return Ok(SkipOutcome::Refused { busy });
        }

        info!(step = %self.current_name(), "skipping step");
        self.go_forward();
        Ok(SkipOutcome::Skipped)
    }

    /// Tear down, stop all pumps and return to the first step
    pub fn abort(&mut self) -> Result<(), SequencerError> {
        self.ensure_no_fault()?;
        info!(step = %self.current_name(), "aborting run");
        self.reset_to_start();
        Ok(())
    }

    /// Same effect as [`Sequencer::abort`]; also fired after the terminal step
    pub fn start_over(&mut self) -> Result<(), SequencerError> {
        self.ensure_no_fault()?;
        info!("starting over");
        self.reset_to_start();
        Ok(())
    }

    /// Clear the latched fault and carry out the operator's choice
    pub fn acknowledge_fault(&mut self, action: RecoveryAction) -> Result<Option<LifecycleRequest>, SequencerError> {
        let fault = self.fault.take().ok_or(SequencerError::NoFault)?;
        info!(kind = %fault.kind, ?action, "fault acknowledged");
        match action {
            RecoveryAction::Abort => {
                self.reset_to_start();
                Ok(None)
            }
            RecoveryAction::Reboot => {
                self.cleanup();
                Ok(Some(LifecycleRequest::Reboot))
            }
            RecoveryAction::Shutdown => {
                self.cleanup();
                Ok(Some(LifecycleRequest::Shutdown))
            }
        }
    }

    /// Power-down request, offered on the home step in place of abort
    pub fn shutdown(&mut self) -> Result<LifecycleRequest, SequencerError> {
        self.ensure_no_fault()?;
        let at_home = self
            .current_step()
            .is_some_and(|step| step.role() == StepRole::Home);
        if !at_home {
            return Err(SequencerError::NotAtHome { current: self.current_name() });
        }
        info!("shutting down");
        self.cleanup();
        Ok(LifecycleRequest::Shutdown)
    }

    fn ensure_no_fault(&self) -> Result<(), SequencerError> {
        match &self.fault {
            Some(fault) => Err(SequencerError::FaultPending { title: fault.title.clone() }),
            None => Ok(()),
        }
    }

    fn stage_name(&self, stage: Stage) -> String {
        match stage {
            Stage::Step(index) => self.protocol.steps()[index].name.clone(),
            Stage::Done(index) => format!("{}{}", self.protocol.steps()[index].name, names::DONE_SUFFIX),
        }
    }

    fn next_stage(&self) -> usize {
        if self.current + 1 < self.stages.len() {
            return self.current + 1;
        }
        // Past the end lies the protocol chooser, which is never a forward target
        self.protocol
            .position(names::HOME_STEP)
            .and_then(|home| self.stages.iter().position(|s| *s == Stage::Step(home)))
            .unwrap_or(0)
    }

    fn is_terminal(&self, index: usize) -> bool {
        let steps = self.protocol.steps();
        steps.len() > 1 && index + 1 == steps.len() && matches!(steps[index].kind, StepKind::Operator)
    }

    /// Cancel everything owned by the current stage
    fn leave_stage(&mut self) {
        if let Some(mut executor) = self.executor.take() {
            executor.teardown(&mut self.runtime);
        }
        for timer in self.stage_timers.drain(..) {
            self.runtime.scheduler.cancel(timer);
        }
    }

    fn go_forward(&mut self) {
        self.leave_stage();
        let next = self.next_stage();
        self.enter(next);
    }

    fn complete_current(&mut self) {
        let name = self.current_name();
        self.runtime.events.emit(EngineEvent::StepCompleted { name });
        self.go_forward();
    }

    fn reset_to_start(&mut self) {
        self.cleanup();
        self.enter(0);
    }

    fn cleanup(&mut self) {
        self.leave_stage();
        let cancelled = self.runtime.scheduler.cancel_all();
        debug!(cancelled, "unscheduled all timers");
        if let Err(err) = self.runtime.stop_all() {
            error!(error = %err, "stop-all failed during cleanup");
        }
    }

    /// Make `index` current and run its entry behavior; steps that complete
    /// on entry chain forward, at most once around the protocol
    fn enter(&mut self, mut index: usize) {
        for _ in 0..=self.stages.len() {
            self.current = index;
            self.generation += 1;
            let stage = self.stages[index];
            let name = self.stage_name(stage);
            let position = match stage {
                Stage::Step(step) => Some(step),
                Stage::Done(_) => None,
            };
            info!(step = %name, generation = self.generation, "entering step");
            self.runtime.events.emit(EngineEvent::StepChanged { name, position });

            let step_index = match stage {
                Stage::Done(_) => {
                    self.enter_done();
                    return;
                }
                Stage::Step(step_index) => step_index,
            };

            let step = &self.protocol.steps()[step_index];
            let Some(machine) = step.machine_step() else {
                if self.is_terminal(step_index) {
                    let timer = self.runtime.scheduler.schedule_once(
                        self.runtime.timing.finished_delay(),
                        self.generation,
                        TimerTask::StartOver,
                    );
                    self.stage_timers.push(timer);
                }
                return;
            };

            let (executor, signal) = ExecutorState::start(step, machine, self.generation, &mut self.runtime);
            self.executor = Some(executor);
            match signal {
                Signal::Pending => return,
                Signal::Fault(fault) => {
                    self.raise_fault(fault);
                    return;
                }
                Signal::Complete => {
                    let name = self.current_name();
                    self.runtime.events.emit(EngineEvent::StepCompleted { name });
                    self.leave_stage();
                    index = self.next_stage();
                }
            }
        }
        warn!(step = %self.current_name(), "every step completed on entry; holding position");
    }

    fn enter_done(&mut self) {
        let repetitions = self.runtime.timing.completion_buzz_repetitions;
        if let Err(err) = self.runtime.buzz_waste(repetitions) {
            warn!(error = %err, "completion buzz failed");
        }
        let timer = self.runtime.scheduler.schedule_once(
            self.runtime.timing.done_delay(),
            self.generation,
            TimerTask::DoneAdvance,
        );
        self.stage_timers.push(timer);
    }

    fn raise_fault(&mut self, fault: Fault) {
        error!(step = %self.current_name(), kind = %fault.kind, title = %fault.title, message = %fault.message, "fatal fault");
        self.cleanup();
        if let Err(err) = self.runtime.buzz_waste(self.runtime.timing.fault_buzz_repetitions) {
            warn!(error = %err, "fault buzz failed");
        }
        self.runtime.events.emit(EngineEvent::Fault(fault.clone()));
        self.fault = Some(fault);
    }
}
