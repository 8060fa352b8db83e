// src/protocol/model.rs
//! Typed protocol representation: ordered steps and their hardware actions

use crate::config::constants::{protocol, timing};
use crate::hal::{ChannelAddr, Target};
use crate::protocol::ProtocolError;
use std::collections::HashSet;
use std::time::Duration;

/// Ordered, uniquely named sequence of steps; order is execution order
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    steps: Vec<Step>,
}

impl Protocol {
    /// Build a protocol, checking it is non-empty and every name (including
    /// the completion sub-state names derived from it) is unique
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, ProtocolError> {
        if steps.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut names = HashSet::new();
        for step in &steps {
            if step.name == protocol::CHOOSER_STEP || !names.insert(step.name.as_str()) {
                return Err(ProtocolError::DuplicateStep { step: step.name.clone() });
            }
        }
        for step in &steps {
            if let Some(done) = step.done_name() {
                if names.contains(done.as_str()) {
                    return Err(ProtocolError::DuplicateStep { step: done });
                }
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }
}

/// One protocol step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    pub header: String,
    pub description: String,
    pub next_label: String,
    pub completion_message: Option<String>,
}

impl Step {
    pub fn operator(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: StepKind::Operator,
            header: protocol::DEFAULT_HEADER.to_string(),
            description: protocol::DEFAULT_DESCRIPTION.to_string(),
            next_label: protocol::DEFAULT_NEXT_TEXT.to_string(),
            completion_message: None,
        }
    }

    pub fn machine(name: &str, actions: Vec<Action>) -> Self {
        Self {
            kind: StepKind::Machine(MachineStep {
                actions,
                suppress_progress_ui: false,
            }),
            ..Self::operator(name)
        }
    }

    pub fn with_completion_message(mut self, message: &str) -> Self {
        self.completion_message = Some(message.to_string());
        self
    }

    pub fn machine_step(&self) -> Option<&MachineStep> {
        match &self.kind {
            StepKind::Machine(machine) => Some(machine),
            StepKind::Operator => None,
        }
    }

    pub fn is_machine(&self) -> bool {
        self.machine_step().is_some()
    }

    pub fn role(&self) -> StepRole {
        match (self.name.as_str(), &self.kind) {
            (protocol::HOME_STEP, StepKind::Operator) => StepRole::Home,
            (protocol::SUMMARY_STEP, StepKind::Operator) => StepRole::Summary,
            _ => StepRole::Regular,
        }
    }

    /// Name of the transient completion sub-state, if the step has one
    pub fn done_name(&self) -> Option<String> {
        match (&self.kind, &self.completion_message) {
            (StepKind::Machine(_), Some(_)) => Some(format!("{}{}", self.name, protocol::DONE_SUFFIX)),
            _ => None,
        }
    }
}

/// Operator steps wait for confirmation; machine steps drive hardware
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Operator,
    Machine(MachineStep),
}

/// Operator steps with special presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRole {
    Home,
    Summary,
    Regular,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineStep {
    /// Performed in declaration order within one step invocation
    pub actions: Vec<Action>,
    pub suppress_progress_ui: bool,
}

/// Flow parameters shared by Pump and Release
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowParams {
    pub target: Target,
    pub rate_ml_per_hour: f64,
    pub volume_ml: f64,
    pub equilibration_seconds: f64,
}

impl FlowParams {
    /// `|volume / rate|` hours plus equilibration time, `None` when no
    /// `Duration` can hold it
    pub fn try_duration(&self) -> Option<Duration> {
        let pumping = (self.volume_ml / self.rate_ml_per_hour).abs() * timing::SECONDS_PER_HOUR;
        Duration::try_from_secs_f64(pumping + self.equilibration_seconds).ok()
    }

    /// Run time of a loaded flow; the loader rejects flows without one
    pub fn duration(&self) -> Duration {
        self.try_duration().unwrap_or(Duration::MAX)
    }
}

/// Post-grab precision run parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrabParams {
    /// ml/min
    pub post_run_rate: f64,
    /// ml
    pub post_run_volume: f64,
}

/// One hardware action of a machine step
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Pump(FlowParams),
    Incubate { seconds: f64 },
    Reset,
    ResetWaste,
    Grab(GrabParams),
    GrabWaste(GrabParams),
    ChangeSyringe { diameter_mm: f64, channel: ChannelAddr },
    Release(FlowParams),
}

impl Action {
    /// Keyword used by protocol files
    pub fn keyword(&self) -> &'static str {
        match self {
            Action::Pump(_) => "PUMP",
            Action::Incubate { .. } => "INCUBATE",
            Action::Reset => "RESET",
            Action::ResetWaste => "RESET_WASTE",
            Action::Grab(_) => "GRAB",
            Action::GrabWaste(_) => "GRAB_WASTE",
            Action::ChangeSyringe { .. } => "CHANGE_SYRINGE",
            Action::Release(_) => "RELEASE",
        }
    }

    /// Whether the action needs the position switches
    pub fn is_switch_gated(&self) -> bool {
        matches!(
            self,
            Action::Reset | Action::ResetWaste | Action::Grab(_) | Action::GrabWaste(_)
        )
    }

    /// Fixed run time of timer-driven actions
    pub fn timed_duration(&self) -> Option<Duration> {
        match self {
            Action::Pump(flow) | Action::Release(flow) => Some(flow.duration()),
            Action::Incubate { seconds } => Some(Duration::try_from_secs_f64(*seconds).unwrap_or(Duration::MAX)),
            _ => None,
        }
    }
}
