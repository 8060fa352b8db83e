// src/engine/events.rs
//! Engine to presentation signals

use crate::hal::{ChannelAddr, Target};
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Signals emitted by the engine for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// A new step (or completion sub-state) became current
    StepChanged {
        name: String,
        /// Index in the progress-bearing list, `None` for transient stages
        position: Option<usize>,
    },
    ProgressUpdated { percent: f64, remaining: Duration },
    StepCompleted { name: String },
    Fault(Fault),
    /// `skip` was refused because these channels are not stopped
    SkipRefused { busy: Vec<ChannelAddr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    SwitchOverrun,
    HardwareFault,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::SwitchOverrun => write!(f, "switch overrun"),
            FaultKind::HardwareFault => write!(f, "hardware fault"),
        }
    }
}

/// Fatal condition awaiting operator acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub title: String,
    pub message: String,
}

impl Fault {
    /// Grab deadline expired with syringes still undetected
    pub fn switch_overrun(targets: &[Target]) -> Self {
        let plural = if targets.len() > 1 { "s" } else { "" };
        let labels = targets
            .iter()
            .map(Target::position_label)
            .collect::<Vec<_>>()
            .join(" and ");
        Self {
            kind: FaultKind::SwitchOverrun,
            title: format!("Syringe{plural} not detected"),
            message: format!(
                "Syringe{plural} not inserted correctly in position{plural} {labels}.\nPlease start the test over."
            ),
        }
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::HardwareFault,
            title: "Fatal Error".to_string(),
            message: message.into(),
        }
    }
}

/// Operator's choice when acknowledging a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Abort,
    Reboot,
    Shutdown,
}

/// Process lifecycle action the host must carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Reboot,
    Shutdown,
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<EngineEvent>,
}

impl EventBus {
    /// Unbounded bus and its receiver
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}
