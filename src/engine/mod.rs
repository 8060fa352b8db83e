// src/engine/mod.rs
//! Protocol execution engine
//!
//! The [`Sequencer`] owns the step list and a [`Runtime`]: hardware, the
//! virtual-time [`Scheduler`], the frozen device context and timing, the
//! stall clock and the event bus. At most one [`ExecutorState`] is live.
//! Every engine timer is tagged with the generation of the stage that armed
//! it; firings from an earlier generation are dropped unseen.

pub mod events;
pub mod executor;
pub mod progress;
pub mod scheduler;
pub mod sequencer;

pub use events::{EngineEvent, EventBus, Fault, FaultKind, LifecycleRequest, RecoveryAction};
pub use executor::{ExecutorState, Signal};
pub use progress::{dots, progress_percent, DisplayFlags, DotStatus};
pub use scheduler::{Firing, Scheduler, TimerId, TimerTask};
pub use sequencer::{Sequencer, SequencerBuilder, SequencerError, SkipOutcome};

use crate::config::{DeviceContext, TimingConfig};
use crate::hal::{HalError, Hardware};
use crate::utils::time::Clock;

/// Everything the executor and sequencer act upon
pub struct Runtime {
    pub hardware: Hardware,
    pub scheduler: Scheduler<TimerTask>,
    pub device: DeviceContext,
    pub timing: TimingConfig,
    pub clock: Box<dyn Clock>,
    pub events: EventBus,
}

impl Runtime {
    /// Stop every pump channel of the device
    pub fn stop_all(&mut self) -> Result<(), HalError> {
        let channels = self.device.channels();
        self.hardware.pumps.stop_all(&channels)
    }

    /// Sound the waste pump's buzzer
    pub fn buzz_waste(&mut self, repetitions: u32) -> Result<(), HalError> {
        self.hardware.pumps.buzz(self.device.waste, repetitions)
    }
}
