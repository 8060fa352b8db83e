// src/engine/progress.rs
//! Display projection of sequencer and executor state

use crate::hal::DeviceVariant;
use crate::protocol::{Step, StepKind};
use serde::Serialize;
use std::time::Duration;

/// Completion percentage of a timed action, clamped to 0..=100
pub fn progress_percent(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 100.0;
    }
    (elapsed.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0)
}

/// State of one dot of the stepped position indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DotStatus {
    Past,
    Present,
    Future,
}

/// Past/present/future indicator for `count` progress-bearing steps
pub fn dots(position: usize, count: usize) -> Vec<DotStatus> {
    let position = position.min(count.saturating_sub(1));
    (0..count)
        .map(|index| match index.cmp(&position) {
            std::cmp::Ordering::Less => DotStatus::Past,
            std::cmp::Ordering::Equal => DotStatus::Present,
            std::cmp::Ordering::Greater => DotStatus::Future,
        })
        .collect()
}

/// Which affordances the presentation shows for the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DisplayFlags {
    pub show_progress_bar: bool,
    pub show_skip: bool,
}

impl DisplayFlags {
    pub fn for_step(step: &Step, variant: DeviceVariant, debug_mode: bool) -> Self {
        match &step.kind {
            StepKind::Operator => Self::default(),
            StepKind::Machine(machine) => {
                let show_progress_bar = !machine.suppress_progress_ui && variant.has_switches();
                Self {
                    show_progress_bar,
                    show_skip: show_progress_bar && debug_mode,
                }
            }
        }
    }
}
