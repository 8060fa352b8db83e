// src/protocol/summary.rs
//! Run overview shown on the summary step

use crate::protocol::{Protocol, StepKind};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub name: String,
    pub header: String,
    pub machine: bool,
    pub actions: Vec<&'static str>,
    /// Sum of the timed actions; `None` when the step has none
    pub estimated: Option<Duration>,
}

pub fn summarize(protocol: &Protocol) -> Vec<SummaryRow> {
    protocol
        .steps()
        .iter()
        .map(|step| {
            let (machine, actions, estimated): (bool, Vec<&'static str>, Option<Duration>) = match &step.kind {
                StepKind::Operator => (false, Vec::new(), None),
                StepKind::Machine(machine) => {
                    let timed: Vec<Duration> = machine.actions.iter().filter_map(|a| a.timed_duration()).collect();
                    let estimated = (!timed.is_empty()).then(|| saturating_sum(timed.iter().copied()));
                    (true, machine.actions.iter().map(|a| a.keyword()).collect(), estimated)
                }
            };
            SummaryRow {
                name: step.name.clone(),
                header: step.header.clone(),
                machine,
                actions,
                estimated,
            }
        })
        .collect()
}

/// Estimated machine time of the whole protocol
pub fn total_estimated(protocol: &Protocol) -> Duration {
    saturating_sum(summarize(protocol).iter().filter_map(|row| row.estimated))
}

fn saturating_sum(durations: impl Iterator<Item = Duration>) -> Duration {
    durations.fold(Duration::ZERO, Duration::saturating_add)
}
