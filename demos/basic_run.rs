// demos/basic_run.rs
//! Basic ChipFlow run
//!
//! Loads `protocols/default.json` and walks it end to end against the
//! simulated device, confirming every operator step as soon as it appears.

use chipflow_core::engine::{EngineEvent, Sequencer};
use chipflow_core::hal::simulator::SimulatorConfig;
use chipflow_core::hal::Hardware;
use chipflow_core::protocol::{total_estimated, ProtocolLoader};
use chipflow_core::utils::time::{minutes_seconds, ManualClock};
use chipflow_core::DeviceContext;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);
const MAX_TICKS: usize = 100_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("ChipFlow Core Basic Run");
    println!("=======================");

    let protocol = ProtocolLoader::from_path("protocols/default.json", "home")?;
    let (min, sec) = minutes_seconds(total_estimated(&protocol));
    println!("Protocol: {} steps, about {:02}:{:02} of machine time", protocol.len(), min, sec);

    let device = DeviceContext::default();
    let (hardware, pumps, switches) = Hardware::simulated(SimulatorConfig::for_device(&device, Some(10)), true);
    let (mut sequencer, events) = Sequencer::builder()
        .device(device)
        .protocol(protocol)
        .hardware(hardware)
        .clock(ManualClock::new())
        .build()?;

    let mut reached_end = false;
    for _ in 0..MAX_TICKS {
        sequencer.tick(TICK);

        for event in events.try_iter() {
            match event {
                EngineEvent::StepChanged { name, .. } => {
                    println!("[{:>7.1}s] -> {}", sequencer.now().as_secs_f64(), name);
                    if name == "finished" {
                        reached_end = true;
                    } else if reached_end && name == "home" {
                        println!();
                        println!("Run complete after {:.1}s of virtual time", sequencer.now().as_secs_f64());
                        println!("Pump commands issued: {}", pumps.commands().len());
                        println!("Switch refreshes: {}", switches.refresh_count());
                        return Ok(());
                    }
                }
                EngineEvent::StepCompleted { name } => println!("            {} complete", name),
                EngineEvent::Fault(fault) => {
                    println!("Fault: {}: {}", fault.title, fault.message);
                    return Ok(());
                }
                EngineEvent::ProgressUpdated { .. } | EngineEvent::SkipRefused { .. } => {}
            }
        }

        let waiting_on_operator = sequencer.current_step().is_some_and(|step| !step.is_machine());
        if waiting_on_operator && sequencer.current_name() != "finished" {
            sequencer.advance()?;
        }
    }

    println!("Run did not finish within {} ticks", MAX_TICKS);
    Ok(())
}
