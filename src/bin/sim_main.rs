// src/bin/sim_main.rs
//! ChipFlow desktop simulator
//!
//! Runs a protocol against the simulated device, driving the engine from a
//! tokio interval and taking operator commands on stdin.
//!
//! Usage:
//!
//! ```text
//! chipflow-sim [config.toml]                  run the protocol interactively
//! chipflow-sim --check <config.toml>          validate a config file and its protocol
//! chipflow-sim --dump-config <out.toml>       write the merged configuration
//! ```

use chipflow_core::config::ConfigLoader;
use chipflow_core::engine::{EngineEvent, LifecycleRequest, RecoveryAction, Sequencer, SkipOutcome};
use chipflow_core::hal::simulator::{SimulatedPumpNetwork, SimulatedSwitches, SimulatorConfig};
use chipflow_core::hal::Hardware;
use chipflow_core::protocol::{summarize, total_estimated, Protocol, ProtocolLoader, StepRole};
use chipflow_core::utils::time::minutes_seconds;
use chipflow_core::{EngineResult, IntoEngineError, SequencerError};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sensor refreshes a simulated carriage needs to reach its switch
const CARRIAGE_TRAVEL_POLLS: u32 = 15;

enum Flow {
    Continue,
    Quit,
    Lifecycle(LifecycleRequest),
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chipflow_core=info")))
        .init();

    info!("Starting {}", chipflow_core::version_info().description);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [flag, path] if flag == "--check" => return check(PathBuf::from(path)),
        [flag, path] if flag == "--dump-config" => {
            let mut loader = ConfigLoader::new();
            loader.load_system_config()?;
            loader.export_config(path)?;
            println!("configuration written to {}", path);
            return Ok(());
        }
        _ => {}
    }

    let mut loader = match args.first() {
        Some(path) => ConfigLoader::with_paths(vec![PathBuf::from(path)]),
        None => ConfigLoader::new(),
    };
    let config = loader.load_system_config()?;
    let protocol = ProtocolLoader::from_path(config.run.protocol_path(), &config.run.start_step)?;

    info!(
        port = %config.device.serial_port,
        baud = config.device.baud_rate,
        "pump link simulated in place of the serial port"
    );
    let device = config.device.context();
    let (hardware, pumps, switches) = Hardware::simulated(
        SimulatorConfig::for_device(&device, Some(CARRIAGE_TRAVEL_POLLS)),
        device.variant.has_switches(),
    );
    let (mut sequencer, events) = Sequencer::builder()
        .config(&config)
        .protocol(protocol)
        .hardware(hardware)
        .build()?;

    let tick = config.timing.progress_tick().min(config.timing.switch_poll());
    let mut interval = tokio::time::interval(tick);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("commands: next | skip | abort | shutdown | ack <abort|reboot|shutdown> | finish | status | switch <name> <0|1> | quit");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sequencer.tick(tick);
            }
            line = lines.next_line() => {
                let Some(line) = line.engine_err("stdin", "read_command")? else {
                    break;
                };
                match handle_command(&mut sequencer, &pumps, &switches, line.trim()) {
                    Flow::Continue => {}
                    Flow::Quit => break,
                    Flow::Lifecycle(request) => {
                        info!(?request, "lifecycle requested, leaving simulator");
                        break;
                    }
                }
            }
        }

        for event in events.try_iter() {
            print_event(&event);
        }
    }

    Ok(())
}

/// Validate a configuration file and the protocol it selects, then print the run overview
fn check(path: PathBuf) -> EngineResult<()> {
    let mut loader = ConfigLoader::with_paths(vec![path.clone()]);
    loader.validate_config_file(&path)?;
    let config = loader.load_system_config()?;
    let protocol = ProtocolLoader::from_path(config.run.protocol_path(), &config.run.start_step)?;

    println!("{}: ok", path.display());
    println!(
        "pump link {} at {} baud, device {:?}",
        config.device.serial_port, config.device.baud_rate, config.device.variant
    );
    println!(
        "protocol {}: {} steps, {} run by the machine",
        config.run.protocol_path().display(),
        protocol.len(),
        protocol.steps().iter().filter(|s| s.is_machine()).count()
    );
    if !config.device.variant.has_switches() {
        for step in protocol.steps() {
            let gated: Vec<&str> = step
                .machine_step()
                .map(|machine| machine.actions.iter().filter(|a| a.is_switch_gated()).map(|a| a.keyword()).collect())
                .unwrap_or_default();
            if !gated.is_empty() {
                println!("  note: {} runs {} with no switches; they complete immediately", step.name, gated.join(", "));
            }
        }
    }
    print_overview(&protocol);
    let (min, sec) = minutes_seconds(total_estimated(&protocol));
    println!("estimated machine time {:02}:{:02}", min, sec);
    Ok(())
}

fn handle_command(
    sequencer: &mut Sequencer,
    pumps: &SimulatedPumpNetwork,
    switches: &SimulatedSwitches,
    line: &str,
) -> Flow {
    let words: Vec<&str> = line.split_whitespace().collect();
    let result: Result<Flow, SequencerError> = match words.as_slice() {
        [] => Ok(Flow::Continue),
        ["next"] => sequencer.advance().map(|()| Flow::Continue),
        ["skip"] => sequencer.skip().map(|outcome| {
            if let SkipOutcome::Refused { busy } = outcome {
                println!("pumps still moving: {:?}", busy);
            }
            Flow::Continue
        }),
        ["abort"] => sequencer.abort().map(|()| Flow::Continue),
        ["shutdown"] => sequencer.shutdown().map(Flow::Lifecycle),
        ["ack", choice] => match parse_recovery(choice) {
            Some(action) => sequencer
                .acknowledge_fault(action)
                .map(|request| request.map_or(Flow::Continue, Flow::Lifecycle)),
            None => {
                println!("unknown recovery action '{}'", choice);
                Ok(Flow::Continue)
            }
        },
        ["finish"] => {
            pumps.finish_all();
            Ok(Flow::Continue)
        }
        ["status"] => {
            print_status(sequencer);
            Ok(Flow::Continue)
        }
        ["switch", name, state] => {
            switches.set(name, *state == "1");
            Ok(Flow::Continue)
        }
        ["quit"] => Ok(Flow::Quit),
        _ => {
            println!("unknown command '{}'", line);
            Ok(Flow::Continue)
        }
    };

    result.unwrap_or_else(|err| {
        warn!(error = %err, command = line, "command refused");
        println!("refused: {}", err);
        Flow::Continue
    })
}

fn parse_recovery(choice: &str) -> Option<RecoveryAction> {
    match choice {
        "abort" => Some(RecoveryAction::Abort),
        "reboot" => Some(RecoveryAction::Reboot),
        "shutdown" => Some(RecoveryAction::Shutdown),
        _ => None,
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StepChanged { name, .. } => println!("==> {}", name),
        EngineEvent::ProgressUpdated { percent, remaining } => {
            let (min, sec) = minutes_seconds(*remaining);
            println!("    [{:5.1}%] {:02}:{:02} remaining", percent, min, sec);
        }
        EngineEvent::StepCompleted { name } => println!("    {} complete", name),
        EngineEvent::Fault(fault) => {
            println!("!! {}: {}", fault.title, fault.message);
            println!("!! acknowledge with: ack <abort|reboot|shutdown>");
        }
        EngineEvent::SkipRefused { busy } => println!("    skip refused, busy channels {:?}", busy),
    }
}

fn print_status(sequencer: &Sequencer) {
    println!("step: {} ({:?})", sequencer.current_name(), sequencer.dots());
    println!("display: {:?}", sequencer.display_flags());
    if let Some(fault) = sequencer.fault() {
        println!("fault: {} ({})", fault.title, fault.kind);
    }
    let on_summary = sequencer
        .current_step()
        .is_some_and(|step| step.role() == StepRole::Summary);
    if on_summary {
        print_overview(sequencer.protocol());
    }
}

fn print_overview(protocol: &Protocol) {
    for row in summarize(protocol) {
        let estimate = row
            .estimated
            .map(|d| {
                let (min, sec) = minutes_seconds(d);
                format!("{:02}:{:02}", min, sec)
            })
            .unwrap_or_else(|| "--:--".to_string());
        println!("  {:<20} {:>6} {}", row.name, estimate, row.actions.join(", "));
    }
}
