// tests/sequencer_flow.rs
//! End-to-end sequencer behavior against the simulated device

mod common;

use chipflow_core::engine::{DisplayFlags, EngineEvent, FaultKind, LifecycleRequest, RecoveryAction, SequencerError, SkipOutcome};
use chipflow_core::hal::{ChannelAddr, PumpCommand, PurgeDirection, RateUnit, VolumeUnit};
use common::{around, completed, entered, Bench};
use std::time::Duration;

const WASTE: ChannelAddr = ChannelAddr(0);
const LYSATE: ChannelAddr = ChannelAddr(1);

const PUMP: &str = r#""PUMP": {"target": "waste", "rate_mh": 1.0, "vol_ml": 2.0, "eq_time": 30}"#;
const GRAB: &str = r#""GRAB": {"post_run_rate_mm": 1.5, "post_run_vol_ml": 0.05}"#;

fn last_progress(events: &[EngineEvent]) -> Option<(f64, Duration)> {
    events.iter().rev().find_map(|e| match e {
        EngineEvent::ProgressUpdated { percent, remaining } => Some((*percent, *remaining)),
        _ => None,
    })
}

#[test]
fn test_pump_progress_and_single_completion() {
    let mut bench = Bench::from_json(&around(PUMP));
    bench.sequencer.advance().expect("advance failed");
    assert_eq!(bench.sequencer.current_name(), "work");
    assert!(bench.pumps.commands_for(WASTE).contains(&PumpCommand::SetRate {
        addr: WASTE,
        value: 1.0,
        unit: RateUnit::MlPerHour,
    }));
    assert!(bench.pumps.commands_for(WASTE).contains(&PumpCommand::SetVolume {
        addr: WASTE,
        value: 2.0,
        unit: VolumeUnit::Milliliters,
    }));
    bench.drain();

    bench.sequencer.tick(Duration::from_secs(3615));
    let events = bench.drain();
    assert_eq!(last_progress(&events), Some((50.0, Duration::from_secs(3615))));
    assert!(completed(&events).is_empty());
    assert_eq!(bench.sequencer.current_name(), "work");

    bench.sequencer.tick(Duration::from_secs(3615));
    let events = bench.drain();
    assert_eq!(last_progress(&events), Some((100.0, Duration::ZERO)));
    assert_eq!(completed(&events), vec!["work"]);
    assert_eq!(bench.sequencer.current_name(), "inspect");

    bench.sequencer.tick(Duration::from_secs(60));
    let events = bench.drain();
    assert!(completed(&events).is_empty());
    assert!(last_progress(&events).is_none());
    assert_eq!(bench.sequencer.current_name(), "inspect");
}

#[test]
fn test_skip_waits_for_stopped_pumps() {
    let mut bench = Bench::from_json(&around(PUMP));
    bench.sequencer.advance().expect("advance failed");
    bench.drain();

    let outcome = bench.sequencer.skip().expect("skip failed");
    assert_eq!(outcome, SkipOutcome::Refused { busy: vec![WASTE] });
    assert_eq!(bench.sequencer.current_name(), "work");
    assert_eq!(bench.drain(), vec![EngineEvent::SkipRefused { busy: vec![WASTE] }]);

    bench.pumps.finish_all();
    assert_eq!(bench.sequencer.skip(), Ok(SkipOutcome::Skipped));
    assert_eq!(bench.sequencer.current_name(), "inspect");
    assert_eq!(bench.sequencer.pending_timers(), 0);
}

#[test]
fn test_skip_on_operator_step_behaves_like_advance() {
    let mut bench = Bench::from_json(&around(PUMP));
    assert_eq!(bench.sequencer.skip(), Ok(SkipOutcome::Skipped));
    assert_eq!(bench.sequencer.current_name(), "work");
}

#[test]
fn test_reset_with_switches_already_released_advances_once() {
    let mut bench = Bench::from_json(&around(r#""RESET": {}"#));
    bench.switches.set("d2", false);
    bench.switches.set("d3", false);

    bench.sequencer.advance().expect("advance failed");
    assert_eq!(bench.clock.total_stalled(), Duration::from_secs(1));
    for addr in [WASTE, LYSATE] {
        let commands = bench.pumps.commands_for(addr);
        assert_eq!(
            commands,
            vec![
                PumpCommand::Purge { addr, direction: PurgeDirection::Forward },
                PumpCommand::Stop { addr },
                PumpCommand::Purge { addr, direction: PurgeDirection::Reverse },
            ]
        );
    }
    bench.drain();

    bench.sequencer.tick(Duration::from_millis(100));
    let events = bench.drain();
    assert_eq!(completed(&events), vec!["work"]);
    assert_eq!(entered(&events), vec!["inspect"]);
    assert_eq!(bench.sequencer.current_name(), "inspect");
    for addr in [WASTE, LYSATE] {
        assert_eq!(bench.pumps.commands_for(addr).last(), Some(&PumpCommand::Stop { addr }));
    }

    bench.sequencer.tick(Duration::from_secs(5));
    assert!(completed(&bench.drain()).is_empty());
    assert_eq!(bench.sequencer.current_name(), "inspect");
}

#[test]
fn test_grab_overrun_on_both_channels() {
    let mut bench = Bench::from_json(&around(GRAB));
    bench.sequencer.advance().expect("advance failed");
    bench.drain();

    bench.sequencer.tick(Duration::from_millis(19_900));
    assert!(bench.sequencer.fault().is_none());

    bench.sequencer.tick(Duration::from_millis(100));
    let fault = bench.sequencer.fault().cloned().expect("expected a latched fault");
    assert_eq!(fault.kind, FaultKind::SwitchOverrun);
    assert_eq!(fault.title, "Syringes not detected");
    assert!(fault.message.contains("positions 1 (waste) and 2 (lysate)"));

    let events = bench.drain();
    assert!(events.contains(&EngineEvent::Fault(fault)));
    assert!(completed(&events).is_empty());
    assert_eq!(bench.sequencer.current_name(), "work");
    assert_eq!(bench.sequencer.pending_timers(), 0);
    assert!(bench
        .pumps
        .commands()
        .contains(&PumpCommand::StopAll { addrs: vec![WASTE, LYSATE] }));
    assert!(bench
        .pumps
        .commands()
        .contains(&PumpCommand::Buzz { addr: WASTE, repetitions: 5 }));
}

#[test]
fn test_grab_overrun_on_lysate_only() {
    let mut bench = Bench::from_json(&around(GRAB));
    bench.switches.set("d4", false);
    bench.sequencer.advance().expect("advance failed");

    bench.sequencer.tick(Duration::from_millis(100));
    let executor = bench.sequencer.executor().expect("grab step should be running");
    assert_eq!(executor.trigger_count(0), Some(1));
    // lysate poll and the deadline
    assert_eq!(executor.live_timers().len(), 2);
    assert_eq!(
        &bench.pumps.commands_for(WASTE)[1..],
        &[
            PumpCommand::Stop { addr: WASTE },
            PumpCommand::SetRate { addr: WASTE, value: 1.5, unit: RateUnit::MlPerMinute },
            PumpCommand::SetVolume { addr: WASTE, value: 0.05, unit: VolumeUnit::Milliliters },
            PumpCommand::Run { addr: WASTE },
        ]
    );

    bench.sequencer.tick(Duration::from_secs(20));
    let fault = bench.sequencer.fault().cloned().expect("expected a latched fault");
    assert_eq!(fault.title, "Syringe not detected");
    assert_eq!(
        fault.message,
        "Syringe not inserted correctly in position 2 (lysate).\nPlease start the test over."
    );
    assert!(!fault.message.contains("waste"));
}

#[test]
fn test_grab_completes_when_both_switches_release() {
    let mut bench = Bench::from_json(&around(GRAB));
    bench.sequencer.advance().expect("advance failed");

    bench.sequencer.tick(Duration::from_secs(2));
    bench.switches.set("d4", false);
    bench.switches.set("d5", false);
    bench.sequencer.tick(Duration::from_millis(100));

    assert!(bench.sequencer.fault().is_none());
    assert_eq!(bench.sequencer.current_name(), "inspect");
    assert_eq!(completed(&bench.drain()), vec!["work"]);

    bench.sequencer.tick(Duration::from_secs(30));
    assert!(bench.sequencer.fault().is_none());
}

#[test]
fn test_firing_captured_before_abort_is_inert() {
    let mut bench = Bench::from_json(&around(r#""INCUBATE": {"time": 60}"#));
    bench.sequencer.advance().expect("advance failed");

    bench.sequencer.advance_clock(Duration::from_millis(500));
    let late = bench.sequencer.pop_due().expect("progress timer should be due");

    bench.sequencer.abort().expect("abort failed");
    assert_eq!(bench.sequencer.current_name(), "home");
    assert_eq!(bench.sequencer.pending_timers(), 0);
    let generation = bench.sequencer.generation();
    bench.drain();

    bench.sequencer.dispatch(late);
    assert!(bench.drain().is_empty());
    assert_eq!(bench.sequencer.current_name(), "home");
    assert_eq!(bench.sequencer.generation(), generation);
    assert!(bench.sequencer.executor().is_none());

    bench.sequencer.tick(Duration::from_secs(120));
    assert!(bench.drain().is_empty());
}

#[test]
fn test_completion_sub_state_buzzes_and_moves_on() {
    let json = r#"{
        "home": {"type": "UserActionScreen"},
        "wait": {
            "type": "MachineActionScreen",
            "action": {"INCUBATE": {"time": 1}},
            "completion_msg": "Incubation finished"
        },
        "inspect": {"type": "UserActionScreen"},
        "finished": {"type": "UserActionScreen"}
    }"#;
    let mut bench = Bench::from_json(json);
    bench.sequencer.advance().expect("advance failed");

    bench.sequencer.tick(Duration::from_secs(1));
    assert_eq!(bench.sequencer.current_name(), "wait_done");
    assert_eq!(bench.sequencer.display_flags(), DisplayFlags::default());
    assert!(bench
        .pumps
        .commands()
        .contains(&PumpCommand::Buzz { addr: WASTE, repetitions: 3 }));

    bench.sequencer.tick(Duration::from_secs(1));
    assert_eq!(bench.sequencer.current_name(), "inspect");
    assert_eq!(entered(&bench.drain()), vec!["home", "wait", "wait_done", "inspect"]);
}

#[test]
fn test_full_run_returns_home_after_finished_screen() {
    let mut bench = Bench::from_json(&around(r#""INCUBATE": {"time": 2}"#));
    bench.sequencer.advance().expect("advance failed");
    bench.sequencer.tick(Duration::from_secs(2));
    assert_eq!(bench.sequencer.current_name(), "inspect");

    bench.sequencer.advance().expect("advance failed");
    assert_eq!(bench.sequencer.current_name(), "finished");

    bench.sequencer.tick(Duration::from_millis(2_900));
    assert_eq!(bench.sequencer.current_name(), "finished");
    bench.sequencer.tick(Duration::from_millis(100));
    assert_eq!(bench.sequencer.current_name(), "home");
}

#[test]
fn test_fault_acknowledgment_paths() {
    let mut bench = Bench::from_json(&around(GRAB));
    bench.sequencer.advance().expect("advance failed");
    bench.sequencer.tick(Duration::from_secs(20));
    assert!(bench.sequencer.fault().is_some());

    assert!(matches!(
        bench.sequencer.start_over(),
        Err(SequencerError::FaultPending { .. })
    ));
    assert!(matches!(
        bench.sequencer.shutdown(),
        Err(SequencerError::FaultPending { .. })
    ));
    assert_eq!(
        bench.sequencer.acknowledge_fault(RecoveryAction::Shutdown),
        Ok(Some(LifecycleRequest::Shutdown))
    );
    assert!(bench.sequencer.fault().is_none());
}

#[test]
fn test_failed_stop_after_trigger_is_fatal() {
    let mut bench = Bench::from_json(&around(GRAB));
    bench.switches.set("d4", false);
    bench.pumps.fail_command(WASTE, "stop");
    bench.sequencer.advance().expect("advance failed");

    bench.sequencer.tick(Duration::from_millis(100));
    let fault = bench.sequencer.fault().cloned().expect("expected a latched fault");
    assert_eq!(fault.kind, FaultKind::HardwareFault);
    assert_eq!(fault.title, "Fatal Error");
    assert_eq!(bench.sequencer.pending_timers(), 0);
}

#[test]
fn test_builder_refusal_surfaces_through_crate_root() {
    use chipflow_core::{EngineError, EngineResult, ProtocolLoader, Sequencer};

    fn build_without_hardware() -> EngineResult<()> {
        let protocol = ProtocolLoader::parse(r#"{"home": {"type": "UserActionScreen"}}"#, "home")?;
        Sequencer::builder().protocol(protocol).build()?;
        Ok(())
    }

    let err = build_without_hardware().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Sequencer { error: chipflow_core::SequencerError::NoHardware, .. }
    ));
    assert!(err.to_string().starts_with("[SEQUENCER]"));
}
