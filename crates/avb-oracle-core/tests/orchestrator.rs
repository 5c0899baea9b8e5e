// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end step execution against a recording rig.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use avb_dry_tests::{daisy_chain, linear_with_bystander, RecordingRig, RigEvent, TopologyBuilder};
use avb_oracle_core::sequences::glitch_watch;
use avb_oracle_core::{
    Connection, Emission, Expectation, OracleError, Orchestrator, RunPolicy, StepOutcome,
    StepReport, TestPlan, TestStep, Topology,
};

const DC0: &str = "0x002297fffe000001";
const DC1: &str = "0x002297fffe000002";
const DC2: &str = "0x002297fffe000003";
const DC0_STREAM: &str = "0022970000010000";

fn step(command: &str, checkpoint: bool) -> TestStep {
    TestStep {
        action: command.parse().expect("command should parse"),
        checkpoint,
        comment: None,
    }
}

fn run(oracle: &mut Orchestrator, rig: &mut RecordingRig, command: &str) -> StepReport {
    oracle.run_step(rig, 0, &step(command, true)).expect("step should run")
}

fn fresh(topology: Arc<Topology>) -> Orchestrator {
    Orchestrator::new(topology, RunPolicy::default())
}

#[test]
fn linear_connect_predicts_forwarding_and_shapers() {
    let mut oracle = fresh(linear_with_bystander());
    let mut rig = RecordingRig::new();
    let report = run(&mut oracle, &mut rig, "connect dc0 0 dc2 0");

    assert_eq!(report.outcome, StepOutcome::Committed);
    assert_eq!(rig.lines_to("ctl"), [format!("connect {DC0} 0 {DC2} 0")]);
    let tree = report.plan.expected.expect("connect should predict output");

    // Talker comes up for the first time.
    assert!(tree.expects("dc0", "CONNECTING Talker stream #0"));
    assert!(tree.expects("dc0", "Talker stream #0 ready"));
    assert!(tree.expects("dc0", "Talker stream #0 on"));
    assert!(tree.expects("ctl", "Success"));

    // dc1 sits between talker and listener.
    let forward = format!("1722 router: Enabled forwarding for stream {DC0_STREAM}");
    assert!(tree.expects("dc1", &forward));
    assert!(tree.expects("dc1", "Port 1 shaper bandwidth 7872000 bps"));
    assert!(tree.expects("dc0", "Port 1 shaper bandwidth 7808000 bps"));

    // The listener and its analyzer channels.
    assert!(tree.expects("dc2", "CONNECTING Listener sink #0"));
    assert!(tree.expects("analyzer", "Channel 4: Signal detected at 1000 Hz"));
    assert!(tree.expects("analyzer", "Channel 5: Signal detected at 2000 Hz"));

    // Both relays see the stream appear.
    assert!(tree.expects("relay0", &format!("Stream {DC0_STREAM} bandwidth 7808000 bps")));
    assert!(tree.expects("relay1", &format!("Stream {DC0_STREAM} bandwidth 7872000 bps")));

    // dc3 is off the path: no forwarding, no shaper change.
    assert!(tree.forbids("dc3", &forward));
    assert!(tree.forbids("dc3", r"Port \d+ shaper bandwidth \d+ bps"));
    assert!(!tree.forbids("dc0", r"Port \d+ shaper bandwidth \d+ bps"));
    assert!(!tree.expects("dc3", &forward));

    // Forwarding comes before the listener locks.
    let Expectation::AllOf(main) = &tree else {
        panic!("expected AllOf, got {tree}");
    };
    let ordered = main
        .iter()
        .find_map(|e| match e {
            Expectation::Sequence(parts) if parts.len() == 2 => Some(parts),
            _ => None,
        })
        .expect("forwarding/listener sequence");
    assert!(ordered[0].expects("dc1", &forward));
    assert!(ordered[1].expects("dc2", "CONNECTING Listener sink #0"));

    assert!(rig.watches().is_armed(&glitch_watch("analyzer", 4)));
    assert!(oracle.current().is_connected(&Connection::new("dc0", 0, "dc2", 0)));
}

#[test]
fn second_listener_reuses_the_stream() {
    let mut oracle = fresh(linear_with_bystander());
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    let tree = run(&mut oracle, &mut rig, "connect dc0 0 dc2 0").plan.expected.unwrap();

    assert!(tree.expects("dc0", "CONNECTING Talker stream #0"));
    assert!(!tree.expects("dc0", "Talker stream #0 on"));
    // dc1 listens already but has not forwarded out of port 1 yet.
    assert!(tree.expects(
        "dc1",
        &format!("1722 router: Enabled forwarding for stream {DC0_STREAM}")
    ));
    assert!(tree.expects("dc1", "Port 1 shaper bandwidth 7872000 bps"));
    // dc0 egress already carries the stream.
    assert!(!tree.expects("dc0", "Port 1 shaper bandwidth 7808000 bps"));
    assert!(!tree.expects("relay0", &format!("Stream {DC0_STREAM} bandwidth 7808000 bps")));
    assert!(tree.expects("relay1", &format!("Stream {DC0_STREAM} bandwidth 7872000 bps")));
}

#[test]
fn shaper_prediction_sums_streams_sharing_the_port() {
    let mut oracle = fresh(linear_with_bystander());
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    let tree = run(&mut oracle, &mut rig, "connect dc0 1 dc2 1").plan.expected.unwrap();

    assert!(tree.expects("dc0", "Port 1 shaper bandwidth 15616000 bps"));
    assert!(tree.expects("dc1", "Port 1 shaper bandwidth 7872000 bps"));
}

#[test]
fn startup_configures_analyzers_before_endpoints_boot() {
    let mut oracle = fresh(daisy_chain(3));
    let mut rig = RecordingRig::new();
    let plan = oracle.startup(&mut rig).expect("startup should be confirmed");
    assert!(plan.expected.is_none());

    let lines = rig.lines_to("analyzer");
    assert_eq!(lines.len(), 19);
    assert_eq!(lines[..3], ["d a", "b 0", "c 0 1000"]);
    assert_eq!(lines.last(), Some(&"e a"));
    assert!(rig.lines_to("relay0").is_empty());

    let trees = rig.expectations();
    assert!(trees[0].expects("analyzer", "connected to .*: 0"));
    assert!(trees[0].expects("relay1", "connected to .*: 0"));
    assert!(trees[1].expects("analyzer", "Channel 0: disabled"));
    assert!(trees[2].expects("analyzer", "Generating sine table for chan 0"));
    let enabled = trees[trees.len() - 2];
    assert!(enabled.expects("analyzer", "Channel 15: enabled"));

    let boot = trees[trees.len() - 1];
    for ep in ["dc0", "dc1", "dc2"] {
        assert!(boot.expects(ep, "PTP Port 0 Role: Master"));
        assert!(boot.expects(ep, "MAAP reserved Talker stream #0 address: 91:E0:F0:0"));
    }
    assert_eq!(oracle.checkpoints(), 0);
    assert_eq!(oracle.current().connections().count(), 0);
}

#[test]
fn only_the_grandmaster_skips_the_slave_lock() {
    let topology = TopologyBuilder::new()
        .endpoint("dc0", 2)
        .endpoint("dc1", 2)
        .endpoint("ep", 1)
        .relay("relay0", "dc0_1", "dc1_0")
        .relay("relay1", "dc1_1", "ep_0")
        .controller_at("dc0_0")
        .build();
    assert_eq!(topology.grandmaster().map(|ep| ep.name.as_str()), Some("dc0"));
    let boot = fresh(topology)
        .plan_startup()
        .emissions
        .into_iter()
        .filter_map(|e| match e {
            Emission::Await(tree) => Some(tree),
            _ => None,
        })
        .next_back()
        .expect("boot tree");

    assert!(!boot.expects("dc0", r"PTP Port \d+ Role: Slave"));
    assert!(!boot.expects("dc0", "PTP sync locked"));
    assert!(boot.expects("dc1", r"PTP Port \d+ Role: Slave"));
    assert!(boot.expects("dc1", "PTP sync locked"));
    assert!(boot.expects("ep", "PTP Role: Master"));
    assert!(boot.expects("ep", "PTP Role: Slave"));
    assert!(!boot.expects("ep", "PTP Port 0 Role: Master"));

    let locks: Vec<Duration> = boot
        .positives()
        .into_iter()
        .filter(|leaf| leaf.pattern == "PTP sync locked")
        .map(|leaf| leaf.timeout)
        .collect();
    assert_eq!(locks, [Duration::from_secs(9), Duration::from_secs(5)]);
}

#[test]
fn unconfirmed_startup_is_fatal() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    rig.reject_with("analyzer never connected");
    let err = oracle.startup(&mut rig).unwrap_err();
    assert!(matches!(err, OracleError::Startup(ref u) if u.reason == "analyzer never connected"));
    assert_eq!(rig.expectations().len(), 1);
    assert!(rig.lines_to("analyzer").is_empty());
}

#[test]
fn ready_is_announced_only_on_first_activation() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    let off = run(&mut oracle, &mut rig, "disconnect dc0 0 dc1 0").plan.expected.unwrap();
    assert!(off.expects("dc0", "Talker stream #0 off"));
    assert!(off.expects("analyzer", "Channel 2: Lost signal"));
    assert!(!rig.watches().is_armed(&glitch_watch("analyzer", 2)));

    let again = run(&mut oracle, &mut rig, "connect dc0 0 dc1 0").plan.expected.unwrap();
    assert!(again.expects("dc0", "Talker stream #0 on"));
    assert!(!again.expects("dc0", "Talker stream #0 ready"));
}

#[test]
fn redundant_connect_only_guards_the_listener() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    let tree = run(&mut oracle, &mut rig, "connect dc0 0 dc1 0").plan.expected.unwrap();
    assert!(tree.positives().iter().all(|leaf| leaf.source == "ctl"));
    assert!(tree.forbids("dc1", r"Media output \d+ lost lock"));
}

#[test]
fn loop_elects_a_clock_master_before_connecting() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    let steps = [step("connect dc0 0 dc1 0", false), step("connect dc1 0 dc0 0", true)];
    let reports = oracle.run(&mut rig, &steps).unwrap();

    assert_eq!(
        rig.lines_to("ctl"),
        [
            format!("connect {DC0} 0 {DC1} 0"),
            format!("set_clock_source_master {DC0}"),
            format!("connect {DC1} 0 {DC0} 0"),
        ]
    );
    let tree = reports[1].plan.expected.as_ref().unwrap();
    let Expectation::Sequence(parts) = tree else {
        panic!("clock change should be sequenced first, got {tree}");
    };
    assert!(parts[0].expects("dc0", "Setting clock source: LOCAL_CLOCK"));
    assert!(parts[1].expects("dc0", "CONNECTING Listener sink #0"));
    assert!(oracle.current().is_clock_source_master("dc0"));

    let report = run(&mut oracle, &mut rig, "disconnect dc1 0 dc0 0");
    assert_eq!(
        report.plan.emissions[0],
        Emission::Send {
            process: "ctl".into(),
            line: format!("set_clock_source_slave {DC0}"),
        }
    );
    assert!(!oracle.current().is_clock_source_master("dc0"));
}

#[test]
fn batch_is_confirmed_at_the_checkpoint() {
    let mut oracle = fresh(daisy_chain(3));
    let mut rig = RecordingRig::new();

    let first = oracle.run_step(&mut rig, 0, &step("connect dc0 0 dc1 0", false)).unwrap();
    assert_eq!(first.outcome, StepOutcome::Pending);
    assert!(rig.expectations().is_empty());
    assert_eq!(oracle.pending().len(), 1);
    assert!(oracle.next().is_connected(&Connection::new("dc0", 0, "dc1", 0)));
    assert_eq!(oracle.current().connections().count(), 0);

    oracle.run_step(&mut rig, 1, &step("connect dc0 0 dc2 0", false)).unwrap();
    let closing = oracle.run_step(&mut rig, 2, &step("continue", true)).unwrap();
    assert_eq!(closing.outcome, StepOutcome::Committed);
    assert_eq!(oracle.checkpoints(), 1);
    assert!(oracle.pending().is_empty());
    assert_eq!(oracle.current().connections().count(), 2);

    let expectations = rig.expectations();
    assert_eq!(expectations.len(), 1);
    let Expectation::AllOf(batch) = expectations[0] else {
        panic!("batch should be an AllOf");
    };
    assert_eq!(batch.len(), 2);
    let cleared: Vec<&RigEvent> = rig
        .events()
        .iter()
        .filter(|e| matches!(e, RigEvent::ClearHistory(_)))
        .collect();
    assert_eq!(cleared.len(), oracle.processes().len());
}

#[test]
fn unconfirmed_step_is_promoted_when_continuing() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    rig.reject_with("no Success within 10s");
    let report = run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    assert_eq!(
        report.outcome,
        StepOutcome::Failed {
            reason: "no Success within 10s".into()
        }
    );
    assert!(oracle.current().is_connected(&Connection::new("dc0", 0, "dc1", 0)));
}

#[test]
fn unconfirmed_step_aborts_under_stop_on_error() {
    let mut oracle = Orchestrator::new(daisy_chain(2), RunPolicy { stop_on_error: true });
    let mut rig = RecordingRig::new();
    rig.reject_with("timeout");
    let steps = [step("connect dc0 0 dc1 0", true), step("discover", true)];
    let err = oracle.run(&mut rig, &steps).unwrap_err();
    assert!(matches!(err, OracleError::Unconfirmed { step: 0, .. }));
    assert_eq!(oracle.current().connections().count(), 0);
    assert_eq!(rig.expectations().len(), 1);
}

#[test]
fn unknown_names_fail_before_anything_is_sent() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    let err = oracle.run_step(&mut rig, 0, &step("connect dc0 0 dc9 0", true));
    assert!(matches!(err, Err(OracleError::UnknownEndpoint(name)) if name == "dc9"));
    let err = oracle.run_step(&mut rig, 0, &step("link_down relay9", true));
    assert!(matches!(err, Err(OracleError::UnknownAnalyzer(_))));
    assert!(rig.events().is_empty());
}

#[test]
fn link_down_tears_down_crossing_streams() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    assert!(rig.watches().is_armed(&glitch_watch("analyzer", 2)));

    let report = run(&mut oracle, &mut rig, "link_down relay0");
    assert_eq!(rig.lines_to("relay0"), ["r o"]);
    let tree = report.plan.expected.unwrap();
    assert!(tree.expects("dc1", "ADP: Removing entity who timed out -> GUID"));
    assert!(tree.expects("analyzer", "Channel 2: Lost signal"));
    assert!(tree.expects("dc0", "Talker stream #0 off"));
    assert!(!rig.watches().is_armed(&glitch_watch("analyzer", 2)));
    assert_eq!(oracle.current().connections().count(), 0);
    assert!(oracle.current().is_relay_open("relay0"));

    // With the link down the controller cannot reach dc1.
    let tree = run(&mut oracle, &mut rig, "discover").plan.expected.unwrap();
    assert!(tree.expects("ctl", "Found 1 entities"));

    let report = run(&mut oracle, &mut rig, "link_up relay0");
    assert_eq!(report.plan.expected, None);
    assert!(!oracle.current().is_relay_open("relay0"));
}

#[test]
fn idle_link_down_just_settles() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    let report = run(&mut oracle, &mut rig, "link_down relay0");
    assert_eq!(report.plan.expected, None);
    assert!(matches!(report.plan.emissions[1], Emission::Sleep(_)));
}

#[test]
fn link_downup_restores_the_signal() {
    let mut oracle = fresh(daisy_chain(2));
    let mut rig = RecordingRig::new();
    run(&mut oracle, &mut rig, "connect dc0 0 dc1 0");
    rig.clear_events();

    let report = run(&mut oracle, &mut rig, "link_downup relay0 3");
    let emissions = &report.plan.emissions;
    assert_eq!(emissions.len(), 4);
    assert!(matches!(&emissions[0], Emission::Send { line, .. } if line == "r o"));
    assert!(matches!(
        &emissions[1],
        Emission::Await(lost) if lost.expects("analyzer", "Channel 2: Lost signal")
    ));
    assert_eq!(emissions[2], Emission::Sleep(Duration::from_secs(3)));
    assert!(matches!(&emissions[3], Emission::Send { line, .. } if line == "r c"));

    let restored = report.plan.expected.unwrap();
    assert!(restored.expects("analyzer", "Channel 2: Signal detected at 1000 Hz"));
    assert!(rig.watches().is_armed(&glitch_watch("analyzer", 2)));
    assert!(oracle.current().is_connected(&Connection::new("dc0", 0, "dc1", 0)));
    assert!(!oracle.current().is_relay_open("relay0"));
}

#[test]
fn controller_queries_follow_the_registry() {
    let mut oracle = fresh(daisy_chain(3));
    let mut rig = RecordingRig::new();

    let empty = run(&mut oracle, &mut rig, "check_connections").plan.expected.unwrap();
    assert!(empty.forbids("ctl", "->"));

    run(&mut oracle, &mut rig, "connect dc1 0 dc2 1");
    let listed = run(&mut oracle, &mut rig, "check_connections").plan.expected.unwrap();
    assert!(listed.expects("ctl", &format!(r"{DC1}\[0\] -> {DC2}\[1\]")));

    let found = run(&mut oracle, &mut rig, "discover").plan.expected.unwrap();
    assert!(found.expects("ctl", "Found 3 entities"));

    let ping = run(&mut oracle, &mut rig, "ping dc2").plan.expected.unwrap();
    assert!(ping.expects("dc2", "IDENTIFY Ping"));
    let (on, off) = (format!("identify {DC2} on"), format!("identify {DC2} off"));
    assert!(rig.lines_to("ctl").ends_with(&[on.as_str(), off.as_str()]));
}

#[test]
fn resolved_plan_runs_end_to_end() {
    let plan = TestPlan::from_json(
        r#"{"seed": 5, "steps": [
            {"command": "connect dc0 0 dc1 0", "comment": "first hop"},
            {"random": {"count": 6, "commands": ["connect dc0 0 dc2 0", "disconnect dc0 0 dc2 0"]}},
            {"command": "check_connections"}
        ]}"#,
    )
    .unwrap();
    let steps = plan.resolve(None).unwrap();
    let mut oracle = fresh(daisy_chain(3));
    let mut rig = RecordingRig::new();
    let reports = oracle.run(&mut rig, &steps).unwrap();
    assert_eq!(reports.len(), 9);
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, StepOutcome::Committed | StepOutcome::Pending)));
    assert_eq!(oracle.checkpoints(), 3);
}

#[test]
fn every_predicted_pattern_compiles() {
    let mut oracle = fresh(daisy_chain(3));
    let mut rig = RecordingRig::new();
    for command in [
        "discover",
        "enumerate dc1",
        "connect dc0 0 dc2 0",
        "connect dc2 0 dc0 0",
        "check_connections",
        "link_downup relay1 2",
        "link_down relay0",
        "link_up relay0",
        "ping dc1",
    ] {
        run(&mut oracle, &mut rig, command);
    }
    let trees = rig.expectations();
    assert!(!trees.is_empty());
    for tree in trees {
        for (leaf, _) in tree.leaves() {
            assert!(
                regex::Regex::new(&leaf.pattern).is_ok(),
                "bad pattern {:?} for {}",
                leaf.pattern,
                leaf.source
            );
        }
    }
}
