// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Action orchestrator: turns plan steps into rig commands and predictions,
//! and advances the registry when predictions are confirmed.
//!
//! Each step mutates the `next` generation, compiles what every participant
//! should print in response, emits the command lines and adds its tree to the
//! pending batch. A checkpoint step hands `AllOf(batch)` to the rig's matcher
//! and, once confirmed, replaces `current` with `next`.
//!
//! Classification and forwarding predicates are evaluated on a snapshot of
//! `next` taken before the step mutates it; shaper values are computed after.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::action::Action;
use crate::error::{OracleError, Unconfirmed};
use crate::expect::Expectation;
use crate::graph;
use crate::ident::Connection;
use crate::model::{AnalyzerKind, Endpoint};
use crate::plan::TestStep;
use crate::sequences;
use crate::state::{State, StreamAction, TalkerOutcome};
use crate::topology::Topology;

/// Time allowed for a relay to switch when nothing else is awaited.
pub const RELAY_SETTLE: Duration = Duration::from_millis(100);

/// Process-facing side of the oracle: where command lines go and where
/// predictions are checked.
pub trait Rig {
    /// Sends one line to a process's stdin.
    fn send_line(&mut self, process: &str, line: &str);
    /// Blocks for `duration`.
    fn sleep(&mut self, duration: Duration);
    /// Checks an expectation tree against process output, applying leaf
    /// hooks as leaves match.
    fn expect(&mut self, expectation: &Expectation) -> Result<(), Unconfirmed>;
    /// Forgets output already seen from a process.
    fn clear_history(&mut self, process: &str);
}

/// One externally visible effect of a step, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Emission {
    /// A command line to a process.
    Send {
        /// Target process.
        process: String,
        /// Line sent.
        line: String,
    },
    /// A pause.
    Sleep(Duration),
    /// An expectation checked immediately, before later emissions.
    Await(Expectation),
    /// Output history of a process is discarded.
    ClearHistory(String),
}

impl Emission {
    fn send(process: &str, line: impl Into<String>) -> Self {
        Self::Send {
            process: process.to_owned(),
            line: line.into(),
        }
    }
}

/// Everything a step will do, computed before anything is emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepPlan {
    /// Effects in order.
    pub emissions: Vec<Emission>,
    /// Contribution to the checkpoint batch.
    pub expected: Option<Expectation>,
}

impl StepPlan {
    fn with_expected(mut self, tree: Expectation) -> Self {
        if !tree.is_empty() {
            self.expected = Some(tree);
        }
        self
    }
}

/// Failure handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunPolicy {
    /// Abort the run on the first unconfirmed step. When unset the step is
    /// recorded as failed and the run continues from the predicted state.
    pub stop_on_error: bool,
}

/// What happened to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step closed a batch and the batch was confirmed.
    Committed,
    /// The step was added to an open batch.
    Pending,
    /// Confirmation failed.
    Failed {
        /// Matcher's explanation.
        reason: String,
    },
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Zero-based position in the resolved plan.
    pub index: usize,
    /// Action run.
    pub action: Action,
    /// Effects and prediction.
    pub plan: StepPlan,
    /// Result.
    pub outcome: StepOutcome,
}

/// Owns both registry generations and drives a plan against a [`Rig`].
#[derive(Debug)]
pub struct Orchestrator {
    topology: Arc<Topology>,
    current: State,
    next: State,
    pending: Vec<Expectation>,
    batch_steps: usize,
    checkpoints: usize,
    policy: RunPolicy,
}

impl Orchestrator {
    /// Creates an orchestrator with an empty registry.
    pub fn new(topology: Arc<Topology>, policy: RunPolicy) -> Self {
        let current = State::new(Arc::clone(&topology));
        Self {
            next: current.clone(),
            current,
            topology,
            pending: Vec::new(),
            batch_steps: 0,
            checkpoints: 0,
            policy,
        }
    }

    /// Last confirmed generation.
    pub fn current(&self) -> &State {
        &self.current
    }

    /// Generation being built by the open batch.
    pub fn next(&self) -> &State {
        &self.next
    }

    /// Trees waiting for the next checkpoint.
    pub fn pending(&self) -> &[Expectation] {
        &self.pending
    }

    /// Checkpoints reached so far.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    /// Every process the rig runs: controller, endpoints, analyzers.
    pub fn processes(&self) -> Vec<String> {
        let mut processes = vec![self.topology.controller().to_owned()];
        processes.extend(self.topology.endpoints().map(|ep| ep.name.clone()));
        processes.extend(self.topology.analyzers().map(|a| a.name.clone()));
        processes
    }

    /// Runs resolved steps in order. Stops early only when the policy says so.
    pub fn run<R: Rig>(&mut self, rig: &mut R, steps: &[TestStep]) -> Result<Vec<StepReport>, OracleError> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| self.run_step(rig, index, step))
            .collect()
    }

    /// What the rig prints while it boots, in bring-up order: analyzer host
    /// tools connect, audio generators are disabled, programmed and enabled,
    /// then every endpoint settles its PTP roles and reserves its MAAP
    /// addresses. Every tree is awaited in place and the registry is left
    /// untouched.
    pub fn plan_startup(&self) -> StepPlan {
        let topology = &self.topology;
        let mut emissions = Vec::new();

        let connected: Vec<Expectation> = topology
            .analyzers()
            .map(sequences::analyzer_connected_seq)
            .collect();
        if !connected.is_empty() {
            emissions.push(Emission::Await(Expectation::AllOf(connected)));
        }
        for analyzer in topology.analyzers().filter(|a| a.kind == AnalyzerKind::Audio) {
            let name = analyzer.name.as_str();
            emissions.push(Emission::send(name, "d a"));
            emissions.push(Emission::Await(sequences::analyzer_disabled_seq(analyzer)));
            emissions.push(Emission::send(name, format!("b {}", analyzer.base)));
            for (channel, frequency) in &analyzer.frequencies {
                emissions.push(Emission::send(name, format!("c {channel} {frequency}")));
                emissions.push(Emission::Await(sequences::sine_table_seq(analyzer, *channel)));
            }
            emissions.push(Emission::send(name, "e a"));
            let enabled = sequences::analyzer_enabled_seq(analyzer);
            if !enabled.is_empty() {
                emissions.push(Emission::Await(enabled));
            }
        }

        let grandmaster = topology.grandmaster().map(|ep| ep.name.as_str());
        debug!(?grandmaster, "startup planned");
        let count = topology.endpoints().count();
        // No electable grandmaster: nobody is predicted to go slave.
        let ptp: Vec<Expectation> = topology
            .endpoints()
            .map(|ep| {
                let master = grandmaster.is_none_or(|gm| gm == ep.name);
                sequences::ptp_startup_seq(ep, master, count)
            })
            .collect();
        let mut boot = Vec::new();
        if !ptp.is_empty() {
            boot.push(Expectation::AllOf(ptp));
        }
        boot.extend(
            topology
                .endpoints()
                .map(sequences::maap_seq)
                .filter(|maap| !maap.is_empty()),
        );
        if !boot.is_empty() {
            emissions.push(Emission::Await(Expectation::AllOf(boot)));
        }
        StepPlan {
            emissions,
            expected: None,
        }
    }

    /// Emits [`Self::plan_startup`]. An unconfirmed await is fatal whatever
    /// the policy.
    #[instrument(skip_all)]
    pub fn startup<R: Rig>(&mut self, rig: &mut R) -> Result<StepPlan, OracleError> {
        let plan = self.plan_startup();
        if let Some(grandmaster) = self.topology.grandmaster() {
            info!(endpoint = %grandmaster.name, "using grandmaster");
        }
        execute(rig, &plan.emissions).map_err(OracleError::Startup)?;
        Ok(plan)
    }

    /// Runs one step: plans it, emits it, and confirms the batch when the
    /// step is a checkpoint.
    #[instrument(skip(self, rig, step), fields(action = %step.action))]
    pub fn run_step<R: Rig>(
        &mut self,
        rig: &mut R,
        index: usize,
        step: &TestStep,
    ) -> Result<StepReport, OracleError> {
        if let Some(comment) = &step.comment {
            info!(">> {comment}");
        }
        if self.batch_steps == 0 {
            self.next = self.current.clone();
        }

        let plan = self.plan_step(&step.action)?;
        let mut failure = execute(rig, &plan.emissions).err();
        if let Some(tree) = &plan.expected {
            self.pending.push(tree.clone());
        }
        self.batch_steps += 1;

        if step.checkpoint {
            if failure.is_none() && !self.pending.is_empty() {
                self.checkpoints += 1;
                info!(checkpoint = self.checkpoints, "check");
                let batch = Expectation::AllOf(std::mem::take(&mut self.pending));
                failure = rig.expect(&batch).err();
                for process in self.processes() {
                    rig.clear_history(&process);
                }
            }
            self.pending.clear();
            self.batch_steps = 0;
        }

        let outcome = match failure {
            Some(unconfirmed) => {
                warn!(index, reason = %unconfirmed.reason, "step not confirmed");
                if self.policy.stop_on_error {
                    return Err(OracleError::Unconfirmed {
                        step: index,
                        source: unconfirmed,
                    });
                }
                if step.checkpoint {
                    self.commit();
                }
                StepOutcome::Failed {
                    reason: unconfirmed.reason,
                }
            }
            None if step.checkpoint => {
                self.commit();
                StepOutcome::Committed
            }
            None => StepOutcome::Pending,
        };
        Ok(StepReport {
            index,
            action: step.action.clone(),
            plan,
            outcome,
        })
    }

    fn commit(&mut self) {
        self.current = self.next.clone();
        self.current.dump();
    }

    /// Mutates `next` for `action` and returns what the step emits and
    /// expects. Names are checked before anything changes.
    pub fn plan_step(&mut self, action: &Action) -> Result<StepPlan, OracleError> {
        let controller = self.topology.controller().to_owned();
        let plan = match action {
            Action::Connect(c) => self.plan_stream(c, StreamAction::Connect)?,
            Action::Disconnect(c) => self.plan_stream(c, StreamAction::Disconnect)?,
            Action::Enumerate { endpoint } => {
                let ep = self.require_endpoint(endpoint)?;
                let guid = self.guid(endpoint)?;
                StepPlan {
                    emissions: vec![Emission::send(&controller, format!("enumerate 0x{guid}"))],
                    expected: None,
                }
                .with_expected(sequences::controller_enumerate_seq(&controller, &ep.descriptors))
            }
            Action::Discover => {
                let visible = graph::get_endpoints_connected_to(&self.next, &controller);
                StepPlan {
                    emissions: vec![
                        Emission::ClearHistory(controller.clone()),
                        Emission::send(&controller, "discover"),
                    ],
                    expected: None,
                }
                .with_expected(sequences::discover_seq(&controller, visible.len()))
            }
            Action::Ping { endpoint } => {
                let guid = self.guid(endpoint)?;
                StepPlan {
                    emissions: vec![
                        Emission::send(&controller, format!("identify 0x{guid} on")),
                        Emission::send(&controller, format!("identify 0x{guid} off")),
                    ],
                    expected: None,
                }
                .with_expected(Expectation::AllOf(sequences::ping_seq(&controller, endpoint)))
            }
            Action::LinkUp { analyzer } => {
                self.require_analyzer(analyzer)?;
                self.next.set_relay_closed(analyzer);
                StepPlan {
                    emissions: vec![Emission::send(analyzer, "r c"), Emission::Sleep(RELAY_SETTLE)],
                    expected: None,
                }
            }
            Action::LinkDown { analyzer } => self.plan_link_down(analyzer)?,
            Action::LinkDownUp { analyzer, hold } => self.plan_link_downup(analyzer, *hold)?,
            Action::Sleep(duration) => StepPlan {
                emissions: vec![Emission::Sleep(*duration)],
                expected: None,
            },
            Action::CheckConnections => StepPlan {
                emissions: vec![Emission::send(&controller, "show connections")],
                expected: None,
            }
            .with_expected(sequences::check_connections_seq(&controller, &self.next)),
            Action::Continue => StepPlan::default(),
        };
        debug!(%action, emissions = plan.emissions.len(), "step planned");
        Ok(plan)
    }

    fn require_endpoint(&self, name: &str) -> Result<&Endpoint, OracleError> {
        self.topology
            .endpoint(name)
            .ok_or_else(|| OracleError::UnknownEndpoint(name.to_owned()))
    }

    fn require_analyzer(&self, name: &str) -> Result<(), OracleError> {
        if self.topology.analyzer(name).is_some() {
            Ok(())
        } else {
            Err(OracleError::UnknownAnalyzer(name.to_owned()))
        }
    }

    fn guid(&self, endpoint: &str) -> Result<String, OracleError> {
        self.topology
            .avb_id(endpoint)
            .map(str::to_owned)
            .ok_or_else(|| OracleError::UnknownEndpoint(endpoint.to_owned()))
    }

    fn plan_stream(&mut self, c: &Connection, action: StreamAction) -> Result<StepPlan, OracleError> {
        let topology = Arc::clone(&self.topology);
        let src_ep = self.require_endpoint(c.src())?.clone();
        self.require_endpoint(c.dst())?;
        let src_guid = self.guid(c.src())?;
        let dst_guid = self.guid(c.dst())?;
        let controller = topology.controller();

        let pre = self.next.clone();
        let talker_outcome = pre.talker_state(c, action);
        let listener_outcome = pre.listener_state(c, action);
        let controller_outcome = pre.controller_state(c, action);
        let changes = talker_outcome != TalkerOutcome::Redundant;

        match action {
            StreamAction::Connect => self.next.connect(c),
            StreamAction::Disconnect => self.next.disconnect(c),
        };
        let clock_changes = self.reconcile_clock_masters();
        let post = &self.next;

        let talker_expect = sequences::talker_seq(
            &c.talker,
            talker_outcome,
            action,
            pre.talker_on_count(c.src()) == 0,
        );
        let mut listener_expect = topology
            .endpoint(c.dst())
            .map(|ep| sequences::listener_seq(ep, c.listener.dst_stream, listener_outcome, action))
            .unwrap_or_default();
        listener_expect.extend(sequences::analyzer_seq(&topology, c, listener_outcome, action));
        if changes {
            listener_expect.extend(sequences::analyzer_qav_seq(&pre, c, action));
        }
        let controller_expect = sequences::controller_seq(controller, controller_outcome);

        let interior = graph::find_path(&pre, c.src(), c.dst())
            .map(|path| graph::get_path_endpoints(&topology, &path))
            .unwrap_or_default();

        let mut forward = Vec::new();
        for node in interior.iter().filter_map(|n| topology.endpoint(n)) {
            if !node.is_dual_port() {
                continue;
            }
            let sees = match action {
                StreamAction::Connect => graph::node_will_see_stream_enable(&pre, c, &node.name),
                StreamAction::Disconnect => graph::node_will_see_stream_disable(&pre, c, &node.name),
            };
            if sees {
                forward.extend(sequences::stream_forward_seq(&topology, &node.name, &c.talker, action));
                forward.extend(sequences::port_shaper_seq(&pre, post, node, c, action));
            }
        }

        let mut main = talker_expect;
        if !forward.is_empty() {
            main.push(Expectation::Sequence(vec![
                Expectation::AllOf(forward),
                Expectation::AllOf(listener_expect),
            ]));
        } else if !listener_expect.is_empty() {
            main.push(Expectation::AllOf(listener_expect));
        }
        main.extend(controller_expect);
        if changes && src_ep.is_dual_port() {
            main.extend(sequences::port_shaper_seq(&pre, post, &src_ep, c, action));
        }

        let mut negatives = Vec::new();
        for node in topology.endpoints() {
            if !node.is_dual_port() || interior.contains(&node.name) {
                continue;
            }
            negatives.extend(sequences::stream_forward_seq(&topology, &node.name, &c.talker, action));
            if node.name != c.src() {
                negatives.extend(sequences::any_port_shaper_seq(&node.name));
            }
        }
        if !negatives.is_empty() {
            main.push(Expectation::NoneOf(negatives));
        }

        let mut emissions = Vec::new();
        let mut clock_expect = Vec::new();
        for (endpoint, master) in &clock_changes {
            let guid = self.guid(endpoint)?;
            let command = if *master {
                "set_clock_source_master"
            } else {
                "set_clock_source_slave"
            };
            emissions.push(Emission::send(controller, format!("{command} 0x{guid}")));
            clock_expect.extend(sequences::clock_source_seq(controller, endpoint, *master));
        }
        emissions.push(Emission::send(
            controller,
            format!(
                "{action} 0x{src_guid} {} 0x{dst_guid} {}",
                c.talker.src_stream, c.listener.dst_stream
            ),
        ));

        let tree = if clock_expect.is_empty() {
            Expectation::AllOf(main)
        } else {
            Expectation::Sequence(vec![Expectation::AllOf(clock_expect), Expectation::AllOf(main)])
        };
        Ok(StepPlan {
            emissions,
            expected: None,
        }
        .with_expected(tree))
    }

    /// Elects one clock source master per connection loop of `next` and
    /// demotes masters no longer on any loop. Returns the changes made, as
    /// `(endpoint, becomes_master)`, masters first.
    fn reconcile_clock_masters(&mut self) -> Vec<(String, bool)> {
        let loops = graph::get_loops(&self.next);
        let mut changes = Vec::new();
        for cycle in &loops {
            let elected = cycle
                .iter()
                .find(|n| self.next.is_clock_source_master(n))
                .or_else(|| cycle.first())
                .cloned();
            if let Some(elected) = elected {
                if !self.next.is_clock_source_master(&elected) {
                    debug!(%elected, "electing clock source master");
                    self.next.set_clock_source_master(&elected);
                    changes.push((elected, true));
                }
            }
        }
        let looped: BTreeSet<&str> = loops.iter().flatten().map(String::as_str).collect();
        let stale: Vec<String> = self
            .next
            .clock_masters()
            .filter(|m| !looped.contains(m))
            .map(str::to_owned)
            .collect();
        for master in stale {
            debug!(%master, "clock source master left its loop");
            self.next.set_clock_source_slave(&master);
            changes.push((master, false));
        }
        changes
    }

    fn plan_link_down(&mut self, analyzer: &str) -> Result<StepPlan, OracleError> {
        self.require_analyzer(analyzer)?;
        let pre = self.next.clone();
        let mut expected = Vec::new();
        let mut affected = BTreeSet::new();
        for c in crossing(&pre, analyzer) {
            expected.push(sequences::entity_lost_seq(c.dst()));
            expected.extend(sequences::analyzer_listener_disconnect_seq(&self.topology, &c));
            affected.insert(c.talker.clone());
            self.next.disconnect(&c);
        }
        for talker in &affected {
            if self.next.talker_active_count(talker) == 0 {
                expected.push(sequences::talker_off_seq(talker, sequences::ENTITY_TIMEOUT));
            }
        }
        self.next.set_relay_open(analyzer);

        let mut emissions = vec![Emission::send(analyzer, "r o")];
        if expected.is_empty() {
            emissions.push(Emission::Sleep(RELAY_SETTLE));
        }
        Ok(StepPlan {
            emissions,
            expected: None,
        }
        .with_expected(Expectation::AllOf(expected)))
    }

    fn plan_link_downup(&mut self, analyzer: &str, hold: Duration) -> Result<StepPlan, OracleError> {
        self.require_analyzer(analyzer)?;
        let pre = self.next.clone();
        let through = crossing(&pre, analyzer);
        let lost: Vec<Expectation> = through
            .iter()
            .flat_map(|c| sequences::analyzer_listener_disconnect_seq(&self.topology, c))
            .collect();
        let restored: Vec<Expectation> = through
            .iter()
            .flat_map(|c| sequences::analyzer_listener_connect_seq(&self.topology, c))
            .collect();

        let mut emissions = vec![Emission::send(analyzer, "r o")];
        if !lost.is_empty() {
            emissions.push(Emission::Await(Expectation::AllOf(lost)));
        }
        emissions.push(Emission::Sleep(hold));
        emissions.push(Emission::send(analyzer, "r c"));
        // The relay ends closed; the registry is unchanged.
        self.next.set_relay_closed(analyzer);
        Ok(StepPlan {
            emissions,
            expected: None,
        }
        .with_expected(Expectation::AllOf(restored)))
    }
}

/// Live connections whose path runs through `analyzer`.
fn crossing(state: &State, analyzer: &str) -> Vec<Connection> {
    state
        .connections()
        .filter(|(c, _)| {
            graph::find_path(state, c.src(), c.dst())
                .is_some_and(|path| path.iter().any(|n| n == analyzer))
        })
        .map(|(c, _)| c.clone())
        .collect()
}

fn execute<R: Rig>(rig: &mut R, emissions: &[Emission]) -> Result<(), Unconfirmed> {
    for emission in emissions {
        match emission {
            Emission::Send { process, line } => {
                debug!(%process, %line, "send");
                rig.send_line(process, line);
            }
            Emission::Sleep(duration) => rig.sleep(*duration),
            Emission::Await(expectation) => rig.expect(expectation)?,
            Emission::ClearHistory(process) => rig.clear_history(process),
        }
    }
    Ok(())
}
