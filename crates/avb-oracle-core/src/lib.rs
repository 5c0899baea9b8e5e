// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! avb-oracle-core: predictive test oracle for an AVB daisy-chain rig.
//!
//! Given the rig's physical topology and a sequence of actions, the oracle
//! predicts every line each participant (talkers, listeners, forwarding
//! nodes, the controller, audio and traffic analyzers) must print in
//! response, before the command is issued. The prediction is an
//! [`Expectation`] tree handed to an external matcher through the [`Rig`]
//! trait.
//!
//! The model is split into two registry generations ([`State`]): `current`
//! is what the rig has been confirmed to do, `next` is what the open batch of
//! steps will make it do. [`Orchestrator`] owns both and commits `next` at
//! confirmed checkpoints.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions
)]

pub mod action;
pub mod avb1722;
mod error;
pub mod expect;
pub mod graph;
mod ident;
mod model;
pub mod orchestrator;
pub mod plan;
pub mod render;
pub mod sequences;
pub mod state;
mod topology;

/// Test actions and their parser.
pub use action::Action;
/// Error types.
pub use error::{OracleError, PlanError, TopologyError, Unconfirmed};
/// Expectation trees and matcher-side watch hooks.
pub use expect::{Expectation, Expected, Hook, Polarity, Watch, WatchList};
/// Value identities for streams and connections.
pub use ident::{Connection, Listener, StreamIndex, Talker};
/// Rig participants.
pub use model::{Analyzer, AnalyzerKind, DescriptorItem, Descriptors, Endpoint, UserIds};
/// Step execution.
pub use orchestrator::{Emission, Orchestrator, Rig, RunPolicy, StepOutcome, StepPlan, StepReport};
/// Plan documents.
pub use plan::{PlanEntry, PlanStep, RandomGenerator, TestPlan, TestStep};
/// Registry generations and outcome classifications.
pub use state::{ControllerOutcome, ListenerOutcome, State, StreamAction, TalkerOutcome};
/// Static topology.
pub use topology::{Links, Topology};
