// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for topology loading, plan decoding and step execution.
//!
//! Registry invariant violations are not represented here: they mean the
//! prediction model and the registry have diverged, and they are debug
//! assertions.

use thiserror::Error;

/// Problems found while installing a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// An endpoint references an analyzer that was not declared.
    #[error("endpoint '{endpoint}' references unknown analyzer '{analyzer}'")]
    UnknownAnalyzer {
        /// Endpoint name.
        endpoint: String,
        /// Missing analyzer name.
        analyzer: String,
    },
    /// Endpoints have one or two Ethernet ports.
    #[error("endpoint '{endpoint}' declares {ports} ports (expected 1 or 2)")]
    BadPortCount {
        /// Endpoint name.
        endpoint: String,
        /// Declared port count.
        ports: u8,
    },
    /// The selected rig user has no ids for a participant.
    #[error("user '{user}' not found for '{entity}'")]
    MissingUser {
        /// Endpoint or analyzer name.
        entity: String,
        /// Rig user being resolved.
        user: String,
    },
    /// A node that must be routable has no adjacency entry.
    #[error("node '{0}' has no port connections")]
    UnlinkedNode(String),
    /// Two participants share a name.
    #[error("duplicate participant name '{0}'")]
    DuplicateName(String),
}

/// Problems decoding a test plan. All of them are fatal: a bad plan is
/// reported before anything is sent to the rig.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A step had no command text.
    #[error("empty command")]
    EmptyCommand,
    /// The verb is not part of the action vocabulary.
    #[error("unknown action '{0}'")]
    UnknownVerb(String),
    /// A required argument is missing.
    #[error("'{verb}' expects {expected} argument(s), got {found}")]
    Arity {
        /// Action verb.
        verb: String,
        /// Number of arguments the verb takes.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },
    /// A numeric argument failed to parse.
    #[error("'{verb}': argument '{value}' is not a valid number")]
    BadNumber {
        /// Action verb.
        verb: String,
        /// Offending argument text.
        value: String,
    },
    /// A random generator had nothing to choose from.
    #[error("random generator has no commands")]
    EmptyGenerator,
    /// The plan document is not valid JSON for a plan.
    #[error("plan decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The matcher could not confirm an expectation within its time bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expectation not confirmed: {reason}")]
pub struct Unconfirmed {
    /// Matcher-supplied description of the unmet leaf.
    pub reason: String,
}

impl Unconfirmed {
    /// Creates an unconfirmed report.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the orchestrator while running a plan.
#[derive(Debug, Error)]
pub enum OracleError {
    /// An action named an endpoint that is not in the topology.
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
    /// A link action named something that is not an analyzer.
    #[error("unknown analyzer '{0}'")]
    UnknownAnalyzer(String),
    /// The plan could not be decoded.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// The rig did not come up as predicted; no step can run.
    #[error("rig startup failed")]
    Startup(#[source] Unconfirmed),
    /// A step's expectations were not confirmed and the run stops on error.
    #[error("step {step} failed")]
    Unconfirmed {
        /// Zero-based step index.
        step: usize,
        /// Matcher failure.
        #[source]
        source: Unconfirmed,
    },
}
