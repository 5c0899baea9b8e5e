// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Test plan documents and their expansion into executable steps.
//!
//! A plan is a JSON object `{"seed": 7, "steps": [...]}` or a bare array of
//! steps. Each step is either a command:
//!
//! ```json
//! {"command": "connect dc0 0 dc1 0", "checkpoint": false, "comment": "first hop"}
//! ```
//!
//! or a random generator that expands to `count` unconfirmed steps drawn
//! from `commands`, followed by one checkpoint:
//!
//! ```json
//! {"random": {"count": 20, "commands": ["connect dc0 0 dc1 0", "disconnect dc0 0 dc1 0"]}}
//! ```

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::Action;
use crate::error::PlanError;

/// Seed used when neither the plan nor the caller provides one.
pub const DEFAULT_SEED: u64 = 1;

/// A command step as written in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    /// Command text; a step without one only carries a comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Whether the batch is confirmed after this step. Absent means yes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<bool>,
    /// Free text logged before the step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A seeded random walk over a set of commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomGenerator {
    /// Number of commands drawn.
    pub count: usize,
    /// Candidate commands.
    pub commands: Vec<String>,
}

/// One entry of a plan's `steps` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanEntry {
    /// A random generator.
    Random {
        /// Generator parameters.
        random: RandomGenerator,
    },
    /// A single command.
    Step(PlanStep),
}

#[derive(Deserialize)]
struct PlanBody {
    #[serde(default)]
    seed: Option<u64>,
    steps: Vec<PlanEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanDocument {
    Body(PlanBody),
    Steps(Vec<PlanEntry>),
}

/// A decoded test plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "PlanDocument")]
pub struct TestPlan {
    /// Seed for random generators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Plan entries in order.
    pub steps: Vec<PlanEntry>,
}

impl From<PlanDocument> for TestPlan {
    fn from(doc: PlanDocument) -> Self {
        match doc {
            PlanDocument::Body(body) => Self {
                seed: body.seed,
                steps: body.steps,
            },
            PlanDocument::Steps(steps) => Self { seed: None, steps },
        }
    }
}

/// An executable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    /// Parsed action.
    pub action: Action,
    /// Whether the pending batch is confirmed after this step.
    pub checkpoint: bool,
    /// Comment carried from the plan.
    pub comment: Option<String>,
}

impl TestPlan {
    /// Decodes a plan from JSON text.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Seed the plan expands with: `seed_override`, else the plan's own,
    /// else [`DEFAULT_SEED`].
    pub fn effective_seed(&self, seed_override: Option<u64>) -> u64 {
        seed_override.or(self.seed).unwrap_or(DEFAULT_SEED)
    }

    /// Parses every command and expands random generators.
    ///
    /// All commands are parsed, including generator candidates that are
    /// never drawn, so any bad command fails the whole plan.
    pub fn resolve(&self, seed_override: Option<u64>) -> Result<Vec<TestStep>, PlanError> {
        let seed = self.effective_seed(seed_override);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::new();
        for entry in &self.steps {
            match entry {
                PlanEntry::Step(step) => {
                    let action = match &step.command {
                        Some(command) => command.parse()?,
                        None => Action::Continue,
                    };
                    out.push(TestStep {
                        checkpoint: step.command.is_some() && step.checkpoint.unwrap_or(true),
                        action,
                        comment: step.comment.clone(),
                    });
                }
                PlanEntry::Random { random } => {
                    let candidates = random
                        .commands
                        .iter()
                        .map(|c| c.parse::<Action>())
                        .collect::<Result<Vec<_>, _>>()?;
                    if candidates.is_empty() {
                        return Err(PlanError::EmptyGenerator);
                    }
                    for _ in 0..random.count {
                        if let Some(action) = candidates.choose(&mut rng) {
                            out.push(TestStep {
                                action: action.clone(),
                                checkpoint: false,
                                comment: None,
                            });
                        }
                    }
                    out.push(TestStep {
                        action: Action::Continue,
                        checkpoint: true,
                        comment: None,
                    });
                }
            }
        }
        debug!(seed, steps = out.len(), "plan resolved");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::ident::Connection;

    #[test]
    fn accepts_object_and_bare_array() {
        let object = TestPlan::from_json(
            r#"{"seed": 9, "steps": [{"command": "discover"}, {"command": "ping dc0", "checkpoint": false}]}"#,
        )
        .unwrap();
        assert_eq!(object.seed, Some(9));
        let bare = TestPlan::from_json(r#"[{"command": "discover"}]"#).unwrap();
        assert_eq!(bare.seed, None);
        assert_eq!(bare.steps.len(), 1);

        let steps = object.resolve(None).unwrap();
        assert!(steps[0].checkpoint);
        assert!(!steps[1].checkpoint);
        assert_eq!(
            steps[1].action,
            Action::Ping {
                endpoint: "dc0".into()
            }
        );
    }

    #[test]
    fn comment_only_step_is_a_pending_noop() {
        let plan = TestPlan::from_json(r#"[{"comment": "warm up"}]"#).unwrap();
        let steps = plan.resolve(None).unwrap();
        assert_eq!(steps[0].action, Action::Continue);
        assert!(!steps[0].checkpoint);
        assert_eq!(steps[0].comment.as_deref(), Some("warm up"));
    }

    #[test]
    fn random_generator_is_seeded_and_closed_by_a_checkpoint() {
        let plan = TestPlan::from_json(
            r#"{"seed": 3, "steps": [{"random": {"count": 12, "commands": [
                "connect dc0 0 dc1 0", "disconnect dc0 0 dc1 0", "connect dc1 0 dc0 0"]}}]}"#,
        )
        .unwrap();
        let a = plan.resolve(None).unwrap();
        let b = plan.resolve(None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 13);
        assert!(a[..12].iter().all(|s| !s.checkpoint));
        assert_eq!(a[12].action, Action::Continue);
        assert!(a[12].checkpoint);
        let candidates = [
            Action::Connect(Connection::new("dc0", 0, "dc1", 0)),
            Action::Disconnect(Connection::new("dc0", 0, "dc1", 0)),
            Action::Connect(Connection::new("dc1", 0, "dc0", 0)),
        ];
        assert!(a[..12].iter().all(|s| candidates.contains(&s.action)));
        assert_eq!(plan.effective_seed(Some(11)), 11);
        assert_eq!(TestPlan::default().effective_seed(None), DEFAULT_SEED);
    }

    #[test]
    fn bad_commands_fail_the_whole_plan() {
        let plan = TestPlan::from_json(r#"[{"command": "discover"}, {"command": "explode"}]"#).unwrap();
        assert!(matches!(plan.resolve(None), Err(PlanError::UnknownVerb(_))));
        let plan =
            TestPlan::from_json(r#"[{"random": {"count": 1, "commands": ["connect a b c d"]}}]"#).unwrap();
        assert!(matches!(plan.resolve(None), Err(PlanError::BadNumber { .. })));
        let plan = TestPlan::from_json(r#"[{"random": {"count": 1, "commands": []}}]"#).unwrap();
        assert!(matches!(plan.resolve(None), Err(PlanError::EmptyGenerator)));
        assert!(matches!(TestPlan::from_json("{"), Err(PlanError::Json(_))));
    }
}
