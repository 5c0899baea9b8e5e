// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Expectation trees: the prediction handed to the external matcher.
//!
//! A tree is pure data. Leaves name a process and a regular expression that
//! must appear on its output within a timeout. Combinators compose leaves:
//!
//! - [`Expectation::AllOf`]: every child, in any order.
//! - [`Expectation::OneOf`]: at least one child.
//! - [`Expectation::NoneOf`]: no child may match before its timeout.
//! - [`Expectation::Sequence`]: every child, in order.
//!
//! Side effects that must happen when a leaf matches are carried as [`Hook`]
//! values and applied by the matcher to a [`WatchList`] it owns.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A line-match prediction on one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expected {
    /// Process whose output is matched.
    pub source: String,
    /// Regular expression searched for in each output line.
    pub pattern: String,
    /// How long the matcher waits for the line.
    pub timeout: Duration,
    /// Side effect applied when the line matches.
    pub hook: Option<Hook>,
}

impl Expected {
    /// Creates a leaf with a timeout in whole seconds.
    pub fn new(source: impl Into<String>, pattern: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            source: source.into(),
            pattern: pattern.into(),
            timeout: Duration::from_secs(timeout_secs),
            hook: None,
        }
    }

    /// Attaches a hook fired on match.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }
}

/// An expectation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expectation {
    /// A single line match.
    Expected(Expected),
    /// All children, any order.
    AllOf(Vec<Expectation>),
    /// At least one child.
    OneOf(Vec<Expectation>),
    /// No child may match.
    NoneOf(Vec<Expectation>),
    /// All children, in order.
    Sequence(Vec<Expectation>),
}

/// Whether a leaf must be seen or must not be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// The line must appear.
    Positive,
    /// The line must not appear.
    Negative,
}

impl Polarity {
    fn flip(self) -> Self {
        match self {
            Self::Positive => Self::Negative,
            Self::Negative => Self::Positive,
        }
    }
}

impl Expectation {
    /// Leaf shorthand.
    pub fn expected(source: impl Into<String>, pattern: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Expected(Expected::new(source, pattern, timeout_secs))
    }

    /// Children of a combinator, empty for a leaf.
    pub fn children(&self) -> &[Expectation] {
        match self {
            Self::Expected(_) => &[],
            Self::AllOf(c) | Self::OneOf(c) | Self::NoneOf(c) | Self::Sequence(c) => c,
        }
    }

    /// True for a combinator with no children.
    pub fn is_empty(&self) -> bool {
        !matches!(self, Self::Expected(_)) && self.children().is_empty()
    }

    /// Every leaf with the polarity it is checked under. Leaves nested in an
    /// odd number of `NoneOf`s are negative.
    pub fn leaves(&self) -> Vec<(&Expected, Polarity)> {
        let mut out = Vec::new();
        self.collect_leaves(Polarity::Positive, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, polarity: Polarity, out: &mut Vec<(&'a Expected, Polarity)>) {
        match self {
            Self::Expected(leaf) => out.push((leaf, polarity)),
            Self::NoneOf(children) => {
                for child in children {
                    child.collect_leaves(polarity.flip(), out);
                }
            }
            Self::AllOf(children) | Self::OneOf(children) | Self::Sequence(children) => {
                for child in children {
                    child.collect_leaves(polarity, out);
                }
            }
        }
    }

    /// Leaves that must appear.
    pub fn positives(&self) -> Vec<&Expected> {
        self.leaves()
            .into_iter()
            .filter(|(_, p)| *p == Polarity::Positive)
            .map(|(leaf, _)| leaf)
            .collect()
    }

    /// Leaves that must not appear.
    pub fn negatives(&self) -> Vec<&Expected> {
        self.leaves()
            .into_iter()
            .filter(|(_, p)| *p == Polarity::Negative)
            .map(|(leaf, _)| leaf)
            .collect()
    }

    /// Whether some positive leaf on `source` has exactly `pattern`.
    pub fn expects(&self, source: &str, pattern: &str) -> bool {
        self.positives()
            .iter()
            .any(|leaf| leaf.source == source && leaf.pattern == pattern)
    }

    /// Whether some negative leaf on `source` has exactly `pattern`.
    pub fn forbids(&self, source: &str, pattern: &str) -> bool {
        self.negatives()
            .iter()
            .any(|leaf| leaf.source == source && leaf.pattern == pattern)
    }

    fn outline(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let (label, children) = match self {
            Self::Expected(leaf) => {
                write!(f, "{pad}{}: /{}/ ({}s)", leaf.source, leaf.pattern, leaf.timeout.as_secs())?;
                if let Some(hook) = &leaf.hook {
                    write!(f, " {hook}")?;
                }
                return writeln!(f);
            }
            Self::AllOf(c) => ("AllOf", c),
            Self::OneOf(c) => ("OneOf", c),
            Self::NoneOf(c) => ("NoneOf", c),
            Self::Sequence(c) => ("Sequence", c),
        };
        writeln!(f, "{pad}{label}")?;
        for child in children {
            child.outline(depth + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.outline(0, f)
    }
}

/// A background line watch: while armed, the pattern must not appear on
/// the source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watch {
    /// Process watched.
    pub source: String,
    /// Pattern that constitutes an error.
    pub pattern: String,
}

impl Watch {
    /// Creates a watch.
    pub fn new(source: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pattern: pattern.into(),
        }
    }
}

/// Side effect applied when a leaf matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hook {
    /// Start treating the watch's pattern as an error.
    Arm(Watch),
    /// Stop treating it as an error.
    Disarm(Watch),
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arm(w) => write!(f, "[arm {}: /{}/]", w.source, w.pattern),
            Self::Disarm(w) => write!(f, "[disarm {}: /{}/]", w.source, w.pattern),
        }
    }
}

/// Set of armed watches, owned by the matching side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    armed: BTreeSet<Watch>,
}

impl WatchList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a hook. Arming an armed watch or disarming an unarmed one is a
    /// no-op.
    pub fn apply(&mut self, hook: &Hook) {
        match hook {
            Hook::Arm(watch) => {
                self.armed.insert(watch.clone());
            }
            Hook::Disarm(watch) => {
                self.armed.remove(watch);
            }
        }
    }

    /// Fires the hooks of every positive leaf of a confirmed tree, in leaf
    /// order. Negative leaves never matched, so their hooks stay idle.
    pub fn confirm(&mut self, expectation: &Expectation) {
        for (leaf, polarity) in expectation.leaves() {
            if polarity == Polarity::Positive {
                if let Some(hook) = &leaf.hook {
                    self.apply(hook);
                }
            }
        }
    }

    /// Whether `watch` is armed.
    pub fn is_armed(&self, watch: &Watch) -> bool {
        self.armed.contains(watch)
    }

    /// Armed watches in order.
    pub fn iter(&self) -> impl Iterator<Item = &Watch> {
        self.armed.iter()
    }

    /// Armed watches as a `NoneOf` the matcher can run alongside a step.
    /// `None` when nothing is armed.
    pub fn as_negative(&self, timeout_secs: u64) -> Option<Expectation> {
        if self.armed.is_empty() {
            return None;
        }
        Some(Expectation::NoneOf(
            self.armed
                .iter()
                .map(|w| Expectation::expected(&w.source, &w.pattern, timeout_secs))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_of_flips_polarity_once_per_level() {
        let tree = Expectation::AllOf(vec![
            Expectation::expected("dc0", "on", 10),
            Expectation::NoneOf(vec![
                Expectation::expected("dc1", "lost", 2),
                Expectation::NoneOf(vec![Expectation::expected("dc2", "odd", 1)]),
            ]),
        ]);
        assert!(tree.expects("dc0", "on"));
        assert!(tree.forbids("dc1", "lost"));
        assert!(tree.expects("dc2", "odd"));
        assert_eq!(tree.leaves().len(), 3);
    }

    #[test]
    fn watch_list_follows_hooks() {
        let glitch = Watch::new("analyzer0", "Channel 0: Glitch detected");
        let mut list = WatchList::new();
        assert!(list.as_negative(1).is_none());
        list.apply(&Hook::Arm(glitch.clone()));
        list.apply(&Hook::Arm(glitch.clone()));
        assert!(list.is_armed(&glitch));
        assert_eq!(list.iter().count(), 1);
        let negative = list.as_negative(1);
        assert!(negative.is_some_and(|n| n.forbids("analyzer0", "Channel 0: Glitch detected")));
        list.apply(&Hook::Disarm(glitch.clone()));
        assert!(!list.is_armed(&glitch));
    }

    #[test]
    fn confirming_a_tree_fires_only_positive_hooks() {
        let glitch = Watch::new("analyzer", "Channel 4: Glitch detected");
        let arm = Expectation::Expected(
            Expected::new("analyzer", "Channel 4: Signal detected", 10)
                .with_hook(Hook::Arm(glitch.clone())),
        );
        let disarm = Expectation::Expected(
            Expected::new("analyzer", "Channel 4: Lost signal", 10)
                .with_hook(Hook::Disarm(glitch.clone())),
        );

        let mut list = WatchList::new();
        let negative = Expectation::NoneOf(vec![disarm.clone()]);
        list.confirm(&Expectation::AllOf(vec![arm, negative]));
        assert!(list.is_armed(&glitch));
        list.confirm(&Expectation::Sequence(vec![disarm]));
        assert!(!list.is_armed(&glitch));
    }

    #[test]
    fn outline_indents_children() {
        let tree = Expectation::Sequence(vec![
            Expectation::expected("ctl", "Success", 10),
            Expectation::AllOf(vec![]),
        ]);
        assert_eq!(tree.to_string(), "Sequence\n  ctl: /Success/ (10s)\n  AllOf\n");
        assert!(Expectation::AllOf(vec![]).is_empty());
        assert!(!Expectation::expected("a", "b", 1).is_empty());
    }
}
