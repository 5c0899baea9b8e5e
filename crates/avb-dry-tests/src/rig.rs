// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recording [`Rig`] fake.

use std::time::Duration;

use avb_oracle_core::{Expectation, Rig, Unconfirmed, WatchList};

/// One call the oracle made on the rig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigEvent {
    /// `send_line`
    Send {
        /// Target process.
        process: String,
        /// Line sent.
        line: String,
    },
    /// `sleep`
    Sleep(Duration),
    /// `expect`, recorded whether or not it was confirmed.
    Expect(Expectation),
    /// `clear_history`
    ClearHistory(String),
}

/// Rig fake that records every call and confirms every expectation unless
/// told to reject.
///
/// Confirmed expectations fire the hooks of their positive leaves on the
/// rig's [`WatchList`], the way a live matcher does when lines match.
#[derive(Debug, Default)]
pub struct RecordingRig {
    events: Vec<RigEvent>,
    watches: WatchList,
    reject: Option<String>,
}

impl RecordingRig {
    /// A rig that confirms everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every following `expect` with `reason`.
    pub fn reject_with(&mut self, reason: &str) {
        self.reject = Some(reason.to_owned());
    }

    /// Goes back to confirming.
    pub fn accept(&mut self) {
        self.reject = None;
    }

    /// Every call so far, in order.
    pub fn events(&self) -> &[RigEvent] {
        &self.events
    }

    /// Forgets recorded calls; armed watches stay armed.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Lines sent to `process`, in order.
    pub fn lines_to(&self, process: &str) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RigEvent::Send { process: p, line } if p == process => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every tree handed to `expect`, in order.
    pub fn expectations(&self) -> Vec<&Expectation> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RigEvent::Expect(tree) => Some(tree),
                _ => None,
            })
            .collect()
    }

    /// Glitch watches currently armed.
    pub fn watches(&self) -> &WatchList {
        &self.watches
    }
}

impl Rig for RecordingRig {
    fn send_line(&mut self, process: &str, line: &str) {
        self.events.push(RigEvent::Send {
            process: process.to_owned(),
            line: line.to_owned(),
        });
    }

    fn sleep(&mut self, duration: Duration) {
        self.events.push(RigEvent::Sleep(duration));
    }

    fn expect(&mut self, expectation: &Expectation) -> Result<(), Unconfirmed> {
        self.events.push(RigEvent::Expect(expectation.clone()));
        if let Some(reason) = &self.reject {
            return Err(Unconfirmed::new(reason.clone()));
        }
        self.watches.confirm(expectation);
        Ok(())
    }

    fn clear_history(&mut self, process: &str) {
        self.events.push(RigEvent::ClearHistory(process.to_owned()));
    }
}
