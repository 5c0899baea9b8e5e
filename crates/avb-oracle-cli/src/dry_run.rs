// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A [`Rig`] that never touches hardware.

use std::time::Duration;

use avb_oracle_core::{Expectation, Rig, Unconfirmed, WatchList};
use tracing::{debug, trace};

/// Confirms every expectation and counts what it was asked to do.
///
/// Keeps counters only, no event log; predictions come back in the step
/// reports. Sleeps are logged and skipped. Confirmed trees go through
/// [`WatchList::confirm`], so the watch list ends up where a live matcher
/// would leave it.
#[derive(Debug, Default)]
pub struct DryRunRig {
    sent: usize,
    expects: usize,
    slept: Duration,
    watches: WatchList,
}

impl DryRunRig {
    /// A fresh rig.
    pub fn new() -> Self {
        Self::default()
    }

    /// Command lines sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Trees confirmed so far, immediate awaits included.
    pub fn expects(&self) -> usize {
        self.expects
    }

    /// Total time a live run would have spent sleeping.
    pub fn slept(&self) -> Duration {
        self.slept
    }

    /// Watches left armed.
    pub fn watches(&self) -> &WatchList {
        &self.watches
    }
}

impl Rig for DryRunRig {
    fn send_line(&mut self, process: &str, line: &str) {
        debug!(process, line, "send");
        self.sent += 1;
    }

    fn sleep(&mut self, duration: Duration) {
        trace!(?duration, "sleep skipped");
        self.slept += duration;
    }

    fn expect(&mut self, expectation: &Expectation) -> Result<(), Unconfirmed> {
        self.expects += 1;
        self.watches.confirm(expectation);
        Ok(())
    }

    fn clear_history(&mut self, process: &str) {
        trace!(process, "clear history");
    }
}
