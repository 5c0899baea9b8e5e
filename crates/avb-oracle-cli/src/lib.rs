// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command line front end for the AVB oracle.
//!
//! Everything runs dry: plans are executed against [`dry_run::DryRunRig`],
//! which confirms every expectation, and the predictions are printed instead
//! of matched against live process output.

pub mod cli;
pub mod dry_run;
pub mod report;
