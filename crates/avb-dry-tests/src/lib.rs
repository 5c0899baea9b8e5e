// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for the AVB oracle crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`rig`] - Recording rig that confirms (or rejects) predictions
//! - [`topology`] - Daisy-chain topology builders

pub mod config;
pub mod rig;
pub mod topology;

pub use config::InMemoryConfigStore;
pub use rig::{RecordingRig, RigEvent};
pub use topology::{
    daisy_chain, fixture_avb_id, linear_with_bystander, TopologyBuilder, AUDIO_ANALYZER,
    FIXTURE_CONTROLLER, FIXTURE_USER,
};
