// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rig and test-plan loading for the AVB oracle.
//! Storage stays behind [`ConfigStore`] so tools and tests choose where
//! the JSON lives.

pub mod config;
pub mod fs;
pub mod rig;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use fs::FsConfigStore;
pub use rig::{ControllerConfig, RigConfig};
