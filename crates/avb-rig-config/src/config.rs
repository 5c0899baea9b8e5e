// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port for rig descriptions and test plans.

use std::sync::Arc;

use avb_oracle_core::{PlanError, TestPlan, TestStep, Topology, TopologyError};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::rig::RigConfig;

/// Read side of rig and plan storage: raw JSON documents keyed by name.
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Rig description decoded but does not describe a usable rig.
    #[error("invalid rig: {0}")]
    Topology(#[from] TopologyError),
    /// Test plan decoded but a command in it is malformed.
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Decodes rig descriptions and test plans fetched from a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Creates a service reading from `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decodes the document under `key`. An absent or empty document is
    /// `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Err(ConfigError::NotFound) => return Ok(None),
            read => read?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.load(key)?.ok_or(ConfigError::NotFound)
    }

    /// Loads the rig stored under `key` and builds its validated topology
    /// as seen by `user`.
    pub fn load_rig(&self, key: &str, user: &str) -> Result<Arc<Topology>, ConfigError> {
        let rig: RigConfig = self.require(key)?;
        let topology = rig.into_topology(user)?;
        debug!(key, user, "rig loaded");
        Ok(Arc::new(topology))
    }

    /// Loads the test plan stored under `key`. Commands are not parsed yet;
    /// see [`TestPlan::resolve`].
    pub fn load_plan(&self, key: &str) -> Result<TestPlan, ConfigError> {
        let plan: TestPlan = self.require(key)?;
        debug!(key, entries = plan.steps.len(), "plan loaded");
        Ok(plan)
    }

    /// Loads the test plan under `key` and expands it into executable
    /// steps. Any malformed command fails the whole plan.
    pub fn resolve_plan(&self, key: &str, seed: Option<u64>) -> Result<Vec<TestStep>, ConfigError> {
        Ok(self.load_plan(key)?.resolve(seed)?)
    }
}
