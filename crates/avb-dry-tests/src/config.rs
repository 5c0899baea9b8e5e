// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for loading rigs and plans without files.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use avb_rig_config::{ConfigError, ConfigStore};

/// In-memory implementation of [`ConfigStore`].
///
/// Clones share one backing map, so a test can hand a clone to a
/// `ConfigService` and inspect the original afterwards.
///
/// # Example
///
/// ```
/// use avb_dry_tests::InMemoryConfigStore;
/// use avb_rig_config::ConfigService;
///
/// let store = InMemoryConfigStore::new().with_text("plan", r#"[{"command": "discover"}]"#);
/// let service = ConfigService::new(store.clone());
/// let steps = service.resolve_plan("plan", None).unwrap();
/// assert_eq!(steps.len(), 1);
/// assert_eq!(store.load_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Blobs>>,
}

#[derive(Default)]
struct Blobs {
    data: BTreeMap<String, Vec<u8>>,
    loads: usize,
    fail_on_load: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, Blobs> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `text` under `key`, replacing any earlier document.
    pub fn with_text(self, key: &str, text: &str) -> Self {
        self.blobs().data.insert(key.to_owned(), text.as_bytes().to_vec());
        self
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.blobs().fail_on_load = fail;
    }

    /// `load_raw` calls so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.blobs().loads
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut blobs = self.blobs();
        blobs.loads += 1;
        if blobs.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        blobs.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn clones_share_blobs_and_counters() {
        let store = InMemoryConfigStore::new();
        let other = store.clone().with_text("rig", "{}");
        assert_eq!(store.load_raw("rig").unwrap(), b"{}");
        assert_eq!(other.load_count(), 1);
    }

    #[test]
    fn failures_are_counted() {
        let store = InMemoryConfigStore::new().with_text("rig", "{}");
        store.set_fail_on_load(true);
        assert!(matches!(store.load_raw("rig"), Err(ConfigError::Other(_))));
        store.set_fail_on_load(false);
        assert!(store.load_raw("rig").is_ok());
        assert_eq!(store.load_count(), 2);
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = InMemoryConfigStore::new().with_text("plan", "[]");
        assert!(matches!(store.load_raw("rig"), Err(ConfigError::NotFound)));
    }
}
