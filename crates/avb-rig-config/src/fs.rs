// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` rooted at a directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, ConfigStore};

/// Reads configs stored as JSON files under one directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Creates a store rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Splits a file path into a store rooted at its directory and the key
    /// naming the file in it.
    pub fn for_file(path: &Path) -> Result<(Self, String), ConfigError> {
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ConfigError::Other(format!("not a file path: {}", path.display())))?
            .to_owned();
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok((Self::new(base), key))
    }

    /// Directory the store reads from.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &str) -> PathBuf {
        if Path::new(key).extension().is_some_and(|ext| ext == "json") {
            self.base.join(key)
        } else {
            self.base.join(format!("{key}.json"))
        }
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path_for(key);
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn key_gets_a_json_extension_once() {
        let store = FsConfigStore::new("/rigs");
        assert_eq!(store.path_for("four"), PathBuf::from("/rigs/four.json"));
        assert_eq!(store.path_for("four.json"), PathBuf::from("/rigs/four.json"));
    }

    #[test]
    fn file_paths_split_into_root_and_key() {
        let (store, key) = FsConfigStore::for_file(Path::new("testdata/rigs/four.json")).unwrap();
        assert_eq!(store.base(), Path::new("testdata/rigs"));
        assert_eq!(key, "four.json");

        let (store, key) = FsConfigStore::for_file(Path::new("plan.json")).unwrap();
        assert_eq!(store.base(), Path::new("."));
        assert_eq!(key, "plan.json");
    }
}
