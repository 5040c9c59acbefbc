//! Blob store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a [`LocalCas`](crate::LocalCas).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasConfig {
    /// Directory holding the shard directories and the staging area.
    pub root: PathBuf,

    /// fsync each blob before it is renamed into place.
    /// Turning this off trades crash durability for write throughput.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

fn default_true() -> bool {
    true
}

impl CasConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_writes: true,
        }
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_writes_defaults_on() {
        let config: CasConfig = serde_json::from_str(r#"{"root":"/var/cache/cas"}"#).unwrap();
        assert!(config.sync_writes);
        assert_eq!(config, CasConfig::new("/var/cache/cas"));
        assert_eq!(config.staging_dir(), PathBuf::from("/var/cache/cas/tmp"));
    }
}
