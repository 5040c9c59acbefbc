//! Cache location and pruning policy.
//!
//! Environment variables:
//! - `STASH_CACHE_DIR`: base directory for the blob store and packages
//! - `STASH_PRUNE_TTL_SECS`: idle time after which a package may be pruned
//! - `STASH_PRUNE_MAX`: removal attempts per sweep, `0` for no limit
//!
//! Default base directory: the platform cache directory plus `stash`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_cas::CasConfig;

use crate::error::{PackageError, PackageResult};

const DEFAULT_PRUNE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Where the cache lives and how aggressively it is pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_prune_ttl_secs")]
    pub prune_ttl_secs: u64,

    #[serde(default)]
    pub prune_max: usize,
}

fn default_base_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("stash"))
        .unwrap_or_else(|| PathBuf::from(".stash"))
}

fn default_prune_ttl_secs() -> u64 {
    DEFAULT_PRUNE_TTL_SECS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            prune_ttl_secs: DEFAULT_PRUNE_TTL_SECS,
            prune_max: 0,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    cache: Option<StorageConfig>,
}

impl StorageConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load from the environment, falling back to defaults.
    pub fn from_env() -> PackageResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load the `[cache]` table of a TOML file. A file without one falls back
    /// to [`from_env`](Self::from_env).
    ///
    /// ```toml
    /// [cache]
    /// base_dir = "/var/cache/stash"
    /// prune_ttl_secs = 86400
    /// prune_max = 100
    /// ```
    pub fn from_file(path: &Path) -> PackageResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PackageError::Config(format!("reading {}: {e}", path.display())))?;
        let file: ConfigFile = toml::from_str(&text)
            .map_err(|e| PackageError::Config(format!("parsing {}: {e}", path.display())))?;
        match file.cache {
            Some(config) => Ok(config),
            None => Self::from_env(),
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PackageResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup("STASH_CACHE_DIR") {
            config.base_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = lookup("STASH_PRUNE_TTL_SECS") {
            config.prune_ttl_secs = parse_number("STASH_PRUNE_TTL_SECS", &ttl)?;
        }
        if let Some(max) = lookup("STASH_PRUNE_MAX") {
            config.prune_max = parse_number("STASH_PRUNE_MAX", &max)?;
        }
        Ok(config)
    }

    pub fn prune_ttl(&self) -> Duration {
        Duration::from_secs(self.prune_ttl_secs)
    }

    pub fn cas_dir(&self) -> PathBuf {
        self.base_dir.join("cas")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.base_dir.join("pkgs")
    }

    pub fn cas_config(&self) -> CasConfig {
        CasConfig::new(self.cas_dir())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> PackageResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PackageError::Config(format!("{key}: expected a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn layout_under_base_dir() {
        let config = StorageConfig::with_base_dir("/srv/stash");
        assert_eq!(config.cas_dir(), PathBuf::from("/srv/stash/cas"));
        assert_eq!(config.packages_dir(), PathBuf::from("/srv/stash/pkgs"));
        assert_eq!(config.cas_config().root, config.cas_dir());
        assert_eq!(config.prune_ttl(), Duration::from_secs(DEFAULT_PRUNE_TTL_SECS));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = StorageConfig::from_lookup(lookup(&[
            ("STASH_CACHE_DIR", "/tmp/c"),
            ("STASH_PRUNE_TTL_SECS", "60"),
            ("STASH_PRUNE_MAX", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/tmp/c"));
        assert_eq!(config.prune_ttl_secs, 60);
        assert_eq!(config.prune_max, 5);

        let defaults = StorageConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults, StorageConfig::default());
    }

    #[test]
    fn bad_env_number_is_a_config_error() {
        let err = StorageConfig::from_lookup(lookup(&[("STASH_PRUNE_MAX", "lots")])).unwrap_err();
        assert!(matches!(err, PackageError::Config(msg) if msg.contains("STASH_PRUNE_MAX")));
    }

    #[test]
    fn file_cache_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stash.toml");
        std::fs::write(
            &path,
            "[cache]\nbase_dir = \"/data/stash\"\nprune_max = 3\n",
        )
        .unwrap();
        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/data/stash"));
        assert_eq!(config.prune_max, 3);
        assert_eq!(config.prune_ttl_secs, DEFAULT_PRUNE_TTL_SECS);
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let err = StorageConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, PackageError::Config(_)));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[cache\n").unwrap();
        assert!(matches!(
            StorageConfig::from_file(&path),
            Err(PackageError::Config(_))
        ));
    }
}
