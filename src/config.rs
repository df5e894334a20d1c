// src/config.rs

//! Injected build configuration
//!
//! Everything a build needs to know about its surroundings (cellar, config
//! directory, download cache, environment, feature flags) travels in a
//! [`BuildConfig`]. Nothing is read from process-wide state during a build,
//! so independent formulas can be built concurrently from one process.

use crate::platform::Platform;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Default cellar location
pub const DEFAULT_CELLAR: &str = "/opt/brewery/Cellar";

/// Default directory for configuration files installed by formulae
pub const DEFAULT_ETC: &str = "/opt/brewery/etc";

/// Default directory for variable data
pub const DEFAULT_VAR: &str = "/opt/brewery/var";

/// Default download cache
pub const DEFAULT_CACHE: &str = "/var/cache/brewery";

/// Program used to apply patches
pub const DEFAULT_PATCH_PROGRAM: &str = "patch";

/// Configuration for building one or more formulae
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Root under which kegs live as `{cellar}/{name}/{version}`
    pub cellar: PathBuf,
    /// Shared configuration directory (`{etc}` placeholder)
    pub etc: PathBuf,
    /// Shared variable data directory (`{var}` placeholder)
    pub var: PathBuf,
    /// Download cache the fetcher reads from
    pub cache: PathBuf,
    /// Parent of per-build scratch directories
    pub work_root: PathBuf,
    /// Per-step build logs are written below this directory when set
    pub logs: Option<PathBuf>,
    /// Platform rules are evaluated against
    pub platform: Platform,
    /// Base environment handed to every build and test command
    pub env: BTreeMap<String, String>,
    /// Variables set on top of the base and injected environment
    pub env_overrides: BTreeMap<String, String>,
    /// Enabled feature flags, exported as `FEATURE_<NAME>=1`
    pub features: BTreeSet<String>,
    /// Parallel jobs for `make`
    pub jobs: usize,
    /// Ignore bottles and always build from source
    pub build_from_source: bool,
    /// Keep the scratch directory after the build finishes
    pub keep_tmp: bool,
    /// Replace an existing keg instead of failing
    pub overwrite: bool,
    /// Program used to apply patches
    pub patch_program: String,
    /// Fallback base URL for bottles when a formula sets none
    pub bottle_root_url: Option<String>,
}

impl BuildConfig {
    /// Configuration rooted at `cellar` with defaults for everything else
    pub fn new(cellar: impl Into<PathBuf>) -> Self {
        Self {
            cellar: cellar.into(),
            etc: PathBuf::from(DEFAULT_ETC),
            var: PathBuf::from(DEFAULT_VAR),
            cache: PathBuf::from(DEFAULT_CACHE),
            work_root: std::env::temp_dir(),
            logs: None,
            platform: Platform::current(),
            env: BTreeMap::new(),
            env_overrides: BTreeMap::new(),
            features: BTreeSet::new(),
            jobs: default_jobs(),
            build_from_source: false,
            keep_tmp: false,
            overwrite: false,
            patch_program: DEFAULT_PATCH_PROGRAM.to_string(),
            bottle_root_url: None,
        }
    }

    /// Use the calling process's environment as the base environment
    pub fn inherit_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }

    /// Keg directory for one formula version
    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.cellar.join(name).join(version)
    }

    /// Directory holding the build logs of one formula
    pub fn log_dir(&self, name: &str) -> Option<PathBuf> {
        self.logs.as_ref().map(|logs| logs.join(name))
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CELLAR)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keg_path_layout() {
        let config = BuildConfig::new("/tmp/cellar");
        assert_eq!(
            config.keg_path("rsync", "3.1.0"),
            PathBuf::from("/tmp/cellar/rsync/3.1.0")
        );
    }

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.cellar, PathBuf::from(DEFAULT_CELLAR));
        assert!(config.jobs >= 1);
        assert!(config.env.is_empty());
        assert!(config.log_dir("rsync").is_none());
    }

    #[test]
    fn test_log_dir_per_formula() {
        let mut config = BuildConfig::default();
        config.logs = Some(PathBuf::from("/tmp/logs"));
        assert_eq!(config.log_dir("rsync"), Some(PathBuf::from("/tmp/logs/rsync")));
    }

    #[test]
    fn test_inherit_env_copies_process_environment() {
        let config = BuildConfig::default().inherit_env();
        assert_eq!(config.env.len(), std::env::vars().count());
    }
}
