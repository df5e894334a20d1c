// src/formula/mod.rs

//! Formula descriptors
//!
//! A formula is the static, declarative recipe for one package: where its
//! source lives, which bottles exist, which patches apply where, what it
//! needs at build time, how to build it and how to smoke-test it.
//!
//! Formulae are loaded from TOML or JSON and validated once, up front.
//! Validation never touches the network or spawns a process, so a broken
//! descriptor is rejected before any work starts.

pub mod version;

use crate::error::{Error, Result};
use crate::integrity::Digest;
use crate::platform::{self, PlatformGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// The primary source tarball
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceArtifact {
    pub url: String,
    pub sha256: Option<String>,
}

impl SourceArtifact {
    pub fn digest(&self) -> Result<Digest> {
        Digest::require(self.sha256.as_deref(), "source")
    }
}

/// Where a bottle expects to be poured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum CellarPolicy {
    /// Relocatable into any cellar
    #[default]
    Any,
    /// Relocatable and contains no paths needing rewrites
    AnySkipRelocation,
    /// Only usable in exactly this cellar
    Path(String),
}

impl CellarPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            CellarPolicy::Any => "any",
            CellarPolicy::AnySkipRelocation => "any_skip_relocation",
            CellarPolicy::Path(path) => path,
        }
    }
}

impl From<String> for CellarPolicy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "any" | ":any" => CellarPolicy::Any,
            "any_skip_relocation" | ":any_skip_relocation" => CellarPolicy::AnySkipRelocation,
            _ => CellarPolicy::Path(s),
        }
    }
}

impl From<CellarPolicy> for String {
    fn from(policy: CellarPolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// A precompiled artifact for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BottleArtifact {
    pub tag: String,
    pub sha256: Option<String>,
    #[serde(default)]
    pub cellar: CellarPolicy,
    /// Bumped when a bottle is rebuilt without a version change
    #[serde(default)]
    pub rebuild: u32,
}

impl BottleArtifact {
    pub fn digest(&self) -> Result<Digest> {
        Digest::require(self.sha256.as_deref(), &format!("bottle '{}'", self.tag))
    }
}

/// A source patch, optionally restricted to some platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchRule {
    pub url: String,
    pub sha256: Option<String>,
    /// Platforms the patch applies to; absent means all
    pub only_on: Option<PlatformGuard>,
    /// Leading path components to strip (`patch -pN`)
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

impl PatchRule {
    pub fn digest(&self) -> Result<Digest> {
        Digest::require(self.sha256.as_deref(), &format!("patch {}", self.url))
    }
}

/// When a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPhase {
    /// Only while building from source
    #[default]
    Build,
}

/// A prerequisite formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub phase: DependencyPhase,
}

/// One external command of the install sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The post-install smoke test; same shape as a build step
pub type TestStep = BuildStep;

/// A complete formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaDescriptor {
    pub name: String,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    /// Explicit version; detected from the source URL when absent
    pub version: Option<String>,
    /// Base URL bottles are downloaded from
    pub bottle_root_url: Option<String>,
    pub source: SourceArtifact,
    #[serde(default)]
    pub bottles: Vec<BottleArtifact>,
    #[serde(default)]
    pub patches: Vec<PatchRule>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub install: Vec<BuildStep>,
    pub test: Option<TestStep>,
}

impl FormulaDescriptor {
    /// Load a formula from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading formula from {}", path.display());
        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let formula = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
        .map_err(|e| Error::Descriptor(format!("{}: {}", path.display(), describe(e))))?;

        Ok(formula)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Descriptor(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Descriptor(e.to_string()))
    }

    /// The formula version, explicit or detected from the source URL
    pub fn version(&self) -> Result<String> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        version::detect(&self.source.url).ok_or_else(|| {
            Error::Descriptor(format!(
                "cannot detect a version from '{}'; set `version` explicitly",
                self.source.url
            ))
        })
    }

    /// Names of everything needed only to build from source
    pub fn build_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|dep| dep.phase == DependencyPhase::Build)
            .map(|dep| dep.name.as_str())
            .collect()
    }

    /// Pre-flight checks: every digest present and well formed, every guard
    /// resolvable, every step runnable
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        let version = self.version()?;
        if version.contains(['/', '\\']) || version.starts_with('.') {
            return Err(Error::Descriptor(format!("invalid version '{}'", version)));
        }

        if self.source.url.trim().is_empty() {
            return Err(Error::Descriptor("source has no url".to_string()));
        }
        self.source.digest()?;

        let mut seen_tags = HashSet::new();
        for bottle in &self.bottles {
            platform::validate_tag(&bottle.tag)?;
            bottle.digest()?;
            if !seen_tags.insert(bottle.tag.as_str()) {
                warn!(
                    "Formula {} declares bottle tag '{}' more than once; the first one wins",
                    self.name, bottle.tag
                );
            }
        }

        for patch in &self.patches {
            if patch.url.trim().is_empty() {
                return Err(Error::Descriptor("patch has no url".to_string()));
            }
            patch.digest()?;
            if let Some(guard) = &patch.only_on {
                guard.validate()?;
            }
        }

        let mut seen_deps = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(Error::Descriptor("dependency with empty name".to_string()));
            }
            if !seen_deps.insert(dep.name.as_str()) {
                return Err(Error::Descriptor(format!(
                    "dependency '{}' declared twice",
                    dep.name
                )));
            }
        }

        if self.install.is_empty() {
            return Err(Error::Descriptor(format!(
                "formula {} declares no install steps",
                self.name
            )));
        }
        for (index, step) in self.install.iter().enumerate() {
            if step.command.trim().is_empty() {
                return Err(Error::Descriptor(format!(
                    "install step {} has an empty command",
                    index
                )));
            }
        }

        if let Some(test) = &self.test {
            if test.command.trim().is_empty() {
                return Err(Error::Descriptor("test has an empty command".to_string()));
            }
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Descriptor("formula has no name".to_string()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'));
    if !valid || name.starts_with('.') {
        return Err(Error::Descriptor(format!("invalid formula name '{}'", name)));
    }
    Ok(())
}

fn describe(err: Error) -> String {
    match err {
        Error::Descriptor(msg) => msg,
        other => other.to_string(),
    }
}
