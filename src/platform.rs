// src/platform.rs

//! Platform tags and guard matching
//!
//! A platform is an opaque tag such as `sonoma` or `x86_64_linux`. Rules
//! (bottles, patches) are matched against it by exact equality only; there
//! is no version-range or family inheritance.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque platform identifier (OS family + major version)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

impl Platform {
    /// Create a platform from a tag, validating its shape
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Self(tag))
    }

    /// Tag for the host this process runs on, e.g. `x86_64_linux`
    ///
    /// macOS reports `arm64` rather than `aarch64` to match bottle naming.
    pub fn current() -> Self {
        let arch = match std::env::consts::ARCH {
            "aarch64" if cfg!(target_os = "macos") => "arm64",
            other => other,
        };
        Self(format!("{}_{}", arch, std::env::consts::OS))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Restricts a rule to a set of platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformGuard(Vec<String>);

impl PlatformGuard {
    pub fn new(tags: Vec<String>) -> Self {
        Self(tags)
    }

    /// Reject guards that can never be evaluated meaningfully
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::Descriptor(
                "platform guard lists no platforms".to_string(),
            ));
        }
        for tag in &self.0 {
            validate_tag(tag)?;
        }
        Ok(())
    }

    fn admits(&self, platform: &Platform) -> bool {
        self.0.iter().any(|tag| tag == platform.as_str())
    }
}

/// Does a rule with this guard apply on `current`?
///
/// An absent guard applies everywhere.
pub fn matches(guard: Option<&PlatformGuard>, current: &Platform) -> bool {
    match guard {
        None => true,
        Some(guard) => guard.admits(current),
    }
}

/// Tags are lowercase ASCII letters, digits and underscores
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::Descriptor("empty platform tag".to_string()));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(Error::Descriptor(format!(
            "invalid platform tag '{}': use lowercase letters, digits and '_'",
            tag
        )));
    }
    Ok(())
}
