// src/receipt.rs

//! Install receipts
//!
//! Every keg gets an `INSTALL_RECEIPT.json` describing how it was produced:
//! poured or built, on which platform, with which patches and features.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// File name of the receipt inside a keg
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Source artifact a keg was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub sha256: String,
}

/// How a keg came to be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub poured_from_bottle: bool,
    pub bottle_tag: Option<String>,
    pub platform: String,
    pub source: Option<SourceRecord>,
    /// URLs of the applied patches, in application order
    pub patches: Vec<String>,
    pub build_dependencies: Vec<String>,
    pub features: Vec<String>,
    /// RFC 3339 timestamp
    pub installed_at: String,
    pub built_by: String,
}

impl InstallReceipt {
    pub fn new(name: &str, version: &str, platform: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            poured_from_bottle: false,
            bottle_tag: None,
            platform: platform.to_string(),
            source: None,
            patches: Vec::new(),
            build_dependencies: Vec::new(),
            features: Vec::new(),
            installed_at: chrono::Utc::now().to_rfc3339(),
            built_by: format!("brewery {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Write the receipt into `keg`
    pub fn write(&self, keg: &Path) -> Result<()> {
        let path = keg.join(RECEIPT_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Read the receipt of an installed keg
    pub fn read(keg: &Path) -> Result<Self> {
        let content = fs::read_to_string(keg.join(RECEIPT_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}
