// src/fetch.rs

//! Fetched-content boundary
//!
//! Brewery never talks to the network. Downloads are done by an external
//! fetcher that leaves files in a download cache; this module maps an
//! artifact URL to the local file holding its content.

use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

/// Supplies the content behind an artifact URL as a local file
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<PathBuf>;
}

/// Looks artifacts up in a download cache directory
///
/// `file://` URLs resolve to their path directly. Any other URL resolves to
/// `{cache}/{file name}`, the layout an external downloader writes.
#[derive(Debug, Clone)]
pub struct CacheFetcher {
    cache: PathBuf,
}

impl CacheFetcher {
    pub fn new(cache: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
        }
    }

    /// Where the cache keeps the content of `url`
    pub fn cache_path(&self, url: &str) -> Result<PathBuf> {
        let name = file_name(url)
            .ok_or_else(|| Error::Fetch(format!("cannot derive a file name from '{}'", url)))?;
        Ok(self.cache.join(name))
    }
}

impl Fetcher for CacheFetcher {
    fn fetch(&self, url: &str) -> Result<PathBuf> {
        let path = match url.strip_prefix("file://") {
            Some(local) => PathBuf::from(local),
            None => self.cache_path(url)?,
        };

        if !path.is_file() {
            return Err(Error::Fetch(format!(
                "{} has not been downloaded (expected {})",
                url,
                path.display()
            )));
        }

        debug!("Fetched {} from {}", url, path.display());
        Ok(path)
    }
}

/// Last path segment of a URL, without query or fragment
pub fn file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}
