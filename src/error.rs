// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Brewery
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed formula: missing or bad digest, unresolvable platform guard, etc.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Content digest did not match the declared one
    #[error("Checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    Integrity {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// A patch was rejected by the source tree
    #[error("Patch {index} ({url}) failed to apply (exit {}): {stderr_tail}", display_code(.exit_code))]
    PatchApply {
        index: usize,
        url: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// A build or test command exited non-zero
    #[error("Step {index} ({command}) failed (exit {}): {stderr_tail}", display_code(.exit_code))]
    StepFailure {
        index: usize,
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// A build step's program could not be started
    #[error("Step {index} ({command}) could not be started: {source}")]
    StepSpawn {
        index: usize,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Build dependencies the external resolver cannot provide
    #[error("Unresolved build dependencies: {}", .0.join(", "))]
    UnresolvedDependencies(Vec<String>),

    /// Build steps succeeded but left nothing in the prefix
    #[error("Empty installation: nothing was installed into {}", .0.display())]
    EmptyInstallation(PathBuf),

    /// The keg already exists in the cellar
    #[error("Already installed at {}", .0.display())]
    AlreadyInstalled(PathBuf),

    /// Aborted by the caller
    #[error("Build cancelled")]
    Cancelled,

    /// The fetcher could not provide an artifact
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Archive could not be unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Result type alias using Brewery's Error type
pub type Result<T> = std::result::Result<T, Error>;
