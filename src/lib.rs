// src/lib.rs

//! Brewery formula build engine
//!
//! Builds one package from a declarative formula: pours a verified bottle
//! when one exists for the current platform, otherwise fetches and verifies
//! the source, applies platform-selected patches in order, runs the install
//! steps and finishes with a smoke test.
//!
//! # Architecture
//!
//! - Formulae: static TOML/JSON descriptors, validated before any I/O
//! - Integrity: every source, patch and bottle is SHA-256 verified
//! - Platform guards: exact tag matching through a single matcher
//! - Pipeline: explicit argv processes, fail-fast, no retries
//! - No ambient state: cellar, environment and features arrive in `BuildConfig`

pub mod archive;
pub mod bottle;
pub mod config;
pub mod deps;
pub mod engine;
mod error;
pub mod fetch;
pub mod formula;
pub mod integrity;
pub mod patch;
pub mod pipeline;
pub mod plan;
pub mod platform;
pub mod process;
pub mod receipt;
pub mod test_runner;

pub use config::BuildConfig;
pub use engine::{BuildOutcome, Engine, InstallMethod, Installed, Stage};
pub use error::{Error, Result};
pub use formula::FormulaDescriptor;
pub use platform::Platform;
