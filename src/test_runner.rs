// src/test_runner.rs

//! Post-install smoke test

use crate::error::Result;
use crate::formula::TestStep;
use crate::pipeline::KegLayout;
use crate::process::{Cancellation, CommandRunner, CommandSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Result of the smoke test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    /// The formula declares no test
    NotDeclared,
    Passed,
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
}

impl TestOutcome {
    /// True unless a declared test failed
    pub fn is_ok(&self) -> bool {
        !matches!(self, TestOutcome::Failed { .. })
    }
}

/// Runs the single validation command against an installed keg
pub struct TestRunner<'a> {
    runner: &'a dyn CommandRunner,
    layout: &'a KegLayout,
    env: &'a BTreeMap<String, String>,
    /// Parent of the per-test scratch directory
    scratch_root: &'a Path,
}

impl<'a> TestRunner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        layout: &'a KegLayout,
        env: &'a BTreeMap<String, String>,
        scratch_root: &'a Path,
    ) -> Self {
        Self {
            runner,
            layout,
            env,
            scratch_root,
        }
    }

    /// Command line of the test; relative programs resolve against the keg
    pub fn command(&self, test: &TestStep, keg: &Path, cwd: &Path) -> CommandSpec {
        let program = self.layout.expand(&test.command);
        let program = if program.contains('/') && Path::new(&program).is_relative() {
            keg.join(&program).to_string_lossy().into_owned()
        } else {
            program
        };
        CommandSpec::new(program, cwd)
            .args(test.args.iter().map(|a| self.layout.expand(a)))
            .env(self.env.clone())
    }

    /// Run the test, if any, in a fresh scratch directory
    pub fn run(
        &self,
        test: Option<&TestStep>,
        keg: &Path,
        cancel: &Cancellation,
    ) -> Result<TestOutcome> {
        let Some(test) = test else {
            info!("No test declared for {}", self.layout.name);
            return Ok(TestOutcome::NotDeclared);
        };

        fs::create_dir_all(self.scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-test-", self.layout.name))
            .tempdir_in(self.scratch_root)?;
        let spec = self.command(test, keg, scratch.path());
        info!("==> Testing {}: {}", self.layout.name, spec.display());

        let output = self.runner.run(&spec, cancel)?;
        if output.success() {
            Ok(TestOutcome::Passed)
        } else {
            warn!(
                "Test of {} failed with exit {:?}",
                self.layout.name, output.exit_code
            );
            Ok(TestOutcome::Failed {
                exit_code: output.exit_code,
                stderr_tail: output.stderr_tail(),
            })
        }
    }
}
