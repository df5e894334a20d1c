// src/engine.rs

//! Per-formula build engine
//!
//! Drives one formula through its state machine:
//!
//! ```text
//! Preflight -> ResolveBottle -+-> FetchBottle -> VerifyBottle -> InstallFromBottle -+-> Test -> Done
//!                             |                                                     |
//!                             +-> CheckDependencies -> FetchSource -> VerifySource  |
//!                                 -> Unpack -> SelectPatches -> FetchPatches        |
//!                                 -> VerifyPatches -> ApplyPatches -> RunBuildSteps +
//! ```
//!
//! Any failure ends the build in `Failed { stage, error }`. There is no
//! retry and no rollback; the caller owns cleanup of a half-built keg.
//! An engine holds no mutable state, so one engine (or several) can build
//! independent formulae on different threads at once.

use crate::archive;
use crate::bottle;
use crate::config::BuildConfig;
use crate::deps::{self, DependencyResolver};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::formula::{BottleArtifact, FormulaDescriptor, PatchRule, SourceArtifact};
use crate::integrity;
use crate::patch::{PatchApplier, VerifiedPatch};
use crate::pipeline::{self, InstallPipeline, KegLayout};
use crate::plan::{self, ResolvedBuildPlan};
use crate::process::{Cancellation, CommandRunner};
use crate::receipt::{InstallReceipt, SourceRecord};
use crate::test_runner::{TestOutcome, TestRunner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where in the state machine a build is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    ResolveBottle,
    FetchBottle,
    VerifyBottle,
    InstallFromBottle,
    CheckDependencies,
    FetchSource,
    VerifySource,
    Unpack,
    SelectPatches,
    FetchPatches,
    VerifyPatches,
    ApplyPatches,
    RunBuildSteps,
    Test,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::ResolveBottle => "resolve-bottle",
            Stage::FetchBottle => "fetch-bottle",
            Stage::VerifyBottle => "verify-bottle",
            Stage::InstallFromBottle => "install-from-bottle",
            Stage::CheckDependencies => "check-dependencies",
            Stage::FetchSource => "fetch-source",
            Stage::VerifySource => "verify-source",
            Stage::Unpack => "unpack",
            Stage::SelectPatches => "select-patches",
            Stage::FetchPatches => "fetch-patches",
            Stage::VerifyPatches => "verify-patches",
            Stage::ApplyPatches => "apply-patches",
            Stage::RunBuildSteps => "run-build-steps",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished keg was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallMethod {
    Bottle { tag: String },
    Source { patches: usize },
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMethod::Bottle { tag } => write!(f, "bottle ({})", tag),
            InstallMethod::Source { patches } => write!(f, "source ({} patches)", patches),
        }
    }
}

/// A successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub name: String,
    pub version: String,
    pub method: InstallMethod,
    pub keg: PathBuf,
    /// `Passed` or `NotDeclared`; a failing test fails the build
    pub test: TestOutcome,
}

/// Terminal result of one build
#[derive(Debug)]
pub enum BuildOutcome {
    Done(Installed),
    Failed { stage: Stage, error: Error },
}

impl BuildOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, BuildOutcome::Done(_))
    }
}

/// Builds formulae against one configuration and set of collaborators
pub struct Engine<'a> {
    config: &'a BuildConfig,
    fetcher: &'a dyn Fetcher,
    resolver: &'a dyn DependencyResolver,
    runner: &'a dyn CommandRunner,
    cancel: Cancellation,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a BuildConfig,
        fetcher: &'a dyn Fetcher,
        resolver: &'a dyn DependencyResolver,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            fetcher,
            resolver,
            runner,
            cancel: Cancellation::new(),
        }
    }

    /// Share an abort flag with the caller
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build one formula to a terminal outcome
    pub fn build(&self, formula: &FormulaDescriptor) -> BuildOutcome {
        let mut stage = Stage::Preflight;
        match self.run(formula, &mut stage) {
            Ok(installed) => {
                info!(
                    "{} {} installed from {} at {}",
                    installed.name,
                    installed.version,
                    installed.method,
                    installed.keg.display()
                );
                BuildOutcome::Done(installed)
            }
            Err(error) => {
                warn!("{} failed during {}: {}", formula.name, stage, error);
                BuildOutcome::Failed { stage, error }
            }
        }
    }

    /// Move to `next`, honouring a pending cancellation
    fn enter(&self, stage: &mut Stage, next: Stage) -> Result<()> {
        *stage = next;
        self.cancel.check()
    }

    fn run(&self, formula: &FormulaDescriptor, stage: &mut Stage) -> Result<Installed> {
        self.enter(stage, Stage::Preflight)?;
        formula.validate()?;
        let version = formula.version()?;
        let layout = KegLayout::new(self.config, &formula.name, &version);
        self.prepare_keg(&layout.prefix)?;

        self.enter(stage, Stage::ResolveBottle)?;
        let plan = plan::resolve(formula, self.config)?;

        let env = pipeline::build_env(self.config, &layout);
        let (method, _work) = match &plan {
            ResolvedBuildPlan::Bottle { bottle } => {
                self.pour(formula, &layout, bottle, stage)?;
                let method = InstallMethod::Bottle {
                    tag: bottle.tag.clone(),
                };
                (method, None)
            }
            ResolvedBuildPlan::Source { source, patches } => {
                let work = self.build_from_source(formula, &layout, &env, source, patches, stage)?;
                let method = InstallMethod::Source {
                    patches: patches.len(),
                };
                (method, Some(work))
            }
        };

        self.enter(stage, Stage::Test)?;
        let tester = TestRunner::new(self.runner, &layout, &env, &self.config.work_root);
        let test = tester.run(formula.test.as_ref(), &layout.prefix, &self.cancel)?;
        if let TestOutcome::Failed {
            exit_code,
            stderr_tail,
        } = test
        {
            let command = formula
                .test
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default();
            return Err(Error::StepFailure {
                index: 0,
                command,
                exit_code,
                stderr_tail,
            });
        }

        Ok(Installed {
            name: formula.name.clone(),
            version,
            method,
            keg: layout.prefix.clone(),
            test,
        })
    }

    /// Refuse to clobber an existing keg unless overwriting was requested
    fn prepare_keg(&self, keg: &Path) -> Result<()> {
        if keg.exists() && !self.config.overwrite {
            return Err(Error::AlreadyInstalled(keg.to_path_buf()));
        }
        Ok(())
    }

    /// Run `install` into an empty keg directory
    ///
    /// An existing keg (only present when overwriting) is moved aside first.
    /// It is deleted once `install` succeeds and put back if it fails.
    fn replace_keg<T>(&self, keg: &Path, install: impl FnOnce() -> Result<T>) -> Result<T> {
        let backup = KegBackup::stash(keg)?;
        match install() {
            Ok(value) => {
                if let Some(backup) = backup {
                    backup.discard()?;
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(backup) = backup {
                    match backup.restore() {
                        Ok(()) => info!("Restored previous keg {}", keg.display()),
                        Err(e) => warn!("Could not restore previous keg {}: {}", keg.display(), e),
                    }
                }
                Err(error)
            }
        }
    }

    fn pour(
        &self,
        formula: &FormulaDescriptor,
        layout: &KegLayout,
        bottle: &BottleArtifact,
        stage: &mut Stage,
    ) -> Result<()> {
        self.enter(stage, Stage::FetchBottle)?;
        let root_url = formula
            .bottle_root_url
            .as_deref()
            .or(self.config.bottle_root_url.as_deref());
        let url = match root_url {
            Some(root) => bottle::url(root, &layout.name, &layout.version, bottle)?,
            None => bottle::file_name(&layout.name, &layout.version, bottle),
        };
        let path = self.fetcher.fetch(&url)?;

        self.enter(stage, Stage::VerifyBottle)?;
        integrity::verify_file(&path, &bottle.digest()?, &format!("bottle {}", url))?;

        self.enter(stage, Stage::InstallFromBottle)?;
        self.replace_keg(&layout.prefix, || {
            info!("==> Pouring {}", url);
            archive::unpack(&path, &self.config.cellar)?;
            if !layout.prefix.is_dir() {
                return Err(Error::Archive(format!(
                    "bottle {} did not contain {}/{}",
                    url, layout.name, layout.version
                )));
            }

            let mut receipt = self.receipt(formula, layout);
            receipt.poured_from_bottle = true;
            receipt.bottle_tag = Some(bottle.tag.clone());
            receipt.write(&layout.prefix)
        })
    }

    fn build_from_source(
        &self,
        formula: &FormulaDescriptor,
        layout: &KegLayout,
        env: &BTreeMap<String, String>,
        source: &SourceArtifact,
        patches: &[PatchRule],
        stage: &mut Stage,
    ) -> Result<WorkDir> {
        self.enter(stage, Stage::CheckDependencies)?;
        deps::check(&formula.build_dependencies(), self.resolver)?;

        self.enter(stage, Stage::FetchSource)?;
        let tarball = self.fetcher.fetch(&source.url)?;

        self.enter(stage, Stage::VerifySource)?;
        integrity::verify_file(&tarball, &source.digest()?, &format!("source {}", source.url))?;

        self.enter(stage, Stage::Unpack)?;
        let work = WorkDir::create(&self.config.work_root, layout, self.config.keep_tmp)?;
        let source_dir = archive::unpack_source(&tarball, &work.path().join("src"))?;

        self.enter(stage, Stage::SelectPatches)?;
        info!("{} patch(es) selected for {}", patches.len(), self.config.platform);

        self.enter(stage, Stage::FetchPatches)?;
        let mut fetched = Vec::with_capacity(patches.len());
        for rule in patches {
            fetched.push(VerifiedPatch {
                rule: rule.clone(),
                path: self.fetcher.fetch(&rule.url)?,
            });
        }

        // Every patch is verified before the first one touches the tree
        self.enter(stage, Stage::VerifyPatches)?;
        for patch in &fetched {
            integrity::verify_file(
                &patch.path,
                &patch.rule.digest()?,
                &format!("patch {}", patch.rule.url),
            )?;
        }

        self.enter(stage, Stage::ApplyPatches)?;
        PatchApplier::new(self.runner, &self.config.patch_program, env)
            .apply_all(&fetched, &source_dir, &self.cancel)?;

        self.enter(stage, Stage::RunBuildSteps)?;
        self.replace_keg(&layout.prefix, || {
            InstallPipeline::new(self.runner, layout, env)
                .with_log_dir(self.config.log_dir(&formula.name))
                .run(&formula.install, &source_dir, &self.cancel)?;

            if !layout.prefix.is_dir() {
                return Err(Error::EmptyInstallation(layout.prefix.clone()));
            }

            let mut receipt = self.receipt(formula, layout);
            receipt.source = Some(SourceRecord {
                url: source.url.clone(),
                sha256: source.digest()?.to_string(),
            });
            receipt.patches = patches.iter().map(|p| p.url.clone()).collect();
            receipt.build_dependencies = formula
                .build_dependencies()
                .iter()
                .map(|d| d.to_string())
                .collect();
            receipt.write(&layout.prefix)
        })?;

        Ok(work)
    }

    fn receipt(&self, formula: &FormulaDescriptor, layout: &KegLayout) -> InstallReceipt {
        let mut receipt =
            InstallReceipt::new(&formula.name, &layout.version, self.config.platform.as_str());
        receipt.features = self.config.features.iter().cloned().collect();
        receipt
    }
}

/// Scratch directory of one source build
///
/// Removed on drop unless the configuration asks to keep it.
pub struct WorkDir {
    _guard: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl WorkDir {
    fn create(root: &Path, layout: &KegLayout, keep: bool) -> Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", layout.name, layout.version))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();

        if keep {
            let path = dir.keep();
            info!("Keeping build directory {}", path.display());
            return Ok(Self { _guard: None, path });
        }
        Ok(Self {
            _guard: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A keg moved out of the way while its replacement is installed
struct KegBackup {
    keg: PathBuf,
    stash: tempfile::TempDir,
}

impl KegBackup {
    /// Move `keg` into a hidden sibling directory, if it exists
    fn stash(keg: &Path) -> Result<Option<Self>> {
        if !keg.exists() {
            return Ok(None);
        }
        let rack = keg
            .parent()
            .ok_or_else(|| Error::Descriptor(format!("keg {} has no parent directory", keg.display())))?;
        let stash = tempfile::Builder::new()
            .prefix(".brewery-old-")
            .tempdir_in(rack)?;
        fs::rename(keg, stash.path().join("keg"))?;
        warn!("Replacing existing keg {}", keg.display());
        Ok(Some(Self {
            keg: keg.to_path_buf(),
            stash,
        }))
    }

    /// The replacement is in place; drop the old keg
    fn discard(self) -> Result<()> {
        self.stash.close()?;
        Ok(())
    }

    /// Remove whatever the failed install left and put the old keg back
    fn restore(self) -> Result<()> {
        if self.keg.exists() {
            fs::remove_dir_all(&self.keg)?;
        }
        fs::rename(self.stash.path().join("keg"), &self.keg)?;
        Ok(())
    }
}
