// src/pipeline.rs

//! The install pipeline
//!
//! Runs a formula's build steps one by one in the unpacked source tree.
//! Each step is its own process; the first non-zero exit stops the
//! pipeline and nothing after it runs. Failed steps are never retried and
//! partially installed files are left for the caller to clean up.

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::formula::BuildStep;
use crate::process::{Cancellation, CommandOutput, CommandRunner, CommandSpec};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory layout of one keg, used for placeholder expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KegLayout {
    pub name: String,
    pub version: String,
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    pub etc: PathBuf,
    pub var: PathBuf,
    pub jobs: usize,
}

impl KegLayout {
    pub fn new(config: &BuildConfig, name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            prefix: config.keg_path(name, version),
            cellar: config.cellar.clone(),
            etc: config.etc.clone(),
            var: config.var.clone(),
            jobs: config.jobs,
        }
    }

    /// Value of a `{placeholder}`, if it is one we know
    fn lookup(&self, key: &str) -> Option<String> {
        let path = |p: PathBuf| Some(p.to_string_lossy().into_owned());
        match key {
            "prefix" => path(self.prefix.clone()),
            "bin" => path(self.prefix.join("bin")),
            "sbin" => path(self.prefix.join("sbin")),
            "lib" => path(self.prefix.join("lib")),
            "libexec" => path(self.prefix.join("libexec")),
            "include" => path(self.prefix.join("include")),
            "share" => path(self.prefix.join("share")),
            "man" => path(self.prefix.join("share").join("man")),
            "etc" => path(self.etc.clone()),
            "var" => path(self.var.clone()),
            "cellar" => path(self.cellar.clone()),
            "name" => Some(self.name.clone()),
            "version" => Some(self.version.clone()),
            "jobs" => Some(self.jobs.to_string()),
            _ => None,
        }
    }

    /// Replace known `{placeholders}`; anything else is left verbatim
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => match self.lookup(&after[..close]) {
                    Some(value) => {
                        out.push_str(&value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                },
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Environment for build and test commands
///
/// The caller's base environment, then the injected values (`PREFIX`,
/// `MAKEFLAGS`, one `FEATURE_<NAME>=1` per enabled feature), then explicit
/// overrides.
pub fn build_env(config: &BuildConfig, layout: &KegLayout) -> BTreeMap<String, String> {
    let mut env = config.env.clone();
    env.insert(
        "PREFIX".to_string(),
        layout.prefix.to_string_lossy().into_owned(),
    );
    env.insert("MAKEFLAGS".to_string(), format!("-j{}", layout.jobs));
    for feature in &config.features {
        env.insert(feature_var(feature), "1".to_string());
    }
    env.extend(config.env_overrides.clone());
    env
}

/// `FEATURE_<NAME>` for a feature flag
pub fn feature_var(feature: &str) -> String {
    let name: String = feature
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("FEATURE_{}", name)
}

/// Resolve a step's program: relative paths with a `/` are taken relative
/// to the working directory, bare names are looked up on `PATH`
pub fn resolve_program(program: &str, working_dir: &Path) -> String {
    let path = Path::new(program);
    if program.contains('/') && path.is_relative() {
        working_dir.join(path).to_string_lossy().into_owned()
    } else {
        program.to_string()
    }
}

/// Executes build steps for one keg
pub struct InstallPipeline<'a> {
    runner: &'a dyn CommandRunner,
    layout: &'a KegLayout,
    env: &'a BTreeMap<String, String>,
    log_dir: Option<PathBuf>,
}

impl<'a> InstallPipeline<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        layout: &'a KegLayout,
        env: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            runner,
            layout,
            env,
            log_dir: None,
        }
    }

    /// Write each step's output to `{dir}/{NN}.{program}`
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// The command line a step expands to
    pub fn command(&self, step: &BuildStep, working_dir: &Path) -> CommandSpec {
        let program = resolve_program(&self.layout.expand(&step.command), working_dir);
        CommandSpec::new(program, working_dir)
            .args(step.args.iter().map(|a| self.layout.expand(a)))
            .env(self.env.clone())
    }

    /// Run every step in order, halting at the first failure
    pub fn run(&self, steps: &[BuildStep], working_dir: &Path, cancel: &Cancellation) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            cancel.check()?;

            let spec = self.command(step, working_dir);
            info!("==> [{}/{}] {}", index + 1, steps.len(), spec.display());

            let output = match self.runner.run(&spec, cancel) {
                Ok(output) => output,
                Err(Error::Io(source)) => {
                    return Err(Error::StepSpawn {
                        index,
                        command: spec.display(),
                        source,
                    });
                }
                Err(e) => return Err(e),
            };
            self.write_log(index, &spec, &output);

            if !output.success() {
                return Err(Error::StepFailure {
                    index,
                    command: spec.display(),
                    exit_code: output.exit_code,
                    stderr_tail: output.stderr_tail(),
                });
            }
            debug!("Step {} finished", index);
        }
        Ok(())
    }

    fn write_log(&self, index: usize, spec: &CommandSpec, output: &CommandOutput) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let program = Path::new(&spec.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "step".to_string());
        let path = dir.join(format!("{:02}.{}", index + 1, program));

        let result = fs::create_dir_all(dir).and_then(|_| {
            let mut file = fs::File::create(&path)?;
            writeln!(file, "{}\n", spec.display())?;
            file.write_all(&output.stdout)?;
            file.write_all(&output.stderr)?;
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to write build log {}: {}", path.display(), e);
        }
    }
}
