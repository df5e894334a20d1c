// src/patch.rs

//! Patch selection and application
//!
//! Patch order is meaningful: a later patch may rely on an earlier one
//! having been applied. Selection only filters by platform guard and keeps
//! declaration order; application is strictly sequential.

use crate::error::{Error, Result};
use crate::formula::PatchRule;
use crate::platform::{self, Platform};
use crate::process::{Cancellation, CommandRunner, CommandSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Patches that apply on `current`, in declaration order
pub fn select(rules: &[PatchRule], current: &Platform) -> Vec<PatchRule> {
    rules
        .iter()
        .filter(|rule| platform::matches(rule.only_on.as_ref(), current))
        .cloned()
        .collect()
}

/// A selected patch whose content has been fetched and verified
#[derive(Debug, Clone)]
pub struct VerifiedPatch {
    pub rule: PatchRule,
    pub path: PathBuf,
}

/// Applies verified patches to an unpacked source tree
pub struct PatchApplier<'a> {
    runner: &'a dyn CommandRunner,
    program: &'a str,
    env: &'a BTreeMap<String, String>,
}

impl<'a> PatchApplier<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        program: &'a str,
        env: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            runner,
            program,
            env,
        }
    }

    /// Command line applying one patch file
    pub fn command(&self, patch: &VerifiedPatch, source_dir: &Path) -> CommandSpec {
        CommandSpec::new(self.program, source_dir)
            .args(["-g", "0", "-f"])
            .arg(format!("-p{}", patch.rule.strip))
            .arg("-i")
            .arg(patch.path.to_string_lossy().into_owned())
            .env(self.env.clone())
    }

    /// Apply every patch in order, stopping at the first rejection
    pub fn apply_all(
        &self,
        patches: &[VerifiedPatch],
        source_dir: &Path,
        cancel: &Cancellation,
    ) -> Result<()> {
        for (index, patch) in patches.iter().enumerate() {
            cancel.check()?;
            info!("Applying patch {}: {}", index, patch.rule.url);

            let spec = self.command(patch, source_dir);
            let output = self.runner.run(&spec, cancel)?;
            if !output.success() {
                return Err(Error::PatchApply {
                    index,
                    url: patch.rule.url.clone(),
                    exit_code: output.exit_code,
                    stderr_tail: output.stderr_tail(),
                });
            }
            debug!("Patch {} applied", index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformGuard;
    use crate::process::tests::RecordingRunner;

    fn rule(url: &str, guard: Option<&[&str]>) -> PatchRule {
        PatchRule {
            url: url.to_string(),
            sha256: Some("0".repeat(64)),
            only_on: guard.map(|tags| PlatformGuard::new(tags.iter().map(|t| t.to_string()).collect())),
            strip: 1,
        }
    }

    fn urls(rules: &[PatchRule]) -> Vec<&str> {
        rules.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_select_keeps_matching_in_order() {
        let rules = vec![
            rule("linux-1", Some(&["linux"])),
            rule("mac-1", Some(&["mac"])),
            rule("linux-2", Some(&["linux"])),
            rule("mac-2", Some(&["mac"])),
        ];
        let mac = Platform::new("mac").unwrap();
        assert_eq!(urls(&select(&rules, &mac)), vec!["mac-1", "mac-2"]);
    }

    #[test]
    fn test_select_includes_unguarded_and_is_repeatable() {
        let rules = vec![
            rule("all-1", None),
            rule("mac-1", Some(&["mac", "sonoma"])),
            rule("all-2", None),
            rule("linux-1", Some(&["linux"])),
        ];
        let sonoma = Platform::new("sonoma").unwrap();
        let first = select(&rules, &sonoma);
        assert_eq!(urls(&first), vec!["all-1", "mac-1", "all-2"]);
        assert_eq!(select(&rules, &sonoma), first);
    }

    #[test]
    fn test_apply_all_in_order_with_strip_level() {
        let runner = RecordingRunner::default();
        let env = BTreeMap::new();
        let applier = PatchApplier::new(&runner, "patch", &env);

        let mut second = rule("b.diff", None);
        second.strip = 0;
        let patches = vec![
            VerifiedPatch { rule: rule("a.diff", None), path: PathBuf::from("/cache/a.diff") },
            VerifiedPatch { rule: second, path: PathBuf::from("/cache/b.diff") },
        ];

        applier
            .apply_all(&patches, Path::new("/src"), &Cancellation::new())
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["-g", "0", "-f", "-p1", "-i", "/cache/a.diff"]);
        assert_eq!(calls[1].args, vec!["-g", "0", "-f", "-p0", "-i", "/cache/b.diff"]);
        assert_eq!(calls[0].cwd, PathBuf::from("/src"));
    }

    #[test]
    fn test_rejected_patch_stops_application() {
        let runner = RecordingRunner::failing("patch", 1);
        let env = BTreeMap::new();
        let applier = PatchApplier::new(&runner, "patch", &env);
        let patches = vec![
            VerifiedPatch { rule: rule("a.diff", None), path: PathBuf::from("/cache/a.diff") },
            VerifiedPatch { rule: rule("b.diff", None), path: PathBuf::from("/cache/b.diff") },
        ];

        let result = applier.apply_all(&patches, Path::new("/src"), &Cancellation::new());
        match result {
            Err(Error::PatchApply { index, url, exit_code, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(url, "a.diff");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("expected patch failure, got {:?}", other),
        }
        assert_eq!(runner.count("patch"), 1);
    }
}
