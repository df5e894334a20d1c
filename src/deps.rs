// src/deps.rs

//! Build-time dependency checks
//!
//! A formula names the formulae it needs while building from source. This
//! module does not resolve a dependency graph; it only asks an external
//! resolver whether each name can be provided and reports every one that
//! cannot.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Answers whether a prerequisite is available
pub trait DependencyResolver: Send + Sync {
    fn is_resolvable(&self, name: &str) -> bool;
}

/// A dependency is available when it has at least one keg in the cellar
#[derive(Debug, Clone)]
pub struct CellarResolver {
    cellar: PathBuf,
}

impl CellarResolver {
    pub fn new(cellar: impl Into<PathBuf>) -> Self {
        Self {
            cellar: cellar.into(),
        }
    }
}

impl DependencyResolver for CellarResolver {
    fn is_resolvable(&self, name: &str) -> bool {
        let rack = self.cellar.join(name);
        std::fs::read_dir(&rack)
            .map(|mut kegs| kegs.any(|keg| keg.is_ok_and(|k| k.path().is_dir())))
            .unwrap_or(false)
    }
}

/// A dependency is available when an executable of that name is on `PATH`
///
/// The search path is supplied explicitly rather than read from the process
/// environment.
#[derive(Debug, Clone)]
pub struct PathResolver {
    path: OsString,
    cwd: PathBuf,
}

impl PathResolver {
    pub fn new(path: impl Into<OsString>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cwd: cwd.into(),
        }
    }
}

impl DependencyResolver for PathResolver {
    fn is_resolvable(&self, name: &str) -> bool {
        which::which_in(name, Some(&self.path), &self.cwd).is_ok()
    }
}

/// Available when any inner resolver can provide it
pub struct AnyOf(pub Vec<Box<dyn DependencyResolver>>);

impl DependencyResolver for AnyOf {
    fn is_resolvable(&self, name: &str) -> bool {
        self.0.iter().any(|r| r.is_resolvable(name))
    }
}

/// Check every build dependency, reporting all missing ones at once
pub fn check(deps: &[&str], resolver: &dyn DependencyResolver) -> Result<()> {
    let missing: Vec<String> = deps
        .iter()
        .filter(|name| {
            let ok = resolver.is_resolvable(name);
            debug!("Build dependency {}: {}", name, if ok { "ok" } else { "missing" });
            !ok
        })
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::UnresolvedDependencies(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct Known(HashSet<&'static str>);

    impl DependencyResolver for Known {
        fn is_resolvable(&self, name: &str) -> bool {
            self.0.contains(name)
        }
    }

    #[test]
    fn test_check_reports_all_missing() {
        let resolver = Known(["autoconf"].into_iter().collect());
        match check(&["autoconf", "automake", "libtool"], &resolver) {
            Err(Error::UnresolvedDependencies(missing)) => {
                assert_eq!(missing, vec!["automake", "libtool"]);
            }
            other => panic!("expected unresolved dependencies, got {:?}", other),
        }
        assert!(check(&["autoconf"], &resolver).is_ok());
        assert!(check(&[], &resolver).is_ok());
    }

    #[test]
    fn test_cellar_resolver() {
        let cellar = TempDir::new().unwrap();
        std::fs::create_dir_all(cellar.path().join("autoconf/2.72")).unwrap();
        std::fs::create_dir_all(cellar.path().join("empty")).unwrap();

        let resolver = CellarResolver::new(cellar.path());
        assert!(resolver.is_resolvable("autoconf"));
        assert!(!resolver.is_resolvable("empty"));
        assert!(!resolver.is_resolvable("automake"));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_resolver_and_any_of() {
        use std::os::unix::fs::PermissionsExt;

        let bin = TempDir::new().unwrap();
        let tool = bin.path().join("autoconf");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = PathResolver::new(bin.path().as_os_str(), bin.path());
        assert!(path.is_resolvable("autoconf"));
        assert!(!path.is_resolvable("automake"));

        let cellar = TempDir::new().unwrap();
        std::fs::create_dir_all(cellar.path().join("automake/1.16")).unwrap();
        let both = AnyOf(vec![
            Box::new(path),
            Box::new(CellarResolver::new(cellar.path())),
        ]);
        assert!(check(&["autoconf", "automake"], &both).is_ok());
    }
}
