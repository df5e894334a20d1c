// src/bottle.rs

//! Bottle selection
//!
//! A formula may list several bottles, each built for one platform tag.
//! Resolution picks the first bottle, in declaration order, whose tag is
//! the current platform. Finding none is the normal "build from source"
//! branch and not an error.

use crate::error::{Error, Result};
use crate::formula::{BottleArtifact, CellarPolicy};
use crate::platform::Platform;
use std::path::Path;
use tracing::debug;

/// Pick the bottle for `current`, if any
///
/// When two bottles claim the same tag the first declared wins. The chosen
/// bottle must carry a well-formed digest; anything else is a descriptor
/// error raised before any fetch.
pub fn resolve<'a>(
    bottles: &'a [BottleArtifact],
    current: &Platform,
) -> Result<Option<&'a BottleArtifact>> {
    let Some(bottle) = bottles.iter().find(|b| b.tag == current.as_str()) else {
        debug!("No bottle for platform {}", current);
        return Ok(None);
    };

    bottle.digest()?;
    debug!("Resolved bottle {} (rebuild {})", bottle.tag, bottle.rebuild);
    Ok(Some(bottle))
}

/// File name of a bottle tarball: `{name}-{version}.{tag}.bottle[.{rebuild}].tar.gz`
pub fn file_name(name: &str, version: &str, bottle: &BottleArtifact) -> String {
    if bottle.rebuild > 0 {
        format!(
            "{}-{}.{}.bottle.{}.tar.gz",
            name, version, bottle.tag, bottle.rebuild
        )
    } else {
        format!("{}-{}.{}.bottle.tar.gz", name, version, bottle.tag)
    }
}

/// Download URL of a bottle below `root_url`
pub fn url(root_url: &str, name: &str, version: &str, bottle: &BottleArtifact) -> Result<String> {
    if root_url.trim().is_empty() {
        return Err(Error::Descriptor(format!(
            "no bottle root URL configured for {}",
            name
        )));
    }
    Ok(format!(
        "{}/{}",
        root_url.trim_end_matches('/'),
        file_name(name, version, bottle)
    ))
}

/// Can a bottle with this policy be poured into `cellar`?
pub fn is_compatible(policy: &CellarPolicy, cellar: &Path) -> bool {
    match policy {
        CellarPolicy::Any | CellarPolicy::AnySkipRelocation => true,
        CellarPolicy::Path(path) => Path::new(path) == cellar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA_A: &str = "164e7c934b2de1b49b1885e96903386ea808cb552a3c9dd9e585f7b98ae865cd";
    const SHA_B: &str = "96ee2027bfe92f0b5d3f5812eb8b23a46141134ad8308acda9856a591a9ca807";

    fn bottle(tag: &str, sha: Option<&str>) -> BottleArtifact {
        BottleArtifact {
            tag: tag.to_string(),
            sha256: sha.map(|s| s.to_string()),
            cellar: CellarPolicy::Any,
            rebuild: 0,
        }
    }

    fn platform(tag: &str) -> Platform {
        Platform::new(tag).unwrap()
    }

    #[test]
    fn test_resolve_matching_bottle() {
        let bottles = vec![bottle("yosemite", Some(SHA_A)), bottle("mavericks", Some(SHA_B))];
        let chosen = resolve(&bottles, &platform("mavericks")).unwrap().unwrap();
        assert_eq!(chosen.sha256.as_deref(), Some(SHA_B));
    }

    #[test]
    fn test_no_bottle_for_other_platform() {
        let bottles = vec![bottle("x", Some(SHA_A))];
        assert!(resolve(&bottles, &platform("y")).unwrap().is_none());
        assert!(resolve(&[], &platform("y")).unwrap().is_none());
    }

    #[test]
    fn test_first_declared_wins_on_duplicate_tags() {
        let bottles = vec![bottle("sonoma", Some(SHA_A)), bottle("sonoma", Some(SHA_B))];
        for _ in 0..3 {
            let chosen = resolve(&bottles, &platform("sonoma")).unwrap().unwrap();
            assert_eq!(chosen.sha256.as_deref(), Some(SHA_A));
        }
    }

    #[test]
    fn test_chosen_bottle_without_digest_is_descriptor_error() {
        let bottles = vec![bottle("sonoma", None)];
        assert!(matches!(
            resolve(&bottles, &platform("sonoma")),
            Err(Error::Descriptor(_))
        ));

        let malformed = vec![bottle("sonoma", Some("deadbeef"))];
        assert!(matches!(
            resolve(&malformed, &platform("sonoma")),
            Err(Error::Descriptor(_))
        ));

        // A bad digest on a bottle that is not chosen does not matter here
        assert!(resolve(&bottles, &platform("ventura")).unwrap().is_none());
    }

    #[test]
    fn test_file_name_and_url() {
        let mut b = bottle("yosemite", Some(SHA_A));
        assert_eq!(file_name("rsync", "3.1.0", &b), "rsync-3.1.0.yosemite.bottle.tar.gz");

        b.rebuild = 1;
        assert_eq!(
            url("https://bottles.example.com/", "rsync", "3.1.0", &b).unwrap(),
            "https://bottles.example.com/rsync-3.1.0.yosemite.bottle.1.tar.gz"
        );
        assert!(url("", "rsync", "3.1.0", &b).is_err());
    }

    #[test]
    fn test_cellar_compatibility() {
        let cellar = Path::new("/opt/brewery/Cellar");
        assert!(is_compatible(&CellarPolicy::Any, cellar));
        assert!(is_compatible(&CellarPolicy::AnySkipRelocation, cellar));
        assert!(is_compatible(
            &CellarPolicy::Path("/opt/brewery/Cellar".to_string()),
            cellar
        ));
        assert!(!is_compatible(
            &CellarPolicy::Path("/usr/local/Cellar".to_string()),
            cellar
        ));
    }
}
