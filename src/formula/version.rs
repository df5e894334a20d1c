// src/formula/version.rs

//! Version detection from source URLs
//!
//! Formulae rarely spell out their version; it is almost always embedded in
//! the source tarball name (`rsync-3.1.0.tar.gz`, `v1.4.2.tar.gz`).

/// Archive suffixes stripped before looking for a version
const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.xz", ".tar.zst", ".tar.bz2", ".tar", ".tgz", ".txz", ".tbz", ".tbz2",
    ".zip",
];

/// Detect a version string from a source URL's file name
pub fn detect(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = strip_archive_suffix(file_name);

    // Bare version archives (GitHub tag downloads)
    if let Some(version) = leading_version(stem) {
        return Some(version);
    }

    for (idx, c) in stem.char_indices() {
        if c == '-' || c == '_' {
            if let Some(version) = leading_version(&stem[idx + 1..]) {
                return Some(version);
            }
        }
    }

    None
}

fn strip_archive_suffix(file_name: &str) -> &str {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name)
}

/// Parse a version at the start of `rest`, allowing a `v` prefix
///
/// Stops at the first `-` separated part that is not numeric-led, so
/// `1.2-src` yields `1.2`.
fn leading_version(rest: &str) -> Option<String> {
    let rest = rest.strip_prefix('v').unwrap_or(rest);
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let parts: Vec<&str> = rest
        .split('-')
        .take_while(|part| part.starts_with(|c: char| c.is_ascii_digit()))
        .collect();

    let version = parts.join("-");
    let version = version.trim_end_matches('.');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_common_tarball_names() {
        assert_eq!(
            detect("https://download.samba.org/pub/rsync/src/rsync-3.1.0.tar.gz"),
            Some("3.1.0".to_string())
        );
        assert_eq!(
            detect("https://ftp.gnu.org/gnu/make/make-4.4.1.tar.xz"),
            Some("4.4.1".to_string())
        );
        assert_eq!(
            detect("https://example.com/lib_foo_2.0.tgz"),
            Some("2.0".to_string())
        );
    }

    #[test]
    fn test_detect_bare_and_prefixed_versions() {
        assert_eq!(
            detect("https://github.com/o/r/archive/v1.4.2.tar.gz"),
            Some("1.4.2".to_string())
        );
        assert_eq!(
            detect("https://example.com/pkg-config-0.29.2.tar.gz"),
            Some("0.29.2".to_string())
        );
    }

    #[test]
    fn test_detect_drops_trailing_labels_and_queries() {
        assert_eq!(
            detect("https://example.com/foo-1.2-src.tar.gz?download=1"),
            Some("1.2".to_string())
        );
    }

    #[test]
    fn test_detect_without_version() {
        assert_eq!(detect("https://example.com/latest.tar.gz"), None);
        assert_eq!(detect("https://example.com/"), None);
    }
}
