// src/integrity.rs

//! Content integrity verification
//!
//! Every artifact a formula references (source tarball, patch, bottle)
//! declares one SHA-256 digest. Content is hashed in full and compared
//! against that digest before anything else touches it.

use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Length of a hex-encoded SHA-256 digest
const SHA256_HEX_LEN: usize = 64;

/// A validated, lowercase hex SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parse a hex digest, accepting either case
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != SHA256_HEX_LEN {
            return Err(Error::Descriptor(format!(
                "sha256 must be {} hex characters, got {} ('{}')",
                SHA256_HEX_LEN,
                value.len(),
                value
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Descriptor(format!(
                "sha256 contains non-hex characters: '{}'",
                value
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Parse a digest that a descriptor field may have left out
    pub fn require(value: Option<&str>, what: &str) -> Result<Self> {
        match value {
            Some(v) => Self::parse(v)
                .map_err(|e| Error::Descriptor(format!("{}: {}", what, strip_prefix(e)))),
            None => Err(Error::Descriptor(format!("{} has no sha256", what))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_prefix(err: Error) -> String {
    match err {
        Error::Descriptor(msg) => msg,
        other => other.to_string(),
    }
}

/// Compute the hex SHA-256 of an in-memory buffer
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compute the hex SHA-256 of everything a reader yields
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    sha256_reader(&mut file)
}

/// Verify an in-memory buffer against its expected digest
pub fn verify(bytes: &[u8], expected: &Digest, artifact: &str) -> Result<()> {
    compare(sha256_hex(bytes), expected, artifact)
}

/// Verify a reader's full content against its expected digest
pub fn verify_reader<R: Read>(reader: &mut R, expected: &Digest, artifact: &str) -> Result<()> {
    compare(sha256_reader(reader)?, expected, artifact)
}

/// Verify a file on disk against its expected digest
pub fn verify_file(path: &Path, expected: &Digest, artifact: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());
    compare(sha256_file(path)?, expected, artifact)
}

fn compare(actual: String, expected: &Digest, artifact: &str) -> Result<()> {
    if !actual.eq_ignore_ascii_case(expected.as_str()) {
        return Err(Error::Integrity {
            artifact: artifact.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256("hello world")
    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_verify_matching_digest() {
        let digest = Digest::parse(HELLO).unwrap();
        assert!(verify(b"hello world", &digest, "source").is_ok());
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let digest = Digest::parse(&HELLO.to_uppercase()).unwrap();
        assert_eq!(digest.as_str(), HELLO);
        assert!(verify(b"hello world", &digest, "source").is_ok());
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let digest = Digest::parse(HELLO).unwrap();
        let original = b"hello world".to_vec();

        for byte in 0..original.len() {
            for bit in 0..8 {
                let mut mutated = original.clone();
                mutated[byte] ^= 1 << bit;
                let result = verify(&mutated, &digest, "source");
                assert!(
                    matches!(result, Err(Error::Integrity { .. })),
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_mismatch_reports_both_digests() {
        let digest = Digest::parse(HELLO).unwrap();
        match verify(b"goodbye", &digest, "patch 0") {
            Err(Error::Integrity {
                artifact,
                expected,
                actual,
            }) => {
                assert_eq!(artifact, "patch 0");
                assert_eq!(expected, HELLO);
                assert_eq!(actual, sha256_hex(b"goodbye"));
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let digest = Digest::parse(HELLO).unwrap();
        assert!(verify_file(file.path(), &digest, "source").is_ok());
        assert_eq!(sha256_file(file.path()).unwrap(), HELLO);
    }

    #[test]
    fn test_verify_reader() {
        let digest = Digest::parse(HELLO).unwrap();
        let mut reader: &[u8] = b"hello world";
        assert!(verify_reader(&mut reader, &digest, "bottle").is_ok());
    }

    #[test]
    fn test_malformed_digests_are_rejected() {
        assert!(matches!(Digest::parse("abc123"), Err(Error::Descriptor(_))));
        let not_hex = "z".repeat(64);
        assert!(matches!(Digest::parse(&not_hex), Err(Error::Descriptor(_))));
        assert!(matches!(
            Digest::require(None, "source"),
            Err(Error::Descriptor(msg)) if msg.contains("source")
        ));
    }
}
