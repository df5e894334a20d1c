// src/archive.rs

//! Tarball unpacking for source archives and bottles
//!
//! Compression is detected from magic bytes rather than file names, since
//! cached downloads do not always keep a meaningful extension.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Compression wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
    None,
}

impl Compression {
    /// Detect compression from the first bytes of a file
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1F, 0x8B]) {
            Compression::Gzip
        } else if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            Compression::Xz
        } else if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    fn sniff(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 6];
        let mut read = 0;
        while read < magic.len() {
            let n = file.read(&mut magic[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(Self::detect(&magic[..read]))
    }
}

/// Open a (possibly compressed) tarball for reading
fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let compression = Compression::sniff(path)?;
    debug!("Opening {} ({:?})", path.display(), compression);

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Xz => Box::new(XzDecoder::new(file)),
        Compression::Zstd => {
            let decoder = zstd::Decoder::new(file)
                .map_err(|e| Error::Archive(format!("Failed to create zstd decoder: {}", e)))?;
            Box::new(decoder)
        }
        Compression::None => Box::new(file),
    };

    Ok(Archive::new(reader))
}

/// Unpack a tarball into `dest`
pub fn unpack(path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = open_archive(path)?;
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::Archive(format!("Failed to unpack {}: {}", path.display(), e)))?;
    Ok(())
}

/// Unpack a source tarball and return the directory to build in
///
/// Source tarballs conventionally wrap everything in one top-level directory
/// (`rsync-3.1.0/`); when that is the case the build runs inside it.
pub fn unpack_source(path: &Path, dest: &Path) -> Result<PathBuf> {
    unpack(path, dest)?;

    let mut entries = fs::read_dir(dest)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect::<Vec<_>>();

    if entries.len() == 1 && entries[0].is_dir() {
        if let Some(root) = entries.pop() {
            debug!("Source root is {}", root.display());
            return Ok(root);
        }
    }
    Ok(dest.to_path_buf())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    /// Build a gzipped tarball from `(path, content, mode)` entries
    pub fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_detect_compression() {
        assert_eq!(Compression::detect(&[0x1F, 0x8B, 0x08]), Compression::Gzip);
        assert_eq!(
            Compression::detect(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
            Compression::Xz
        );
        assert_eq!(Compression::detect(&[0x28, 0xB5, 0x2F, 0xFD]), Compression::Zstd);
        assert_eq!(Compression::detect(b"ustar"), Compression::None);
    }

    #[test]
    fn test_unpack_source_enters_single_top_level_dir() {
        let dir = TempDir::new().unwrap();
        let tarball = dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(
            &tarball,
            tar_gz(&[
                ("pkg-1.0/configure", b"#!/bin/sh\n", 0o755),
                ("pkg-1.0/README", b"hi", 0o644),
            ]),
        )
        .unwrap();

        let root = unpack_source(&tarball, &dir.path().join("src")).unwrap();
        assert!(root.ends_with("pkg-1.0"));
        assert!(root.join("configure").is_file());
    }

    #[test]
    fn test_unpack_source_flat_archive() {
        let dir = TempDir::new().unwrap();
        let tarball = dir.path().join("flat.tar.gz");
        std::fs::write(
            &tarball,
            tar_gz(&[("a.c", b"int main(){}", 0o644), ("Makefile", b"all:\n", 0o644)]),
        )
        .unwrap();

        let dest = dir.path().join("src");
        let root = unpack_source(&tarball, &dest).unwrap();
        assert_eq!(root, dest);
    }

    #[test]
    fn test_unpack_zstd_tarball() {
        let dir = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "x/y.txt", &b"ok"[..]).unwrap();
        let tar_bytes = builder.into_inner().unwrap();
        let compressed = zstd::encode_all(&tar_bytes[..], 0).unwrap();

        let tarball = dir.path().join("x.tar.zst");
        std::fs::write(&tarball, compressed).unwrap();
        unpack(&tarball, &dir.path().join("out")).unwrap();
        assert_eq!(std::fs::read(dir.path().join("out/x/y.txt")).unwrap(), b"ok");
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let tarball = dir.path().join("bad.tar.gz");
        std::fs::write(&tarball, [0x1F, 0x8B, 0x00, 0x01, 0x02]).unwrap();
        assert!(unpack(&tarball, &dir.path().join("out")).is_err());
    }
}
