//! Artifact integrity verification.
//!
//! Downloaded archives are checked against digests taken from upstream
//! checksum manifests before any build stage consumes them. Two independent
//! algorithms (SHA-256 and SHA-512) can be applied to the same artifact. A
//! mismatch is fatal and never retried.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha256,
    Sha512,
}

impl DigestKind {
    pub fn name(self) -> &'static str {
        match self {
            DigestKind::Sha256 => "sha256",
            DigestKind::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding, used to pick digest tokens out of
    /// manifest lines.
    pub fn hex_len(self) -> usize {
        match self {
            DigestKind::Sha256 => 64,
            DigestKind::Sha512 => 128,
        }
    }
}

/// A trusted digest an artifact must match.
#[derive(Debug, Clone)]
pub struct ExpectedDigest {
    pub kind: DigestKind,
    pub hex: String,
}

/// Compute the hex digest of a file, streaming.
pub fn file_digest(kind: DigestKind, path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("opening {} for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    match kind {
        DigestKind::Sha256 => hash_reader(&mut reader, Sha256::new()),
        DigestKind::Sha512 => hash_reader(&mut reader, Sha512::new()),
    }
}

fn hash_reader<D: Digest>(reader: &mut impl Read, mut hasher: D) -> Result<String> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Verify a file against every expected digest. Any mismatch aborts the
/// pipeline; silent continuation on corrupted input is unacceptable.
pub fn verify_file(path: &Path, expected: &[ExpectedDigest]) -> Result<()> {
    for exp in expected {
        let actual = file_digest(exp.kind, path)?;
        let wanted = exp.hex.trim();
        if !actual.eq_ignore_ascii_case(wanted) {
            bail!(
                "integrity check failed for {} ({})\n  expected: {}\n  actual:   {}",
                path.display(),
                exp.kind.name(),
                wanted,
                actual
            );
        }
        println!("  {} OK for {}", exp.kind.name(), path.display());
    }
    Ok(())
}

/// Extract the expected digest for `filename` from a multi-entry manifest.
///
/// Tolerates PGP armor, unrelated entries, `*name` binary markers and
/// arbitrary whitespace. A line counts only when it mentions the exact
/// filename and carries a hex token of the right length.
pub fn digest_from_manifest(manifest: &str, filename: &str, kind: DigestKind) -> Result<String> {
    for line in manifest.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mentions = tokens
            .iter()
            .any(|t| *t == filename || t.strip_prefix('*') == Some(filename));
        if !mentions {
            continue;
        }
        if let Some(hex) = tokens
            .iter()
            .find(|t| t.len() == kind.hex_len() && t.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Ok(hex.to_lowercase());
        }
    }
    bail!(
        "no {} entry for '{}' in checksum manifest",
        kind.name(),
        filename
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_SHA512: &str = "9b71d224bd62f3785d96d46ad3ea3d73319bfbc2890caadae2dff72519673ca72323c3d99ba5c11d7c7acc6e14b8c5da0c4663475c2e5c3adef46f73bcdec043";

    fn hello_file(temp: &TempDir) -> std::path::PathBuf {
        let path = temp.path().join("artifact");
        fs::write(&path, b"hello").unwrap();
        path
    }

    #[test]
    fn test_file_digest_sha256_and_sha512() {
        let temp = TempDir::new().unwrap();
        let path = hello_file(&temp);

        assert_eq!(file_digest(DigestKind::Sha256, &path).unwrap(), HELLO_SHA256);
        assert_eq!(file_digest(DigestKind::Sha512, &path).unwrap(), HELLO_SHA512);
    }

    #[test]
    fn test_file_digest_hex_is_full_width() {
        // Every output byte must render as exactly two hex digits, so the
        // encoded digest always matches the manifest token length.
        let temp = TempDir::new().unwrap();
        let path = hello_file(&temp);

        for kind in [DigestKind::Sha256, DigestKind::Sha512] {
            let hex = file_digest(kind, &path).unwrap();
            assert_eq!(hex.len(), kind.hex_len());
            assert!(hex.bytes().all(|b| b.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_verify_file_accepts_both_digests() {
        let temp = TempDir::new().unwrap();
        let path = hello_file(&temp);

        verify_file(
            &path,
            &[
                ExpectedDigest {
                    kind: DigestKind::Sha256,
                    hex: HELLO_SHA256.to_uppercase(),
                },
                ExpectedDigest {
                    kind: DigestKind::Sha512,
                    hex: format!("  {}\n", HELLO_SHA512),
                },
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_verify_file_rejects_mutated_bytes() {
        let temp = TempDir::new().unwrap();
        let path = hello_file(&temp);
        // Mutate the cached artifact after the digest was pinned.
        fs::write(&path, b"hellO").unwrap();

        let err = verify_file(
            &path,
            &[ExpectedDigest {
                kind: DigestKind::Sha256,
                hex: HELLO_SHA256.to_string(),
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("integrity check failed"));
    }

    #[test]
    fn test_manifest_extracts_exact_filename() {
        let manifest = format!(
            "-----BEGIN PGP SIGNED MESSAGE-----\n\
             Hash: SHA256\n\
             \n\
             {}  linux-6.6.58.tar.xz\n\
             deadbeef{}  linux-6.6.57.tar.xz\n",
            HELLO_SHA256,
            &HELLO_SHA256[..56]
        );
        let hex =
            digest_from_manifest(&manifest, "linux-6.6.58.tar.xz", DigestKind::Sha256).unwrap();
        assert_eq!(hex, HELLO_SHA256);
    }

    #[test]
    fn test_manifest_tolerates_binary_marker_and_noise() {
        let manifest = format!(
            "# generated by release tooling\n\
             \t{} *alpine-minirootfs-3.20.3-x86_64.tar.gz   \n",
            HELLO_SHA512
        );
        let hex = digest_from_manifest(
            &manifest,
            "alpine-minirootfs-3.20.3-x86_64.tar.gz",
            DigestKind::Sha512,
        )
        .unwrap();
        assert_eq!(hex, HELLO_SHA512);
    }

    #[test]
    fn test_manifest_missing_entry_is_an_error() {
        let manifest = format!("{}  linux-6.6.57.tar.xz\n", HELLO_SHA256);
        let err = digest_from_manifest(&manifest, "linux-6.6.58.tar.xz", DigestKind::Sha256)
            .unwrap_err();
        assert!(err.to_string().contains("linux-6.6.58.tar.xz"));
    }

    #[test]
    fn test_manifest_ignores_wrong_length_digest() {
        // A sha256-length token must not satisfy a sha512 lookup.
        let manifest = format!("{}  base.tar.gz\n", HELLO_SHA256);
        assert!(digest_from_manifest(&manifest, "base.tar.gz", DigestKind::Sha512).is_err());
    }
}
