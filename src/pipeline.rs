//! Pipeline orchestration.
//!
//! Stages run strictly sequentially and fail fast: any error halts the run
//! with no rollback. The sentinels make the next invocation self-healing by
//! skipping already-correct work. The only internal parallelism is what the
//! kernel build system does with `-j`; the orchestrator itself owns no
//! threads and no shared mutable state beyond the build tree.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::Path;

use crate::config::BuildConfig;
use crate::paths::BuildPaths;
use crate::process::CommandRunner;
use crate::verify::{DigestKind, ExpectedDigest};
use crate::{fetch, image, kernel, preflight, qemu, rootfs, stage, verify};

/// Run the full pipeline from `base_dir`.
pub fn run(cfg: &BuildConfig, base_dir: &Path, runner: &dyn CommandRunner) -> Result<()> {
    let paths = BuildPaths::new(base_dir, cfg);

    if cfg.clean {
        println!("Cleaning derived artifacts...");
        stage::clean(&paths)?;
    }

    preflight::check_host_tools(cfg.smoke_test)?;

    fs::create_dir_all(&paths.build_dir)
        .with_context(|| format!("creating {}", paths.build_dir.display()))?;
    let lock = File::create(&paths.lock_file)
        .with_context(|| format!("creating {}", paths.lock_file.display()))?;
    lock.try_lock_exclusive().with_context(|| {
        format!(
            "another build owns the staging tree (lock: {})",
            paths.lock_file.display()
        )
    })?;

    fetch_inputs(cfg, &paths)?;

    println!("Kernel stage...");
    kernel::unpack_source(&paths, runner)?;
    kernel::build(&paths, runner)?;

    println!("Rootfs stage...");
    rootfs::unpack_base(&paths)?;
    rootfs::build_apk_tools(&paths, runner)?;
    rootfs::install_packages(cfg, &paths, runner)?;
    rootfs::install_payload(&paths)?;
    kernel::install_modules(&paths, runner)?;

    println!("Packaging...");
    image::build_cpio(&paths, runner)?;
    image::concat_image(&paths.bzimage, &paths.rootfs_cpio, &paths.flat_image)?;

    stage::write_state(&paths)?;
    println!("Image ready at {}", paths.flat_image.display());

    if cfg.smoke_test {
        qemu::smoke_test(&paths, runner)?;
    }

    Ok(())
}

/// Fetch and verify both upstream artifacts. An integrity failure aborts
/// here, before any build stage consumes the bytes.
fn fetch_inputs(cfg: &BuildConfig, paths: &BuildPaths) -> Result<()> {
    println!("Fetching kernel {}...", cfg.kernel_version);
    fetch::fetch(&cfg.kernel_url(), &paths.kernel_archive)?;
    let manifest = fetch::fetch_text(&cfg.kernel_manifest_url(), &paths.kernel_manifest)?;
    let kernel_sha256 =
        verify::digest_from_manifest(&manifest, &cfg.kernel_filename(), DigestKind::Sha256)?;
    verify::verify_file(
        &paths.kernel_archive,
        &[ExpectedDigest {
            kind: DigestKind::Sha256,
            hex: kernel_sha256,
        }],
    )?;

    println!("Fetching Alpine minirootfs {}...", cfg.alpine_version);
    fetch::fetch(&cfg.rootfs_url(), &paths.rootfs_archive)?;
    let sha256_listing = fetch::fetch_text(
        &format!("{}.sha256", cfg.rootfs_url()),
        &paths.rootfs_sha256,
    )?;
    let sha512_listing = fetch::fetch_text(
        &format!("{}.sha512", cfg.rootfs_url()),
        &paths.rootfs_sha512,
    )?;
    // Two independent algorithms on the same artifact: tampering with a
    // single listing is not enough.
    let expected = [
        ExpectedDigest {
            kind: DigestKind::Sha256,
            hex: verify::digest_from_manifest(
                &sha256_listing,
                &cfg.rootfs_filename(),
                DigestKind::Sha256,
            )?,
        },
        ExpectedDigest {
            kind: DigestKind::Sha512,
            hex: verify::digest_from_manifest(
                &sha512_listing,
                &cfg.rootfs_filename(),
                DigestKind::Sha512,
            )?,
        },
    ];
    verify::verify_file(&paths.rootfs_archive, &expected)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::file_digest;
    use tempfile::TempDir;

    // The full pipeline needs the network and real tools; fetch_inputs is
    // exercised here with a pre-populated cache, which is exactly the
    // idempotent re-run path: zero downloads, verification from cached
    // manifests only.
    #[test]
    fn test_fetch_inputs_verifies_from_cache() {
        let temp = TempDir::new().unwrap();
        let cfg = BuildConfig::new("6.6.58", "3.20.3", false, false, false);
        let paths = BuildPaths::new(temp.path(), &cfg);
        fs::create_dir_all(&paths.downloads).unwrap();

        fs::write(&paths.kernel_archive, b"kernel tarball bytes").unwrap();
        fs::write(&paths.rootfs_archive, b"minirootfs bytes").unwrap();

        let kernel_sha = file_digest(DigestKind::Sha256, &paths.kernel_archive).unwrap();
        fs::write(
            &paths.kernel_manifest,
            format!("{}  {}\n", kernel_sha, cfg.kernel_filename()),
        )
        .unwrap();

        let rootfs_sha256 = file_digest(DigestKind::Sha256, &paths.rootfs_archive).unwrap();
        let rootfs_sha512 = file_digest(DigestKind::Sha512, &paths.rootfs_archive).unwrap();
        fs::write(
            &paths.rootfs_sha256,
            format!("{}  {}\n", rootfs_sha256, cfg.rootfs_filename()),
        )
        .unwrap();
        fs::write(
            &paths.rootfs_sha512,
            format!("{}  {}\n", rootfs_sha512, cfg.rootfs_filename()),
        )
        .unwrap();

        fetch_inputs(&cfg, &paths).unwrap();
    }

    #[test]
    fn test_fetch_inputs_aborts_on_corrupted_cache() {
        let temp = TempDir::new().unwrap();
        let cfg = BuildConfig::new("6.6.58", "3.20.3", false, false, false);
        let paths = BuildPaths::new(temp.path(), &cfg);
        fs::create_dir_all(&paths.downloads).unwrap();

        fs::write(&paths.kernel_archive, b"kernel tarball bytes").unwrap();
        let kernel_sha = file_digest(DigestKind::Sha256, &paths.kernel_archive).unwrap();
        fs::write(
            &paths.kernel_manifest,
            format!("{}  {}\n", kernel_sha, cfg.kernel_filename()),
        )
        .unwrap();

        // Mutate the cached bytes after the digest was pinned.
        fs::write(&paths.kernel_archive, b"kernel tarball bytes!").unwrap();

        let err = fetch_inputs(&cfg, &paths).unwrap_err();
        assert!(err.to_string().contains("integrity check failed"));
    }
}
