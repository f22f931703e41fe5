//! On-disk layout for a pipeline run.
//!
//! Single source of truth for WHERE things go; stages decide HOW they get
//! there. Everything under `build/` is derived state and is removed
//! wholesale by `--clean`.

use std::path::{Path, PathBuf};

use crate::config::BuildConfig;

/// Every directory and file the pipeline touches, computed once from the
/// base directory and the build configuration.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Repository root the pipeline runs from.
    pub base_dir: PathBuf,
    /// Root of all derived state.
    pub build_dir: PathBuf,
    /// Downloaded archives and checksum manifests, cached by filename.
    pub downloads: PathBuf,
    /// Unpacked kernel source tree.
    pub kernel_src: PathBuf,
    /// Staging tree: the future filesystem contents of the image.
    pub staging: PathBuf,
    /// Output artifacts.
    pub out_dir: PathBuf,

    /// Cached kernel source tarball.
    pub kernel_archive: PathBuf,
    /// Cached kernel.org checksum manifest.
    pub kernel_manifest: PathBuf,
    /// Cached minirootfs archive.
    pub rootfs_archive: PathBuf,
    /// Cached minirootfs SHA-256 listing.
    pub rootfs_sha256: PathBuf,
    /// Cached minirootfs SHA-512 listing.
    pub rootfs_sha512: PathBuf,

    /// Kernel boot image produced by the kernel build.
    pub bzimage: PathBuf,
    /// Compressed serialized staging tree.
    pub rootfs_cpio: PathBuf,
    /// Flat image: boot image bytes followed by the compressed tree bytes.
    pub flat_image: PathBuf,

    /// Marker: minirootfs unpacked into the staging tree. Lives outside the
    /// tree so it is never packaged into the image.
    pub unpacked_marker: PathBuf,
    /// Marker listing the runtime packages installed into the staging tree.
    pub packages_marker: PathBuf,

    /// Baseline kernel config, copied verbatim into the source tree.
    pub baseline_config: PathBuf,
    /// First-party files installed into the staging tree.
    pub payload_dir: PathBuf,
    /// Vendored package-manager source tree.
    pub apk_source: PathBuf,
    /// Package-manager binary produced by the vendored build.
    pub apk_binary: PathBuf,

    /// Exclusive lock taken for the duration of a run.
    pub lock_file: PathBuf,
    /// Persisted per-stage status record.
    pub state_file: PathBuf,
}

impl BuildPaths {
    pub fn new(base_dir: &Path, cfg: &BuildConfig) -> Self {
        let build_dir = base_dir.join("build");
        let downloads = build_dir.join("downloads");
        let kernel_src = build_dir.join(format!("linux-{}", cfg.kernel_version));
        let staging = build_dir.join("staging");
        let out_dir = build_dir.join("out");

        Self {
            base_dir: base_dir.to_path_buf(),
            kernel_archive: downloads.join(cfg.kernel_filename()),
            kernel_manifest: downloads.join("sha256sums.asc"),
            rootfs_archive: downloads.join(cfg.rootfs_filename()),
            rootfs_sha256: downloads.join(format!("{}.sha256", cfg.rootfs_filename())),
            rootfs_sha512: downloads.join(format!("{}.sha512", cfg.rootfs_filename())),
            bzimage: kernel_src.join("arch/x86/boot/bzImage"),
            rootfs_cpio: out_dir.join("rootfs.cpio.gz"),
            flat_image: out_dir.join("bootforge.img"),
            unpacked_marker: build_dir.join(".rootfs-unpacked"),
            packages_marker: build_dir.join(".packages-installed"),
            baseline_config: base_dir.join("conf/kernel.config"),
            payload_dir: base_dir.join("payload"),
            apk_source: base_dir.join("vendor/apk-tools"),
            apk_binary: base_dir.join("vendor/apk-tools/src/apk"),
            lock_file: build_dir.join(".lock"),
            state_file: build_dir.join("state.json"),
            build_dir,
            downloads,
            kernel_src,
            staging,
            out_dir,
        }
    }
}
