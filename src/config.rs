//! Build configuration.
//!
//! A [`BuildConfig`] is constructed once at startup and passed into every
//! stage. No stage reads the ambient environment; the two version overrides
//! are resolved in [`BuildConfig::from_env`], called from the CLI entry
//! point only.

/// Pinned kernel release, overridable via `KERNEL_VERSION`.
pub const DEFAULT_KERNEL_VERSION: &str = "6.6.58";

/// Pinned Alpine minirootfs release, overridable via `ALPINE_VERSION`.
pub const DEFAULT_ALPINE_VERSION: &str = "3.20.3";

/// Packages always installed into the staging tree.
pub const BASE_PACKAGES: &[&str] = &[
    "alpine-baselayout",
    "busybox",
    "musl",
    "ca-certificates-bundle",
];

/// Interpreter/runtime packages added behind `--extra-packages`.
pub const EXTRA_PACKAGES: &[&str] = &["python3", "py3-pip"];

/// Immutable configuration for a single pipeline run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub kernel_version: String,
    pub alpine_version: String,
    /// Extend the runtime package set with [`EXTRA_PACKAGES`].
    pub extra_packages: bool,
    /// Remove all derived artifacts before building.
    pub clean: bool,
    /// Boot the result under QEMU after packaging.
    pub smoke_test: bool,
}

impl BuildConfig {
    /// Build a config from explicit versions (used by tests).
    pub fn new(
        kernel_version: &str,
        alpine_version: &str,
        extra_packages: bool,
        clean: bool,
        smoke_test: bool,
    ) -> Self {
        Self {
            kernel_version: kernel_version.to_string(),
            alpine_version: alpine_version.to_string(),
            extra_packages,
            clean,
            smoke_test,
        }
    }

    /// Resolve version overrides from the environment. The only place the
    /// pipeline touches ambient environment variables.
    pub fn from_env(extra_packages: bool, clean: bool, smoke_test: bool) -> Self {
        let kernel_version =
            std::env::var("KERNEL_VERSION").unwrap_or_else(|_| DEFAULT_KERNEL_VERSION.to_string());
        let alpine_version =
            std::env::var("ALPINE_VERSION").unwrap_or_else(|_| DEFAULT_ALPINE_VERSION.to_string());
        Self {
            kernel_version,
            alpine_version,
            extra_packages,
            clean,
            smoke_test,
        }
    }

    /// Filename of the kernel source tarball, e.g. `linux-6.6.58.tar.xz`.
    pub fn kernel_filename(&self) -> String {
        format!("linux-{}.tar.xz", self.kernel_version)
    }

    /// kernel.org release directory for this kernel's major series.
    pub fn kernel_dir_url(&self) -> String {
        let major = self.kernel_version.split('.').next().unwrap_or("6");
        format!("https://cdn.kernel.org/pub/linux/kernel/v{}.x", major)
    }

    pub fn kernel_url(&self) -> String {
        format!("{}/{}", self.kernel_dir_url(), self.kernel_filename())
    }

    /// Checksum manifest covering every tarball in the release directory.
    pub fn kernel_manifest_url(&self) -> String {
        format!("{}/sha256sums.asc", self.kernel_dir_url())
    }

    /// Alpine release branch, e.g. `v3.20` for version `3.20.3`.
    pub fn alpine_branch(&self) -> String {
        let mut parts = self.alpine_version.split('.');
        match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("v{}.{}", major, minor),
            _ => format!("v{}", self.alpine_version),
        }
    }

    /// Filename of the minirootfs archive.
    pub fn rootfs_filename(&self) -> String {
        format!("alpine-minirootfs-{}-x86_64.tar.gz", self.alpine_version)
    }

    pub fn rootfs_url(&self) -> String {
        format!(
            "https://dl-cdn.alpinelinux.org/alpine/{}/releases/x86_64/{}",
            self.alpine_branch(),
            self.rootfs_filename()
        )
    }

    /// Repository the package manager installs from.
    pub fn repository_url(&self) -> String {
        format!(
            "https://dl-cdn.alpinelinux.org/alpine/{}/main",
            self.alpine_branch()
        )
    }

    /// Runtime package set: the base set, plus the extended set when the
    /// flag is on. The base set is always a subset of the result.
    pub fn runtime_packages(&self) -> Vec<&'static str> {
        let mut packages: Vec<&'static str> = BASE_PACKAGES.to_vec();
        if self.extra_packages {
            packages.extend_from_slice(EXTRA_PACKAGES);
        }
        packages
    }
}
