//! Root filesystem assembly.
//!
//! Unpacks the verified minirootfs into the staging tree, builds and
//! installs the package manager from its vendored source, installs the
//! runtime package set, and lays down the first-party payload: the console
//! assistant, the startup hook wired as /init, the log directory, and the
//! message of the day.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;

use crate::config::BuildConfig;
use crate::fsops;
use crate::paths::BuildPaths;
use crate::process::{ensure_exists, Cmd, CommandRunner};
use crate::stage;

/// Where the assistant and startup hook land inside the tree.
const ASSISTANT_PATH: &str = "usr/local/bin/assistant";
const STARTUP_PATH: &str = "usr/local/bin/startup";
const LOG_DIR: &str = "var/log/assistant";

/// Unpack the minirootfs archive into the staging tree exactly once.
///
/// The tree itself may survive a partial previous run, so completion is
/// tracked by a dedicated marker outside the tree rather than by the
/// tree's existence.
pub fn unpack_base(paths: &BuildPaths) -> Result<()> {
    if paths.unpacked_marker.exists() {
        println!("  [SKIP] minirootfs already unpacked");
        return Ok(());
    }
    ensure_exists(&paths.rootfs_archive, "minirootfs archive")?;
    fs::create_dir_all(&paths.staging)
        .with_context(|| format!("creating staging tree {}", paths.staging.display()))?;

    println!(
        "  Unpacking {} into {}...",
        paths.rootfs_archive.display(),
        paths.staging.display()
    );
    let file = File::open(&paths.rootfs_archive)
        .with_context(|| format!("opening {}", paths.rootfs_archive.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive
        .unpack(&paths.staging)
        .with_context(|| format!("unpacking into {}", paths.staging.display()))?;

    stage::mark(&paths.unpacked_marker)
}

/// Build (or reuse) the package-manager binary from the vendored source
/// tree and install it into the staging tree.
pub fn build_apk_tools(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    if paths.apk_binary.exists() {
        println!("  [SKIP] apk already built");
    } else {
        ensure_exists(
            &paths.apk_source,
            "vendored apk-tools source (fetch it with: git submodule update --init vendor/apk-tools)",
        )?;
        println!("  Building apk-tools...");
        Cmd::new("make")
            .arg("-C")
            .arg(paths.apk_source.to_string_lossy())
            .error_msg("apk-tools build failed")
            .run(runner)?;
        if !paths.apk_binary.exists() {
            bail!(
                "apk-tools build finished but no binary at {}",
                paths.apk_binary.display()
            );
        }
    }

    fsops::install_file(&paths.apk_binary, &paths.staging.join("sbin/apk"), 0o755)
}

/// Install the runtime package set into the staging root.
///
/// The set is the union of the mandatory base packages and, when the flag
/// is on, the extended interpreter packages. A package install leaves no
/// single natural completion signal, so the marker records the set that was
/// installed; a later run asking for packages the marker does not list
/// re-invokes the package manager (apk add is idempotent for the overlap).
pub fn install_packages(
    cfg: &BuildConfig,
    paths: &BuildPaths,
    runner: &dyn CommandRunner,
) -> Result<()> {
    let packages = cfg.runtime_packages();
    if installed_set_covers(&paths.packages_marker, &packages)? {
        println!("  [SKIP] packages already installed");
        return Ok(());
    }
    ensure_exists(&paths.apk_binary, "package manager binary")?;

    println!("  Installing {} packages into the staging root...", packages.len());
    Cmd::new(paths.apk_binary.to_string_lossy())
        .arg("--root")
        .arg(paths.staging.to_string_lossy())
        .arg("--repository")
        .arg(cfg.repository_url())
        .arg("--initdb")
        .arg("--allow-untrusted")
        .arg("add")
        .args(packages.clone())
        .error_msg("package install failed")
        .run(runner)?;

    if let Some(parent) = paths.packages_marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&paths.packages_marker, packages.join("\n") + "\n")
        .with_context(|| format!("writing marker {}", paths.packages_marker.display()))
}

/// Whether the marker exists and lists every requested package.
fn installed_set_covers(marker: &std::path::Path, requested: &[&str]) -> Result<bool> {
    if !marker.exists() {
        return Ok(false);
    }
    let recorded = fs::read_to_string(marker)
        .with_context(|| format!("reading marker {}", marker.display()))?;
    let installed: Vec<&str> = recorded.lines().map(str::trim).collect();
    Ok(requested.iter().all(|p| installed.contains(p)))
}

/// Install first-party files into fixed locations inside the tree.
///
/// Idempotent by construction: re-copying and re-linking the same content
/// needs no sentinel.
pub fn install_payload(paths: &BuildPaths) -> Result<()> {
    ensure_exists(&paths.payload_dir, "payload directory")?;
    let assistant = paths.payload_dir.join("assistant");
    let startup = paths.payload_dir.join("startup");
    let motd = paths.payload_dir.join("motd");

    fsops::install_file(&assistant, &paths.staging.join(ASSISTANT_PATH), 0o755)?;
    fsops::install_file(&startup, &paths.staging.join(STARTUP_PATH), 0o755)?;

    // Process-1 entry point: early boot looks for /init at the tree root.
    fsops::symlink(&paths.staging, "init", STARTUP_PATH)?;

    fs::create_dir_all(paths.staging.join(LOG_DIR))
        .with_context(|| format!("creating log directory {}", LOG_DIR))?;
    fsops::install_file(&motd, &paths.staging.join("etc/motd"), 0o644)?;

    println!("  Installed assistant payload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::process::fake::FakeRunner;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn temp_paths(temp: &TempDir, extra: bool) -> (BuildConfig, BuildPaths) {
        let cfg = BuildConfig::new("6.6.58", "3.20.3", extra, false, false);
        let paths = BuildPaths::new(temp.path(), &cfg);
        (cfg, paths)
    }

    fn write_minirootfs(paths: &BuildPaths) {
        fs::create_dir_all(&paths.downloads).unwrap();
        let file = File::create(&paths.rootfs_archive).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_path("etc/alpine-release").unwrap();
        header.set_size(7);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"3.20.3\n"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_payload(paths: &BuildPaths) {
        fs::create_dir_all(&paths.payload_dir).unwrap();
        fs::write(paths.payload_dir.join("assistant"), "#!/bin/sh\n").unwrap();
        fs::write(paths.payload_dir.join("startup"), "#!/bin/sh\n").unwrap();
        fs::write(paths.payload_dir.join("motd"), "welcome\n").unwrap();
    }

    #[test]
    fn test_unpack_base_extracts_and_marks() {
        let temp = TempDir::new().unwrap();
        let (_cfg, paths) = temp_paths(&temp, false);
        write_minirootfs(&paths);

        unpack_base(&paths).unwrap();

        assert!(paths.staging.join("etc/alpine-release").exists());
        assert!(paths.unpacked_marker.exists());
    }

    #[test]
    fn test_unpack_base_runs_once() {
        let temp = TempDir::new().unwrap();
        let (_cfg, paths) = temp_paths(&temp, false);
        write_minirootfs(&paths);

        unpack_base(&paths).unwrap();
        // Remove the extracted file; the marker must keep the second call
        // from unpacking again.
        fs::remove_file(paths.staging.join("etc/alpine-release")).unwrap();
        unpack_base(&paths).unwrap();
        assert!(!paths.staging.join("etc/alpine-release").exists());
    }

    #[test]
    fn test_build_apk_tools_missing_vendor_tree() {
        let temp = TempDir::new().unwrap();
        let (_cfg, paths) = temp_paths(&temp, false);

        let runner = FakeRunner::default();
        let err = build_apk_tools(&paths, &runner).unwrap_err();
        assert!(err.to_string().contains("vendor/apk-tools"));
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_build_apk_tools_reuses_prebuilt_binary() {
        let temp = TempDir::new().unwrap();
        let (_cfg, paths) = temp_paths(&temp, false);
        fs::create_dir_all(paths.apk_binary.parent().unwrap()).unwrap();
        fs::write(&paths.apk_binary, b"elf").unwrap();

        let runner = FakeRunner::default();
        build_apk_tools(&paths, &runner).unwrap();

        assert_eq!(runner.call_count(), 0);
        let installed = paths.staging.join("sbin/apk");
        assert!(installed.exists());
        let mode = fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_install_packages_includes_extras_when_flagged() {
        let temp = TempDir::new().unwrap();
        let (cfg, paths) = temp_paths(&temp, true);
        fs::create_dir_all(paths.apk_binary.parent().unwrap()).unwrap();
        fs::write(&paths.apk_binary, b"elf").unwrap();

        let runner = FakeRunner::default();
        install_packages(&cfg, &paths, &runner).unwrap();

        assert!(runner.ran("--root"));
        assert!(runner.ran("--allow-untrusted add"));
        assert!(runner.ran("busybox"));
        assert!(runner.ran("python3"));
        assert!(paths.packages_marker.exists());
    }

    #[test]
    fn test_install_packages_base_set_without_flag() {
        let temp = TempDir::new().unwrap();
        let (cfg, paths) = temp_paths(&temp, false);
        fs::create_dir_all(paths.apk_binary.parent().unwrap()).unwrap();
        fs::write(&paths.apk_binary, b"elf").unwrap();

        let runner = FakeRunner::default();
        install_packages(&cfg, &paths, &runner).unwrap();

        assert!(runner.ran("busybox"));
        assert!(!runner.ran("python3"));
    }

    #[test]
    fn test_install_packages_skips_when_set_already_covered() {
        let temp = TempDir::new().unwrap();
        let (cfg, paths) = temp_paths(&temp, false);
        fs::create_dir_all(paths.packages_marker.parent().unwrap()).unwrap();
        fs::write(
            &paths.packages_marker,
            cfg.runtime_packages().join("\n") + "\n",
        )
        .unwrap();

        let runner = FakeRunner::default();
        install_packages(&cfg, &paths, &runner).unwrap();
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_install_packages_reruns_when_extras_added_later() {
        let temp = TempDir::new().unwrap();
        let (base_cfg, paths) = temp_paths(&temp, false);
        fs::create_dir_all(paths.apk_binary.parent().unwrap()).unwrap();
        fs::write(&paths.apk_binary, b"elf").unwrap();

        // First run installs the base set and records it in the marker.
        let runner = FakeRunner::default();
        install_packages(&base_cfg, &paths, &runner).unwrap();
        assert_eq!(runner.call_count(), 1);

        // A later run asking for the extended set must not be satisfied by
        // the base-set marker.
        let extended_cfg = BuildConfig::new("6.6.58", "3.20.3", true, false, false);
        let runner = FakeRunner::default();
        install_packages(&extended_cfg, &paths, &runner).unwrap();
        assert_eq!(runner.call_count(), 1);
        assert!(runner.ran("python3"));

        // The marker now covers the extended set; a repeat run skips.
        let runner = FakeRunner::default();
        install_packages(&extended_cfg, &paths, &runner).unwrap();
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_install_payload_layout() {
        let temp = TempDir::new().unwrap();
        let (_cfg, paths) = temp_paths(&temp, false);
        write_payload(&paths);
        fs::create_dir_all(&paths.staging).unwrap();

        install_payload(&paths).unwrap();

        let assistant = paths.staging.join(ASSISTANT_PATH);
        assert!(assistant.exists());
        let mode = fs::metadata(&assistant).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let init = paths.staging.join("init");
        assert!(init.is_symlink());
        assert_eq!(
            fs::read_link(&init).unwrap().to_str().unwrap(),
            STARTUP_PATH
        );

        assert!(paths.staging.join(LOG_DIR).is_dir());
        assert_eq!(
            fs::read_to_string(paths.staging.join("etc/motd")).unwrap(),
            "welcome\n"
        );
    }
}
