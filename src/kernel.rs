//! Kernel build stage.
//!
//! The kernel build system is a black box: we seed a configuration file,
//! ask for a parallel build, and ask for modules to be installed into the
//! staging tree. Build failures are deterministic for fixed inputs, so they
//! are fatal and never retried; the tool's own output reaches the operator
//! verbatim through the inherited stdio of the command runner.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::paths::BuildPaths;
use crate::process::{ensure_exists, Cmd, CommandRunner};

/// Extract the verified kernel source archive into the build directory.
///
/// Sentinel: `Makefile` inside the versioned source tree.
pub fn unpack_source(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    let makefile = paths.kernel_src.join("Makefile");
    if makefile.exists() {
        println!("  [SKIP] kernel source already unpacked");
        return Ok(());
    }
    ensure_exists(&paths.kernel_archive, "kernel source archive")?;
    fs::create_dir_all(&paths.build_dir)
        .with_context(|| format!("creating {}", paths.build_dir.display()))?;

    println!("  Unpacking {}...", paths.kernel_archive.display());
    Cmd::new("tar")
        .arg("-xJf")
        .arg(paths.kernel_archive.to_string_lossy())
        .arg("-C")
        .arg(paths.build_dir.to_string_lossy())
        .error_msg("kernel source extraction failed")
        .run(runner)?;

    if !makefile.exists() {
        bail!(
            "extraction finished but no Makefile at {}",
            makefile.display()
        );
    }
    Ok(())
}

/// Build the boot image and modules with all available processing units.
///
/// Seeds `.config` verbatim from the baseline when the tree has none; the
/// pipeline never edits the file afterwards (manual tuning is an
/// out-of-band action). Sentinel: the bzImage.
pub fn build(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    ensure_exists(&paths.kernel_src, "kernel source tree")?;
    seed_config(paths)?;

    if paths.bzimage.exists() {
        println!("  [SKIP] kernel already built");
        return Ok(());
    }

    let cpus = match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            eprintln!("  [WARN] could not detect CPU count ({}), using 4", e);
            4
        }
    };

    println!("  Building kernel with -j{}...", cpus);
    Cmd::new("make")
        .arg("-C")
        .arg(paths.kernel_src.to_string_lossy())
        .arg(format!("-j{}", cpus))
        .error_msg("kernel build failed")
        .run(runner)?;

    if !paths.bzimage.exists() {
        bail!(
            "kernel build finished but no boot image at {}",
            paths.bzimage.display()
        );
    }
    Ok(())
}

/// Install kernel modules into the staging tree.
///
/// Sentinel: `lib/modules` inside the staging tree.
pub fn install_modules(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    let modules_dir = paths.staging.join("lib/modules");
    if modules_dir.exists() {
        println!("  [SKIP] modules already installed");
        return Ok(());
    }
    ensure_exists(&paths.kernel_src, "kernel source tree")?;
    fs::create_dir_all(&paths.staging)?;

    println!("  Installing modules into {}...", paths.staging.display());
    Cmd::new("make")
        .arg("-C")
        .arg(paths.kernel_src.to_string_lossy())
        .arg(format!("INSTALL_MOD_PATH={}", paths.staging.display()))
        .arg("modules_install")
        .error_msg("module install failed")
        .run(runner)?;

    let count = count_modules(&modules_dir);
    println!("  Installed {} kernel modules", count);
    Ok(())
}

fn count_modules(modules_dir: &Path) -> usize {
    walkdir::WalkDir::new(modules_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "ko" || ext == "xz" || ext == "gz" || ext == "zst")
                .unwrap_or(false)
        })
        .count()
}

/// Seed `.config` from the baseline if the source tree has none.
fn seed_config(paths: &BuildPaths) -> Result<()> {
    let dot_config = paths.kernel_src.join(".config");
    if dot_config.exists() {
        return Ok(());
    }
    ensure_exists(&paths.baseline_config, "baseline kernel config")?;
    fs::copy(&paths.baseline_config, &dot_config).with_context(|| {
        format!(
            "seeding {} from {}",
            dot_config.display(),
            paths.baseline_config.display()
        )
    })?;
    println!("  Seeded .config from {}", paths.baseline_config.display());
    Ok(())
}
