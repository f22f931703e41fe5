//! Staging-tree file operations.
//!
//! Small primitives used when installing files into the future filesystem
//! contents of the image. All of them create missing parent directories.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Copy `src` to `dest` with the given permission mode.
pub fn install_file(src: &Path, dest: &Path, mode: u32) -> Result<()> {
    if !src.exists() {
        bail!("file not found: {}", src.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)
        .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
    fs::set_permissions(dest, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode {:o} on {}", mode, dest.display()))?;
    Ok(())
}

/// Create a symlink at `link` (relative to the staging root) pointing at
/// `target`. An existing entry is replaced; later installs take precedence,
/// which matters for the /init entry point.
pub fn symlink(staging: &Path, link: &str, target: &str) -> Result<()> {
    let link_path = staging.join(link);
    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if link_path.is_symlink() || link_path.exists() {
        fs::remove_file(&link_path)?;
    }
    std::os::unix::fs::symlink(target, &link_path)
        .with_context(|| format!("linking {} -> {}", link_path.display(), target))?;
    Ok(())
}
