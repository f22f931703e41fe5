//! Stage tracking and idempotency sentinels.
//!
//! Each expensive stage is guarded by a sentinel: a file or directory whose
//! presence certifies the stage already completed. Stages with no natural
//! completion signal (unpacking into a pre-existing tree, package installs)
//! use dedicated marker files created only after the work finished, so a
//! partial run never leaves a false positive. [`sentinels`] is the full
//! registry; [`write_state`] persists it as JSON so tests assert on stage
//! status directly instead of inferring it from filesystem side effects.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::BuildPaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Complete,
}

/// A stage-completion sentinel: its path and the invariant it certifies.
#[derive(Debug, Clone)]
pub struct Sentinel {
    pub name: &'static str,
    pub path: PathBuf,
    /// What a present sentinel guarantees about the build tree.
    pub certifies: &'static str,
}

impl Sentinel {
    pub fn status(&self) -> StageStatus {
        if self.path.exists() {
            StageStatus::Complete
        } else {
            StageStatus::Pending
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == StageStatus::Complete
    }
}

/// Every sentinel the pipeline relies on, in stage order.
pub fn sentinels(paths: &BuildPaths) -> Vec<Sentinel> {
    vec![
        Sentinel {
            name: "download-kernel",
            path: paths.kernel_archive.clone(),
            certifies: "kernel source archive downloaded and renamed into the cache",
        },
        Sentinel {
            name: "download-rootfs",
            path: paths.rootfs_archive.clone(),
            certifies: "minirootfs archive downloaded and renamed into the cache",
        },
        Sentinel {
            name: "kernel-unpacked",
            path: paths.kernel_src.join("Makefile"),
            certifies: "kernel source tree extracted from the verified archive",
        },
        Sentinel {
            name: "kernel-built",
            path: paths.bzimage.clone(),
            certifies: "boot image compiled from the seeded baseline config",
        },
        Sentinel {
            name: "rootfs-unpacked",
            path: paths.unpacked_marker.clone(),
            certifies: "minirootfs base archive unpacked into the staging tree",
        },
        Sentinel {
            name: "apk-built",
            path: paths.apk_binary.clone(),
            certifies: "package manager binary compiled from the vendored tree",
        },
        Sentinel {
            name: "packages-installed",
            path: paths.packages_marker.clone(),
            certifies: "runtime package set installed into the staging root",
        },
        Sentinel {
            name: "modules-installed",
            path: paths.staging.join("lib/modules"),
            certifies: "kernel modules installed into the staging tree",
        },
        Sentinel {
            name: "tree-packed",
            path: paths.rootfs_cpio.clone(),
            certifies: "staging tree serialized and compressed",
        },
        Sentinel {
            name: "image-written",
            path: paths.flat_image.clone(),
            certifies: "flat boot image concatenated from kernel and tree",
        },
    ]
}

/// Create a marker file certifying a stage with no natural output.
pub fn mark(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"").with_context(|| format!("writing marker {}", path.display()))
}

#[derive(Serialize)]
struct StateRecord<'a> {
    name: &'a str,
    status: StageStatus,
    sentinel: String,
    certifies: &'a str,
}

/// Persist the per-stage status record to `build/state.json`.
pub fn write_state(paths: &BuildPaths) -> Result<()> {
    let all = sentinels(paths);
    let records: Vec<StateRecord> = all
        .iter()
        .map(|s| StateRecord {
            name: s.name,
            status: s.status(),
            sentinel: s.path.display().to_string(),
            certifies: s.certifies,
        })
        .collect();

    let json = serde_json::to_string_pretty(&records).context("serializing stage state")?;
    fs::create_dir_all(&paths.build_dir)?;
    fs::write(&paths.state_file, json)
        .with_context(|| format!("writing {}", paths.state_file.display()))
}

/// Remove every derived artifact and sentinel, forcing the next run to
/// re-download, re-verify, and rebuild from scratch.
pub fn clean(paths: &BuildPaths) -> Result<()> {
    if paths.build_dir.exists() {
        println!("  Removing {}", paths.build_dir.display());
        fs::remove_dir_all(&paths.build_dir)
            .with_context(|| format!("removing {}", paths.build_dir.display()))?;
    }
    if paths.apk_binary.exists() {
        println!("  Removing {}", paths.apk_binary.display());
        fs::remove_file(&paths.apk_binary)
            .with_context(|| format!("removing {}", paths.apk_binary.display()))?;
    }
    Ok(())
}
