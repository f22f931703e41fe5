//! Preflight checks for host tool availability.
//!
//! Validates that the host has the external tools the pipeline invokes
//! before any work starts, so a missing tool fails with one clear message
//! instead of a cryptic error mid-build.

use anyhow::{bail, Result};

/// Tools every run needs. Each tuple is (command, package hint).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("sh", "a POSIX shell"),
    ("make", "make"),
    ("tar", "tar"),
    ("xz", "xz-utils"),
    ("cpio", "cpio"),
    ("gzip", "gzip"),
    ("find", "findutils"),
];

/// Extra tools needed only when the smoke test is requested.
pub const SMOKE_TOOLS: &[(&str, &str)] = &[("qemu-system-x86_64", "qemu-system-x86")];

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available, reporting all missing ones.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();
    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }
    Ok(())
}

/// Validate everything a run will need, including QEMU when the smoke test
/// flag is set.
pub fn check_host_tools(smoke_test: bool) -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)?;
    if smoke_test {
        check_required_tools(SMOKE_TOOLS)?;
    }
    Ok(())
}
