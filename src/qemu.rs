//! Smoke-test boot under QEMU.
//!
//! Boots the kernel image and compressed tree as separate load segments
//! (`-kernel` / `-initrd`), not the concatenated flat file. Serial console
//! only, host stdio attached, no reboot on guest shutdown so the final
//! console state stays visible. Advisory: a failure here surfaces like any
//! other external-tool failure.

use anyhow::Result;

use crate::paths::BuildPaths;
use crate::process::{ensure_exists, Cmd, CommandRunner};

/// Guest memory ceiling in MiB.
const MEMORY_MIB: u32 = 512;

pub fn smoke_test(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    ensure_exists(&paths.bzimage, "kernel boot image")?;
    ensure_exists(&paths.rootfs_cpio, "compressed staging tree")?;

    println!("Booting smoke test (Ctrl-A X exits QEMU)...");
    Cmd::new("qemu-system-x86_64")
        .arg("-kernel")
        .arg(paths.bzimage.to_string_lossy())
        .arg("-initrd")
        .arg(paths.rootfs_cpio.to_string_lossy())
        .args(["-append", "console=ttyS0"])
        .arg("-m")
        .arg(format!("{}M", MEMORY_MIB))
        .args(["-nographic", "-no-reboot"])
        .args(["-serial", "mon:stdio"])
        .error_msg("smoke test boot failed")
        .run(runner)
}
