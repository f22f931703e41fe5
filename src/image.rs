//! Image packaging.
//!
//! Serializes the assembled staging tree into a newc cpio stream, gzips it
//! at maximum effort, and concatenates the kernel boot image with the
//! compressed tree into one flat bootable file. The flat image is a
//! convenience packaging, not a self-describing format: the VMM loads the
//! two segments independently, so there is no wrapper and no length prefix.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::paths::BuildPaths;
use crate::process::{ensure_exists, shell, CommandRunner};

/// Image size matters more than packaging time.
const GZIP_LEVEL: u32 = 9;

/// Serialize the staging tree into a compressed cpio archive.
///
/// newc format is what early boot expects; traversal is rooted at the tree
/// root with null-separated names so odd filenames survive.
pub fn build_cpio(paths: &BuildPaths, runner: &dyn CommandRunner) -> Result<()> {
    if paths.rootfs_cpio.exists() {
        println!("  [SKIP] compressed tree already packed");
        return Ok(());
    }
    ensure_exists(&paths.staging, "staging tree")?;
    fs::create_dir_all(&paths.out_dir)
        .with_context(|| format!("creating {}", paths.out_dir.display()))?;

    println!("  Packing {}...", paths.staging.display());
    let script = format!(
        "cd {} && find . -print0 | cpio --null -o -H newc | gzip -{} > {}",
        paths.staging.display(),
        GZIP_LEVEL,
        paths.rootfs_cpio.display()
    );
    shell(runner, &script, "tree packaging failed")
}

/// Concatenate the kernel boot image and the compressed tree, in that
/// order, into `output`. Byte-exact: for inputs of A and B bytes the
/// output is exactly A+B bytes.
pub fn concat_image(kernel_image: &Path, compressed_tree: &Path, output: &Path) -> Result<()> {
    if output.exists() {
        println!("  [SKIP] flat image already written");
        return Ok(());
    }
    ensure_exists(kernel_image, "kernel boot image")?;
    ensure_exists(compressed_tree, "compressed staging tree")?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out =
        File::create(output).with_context(|| format!("creating {}", output.display()))?;
    for part in [kernel_image, compressed_tree] {
        let mut file =
            File::open(part).with_context(|| format!("opening {}", part.display()))?;
        io::copy(&mut file, &mut out)
            .with_context(|| format!("appending {} to {}", part.display(), output.display()))?;
    }
    out.flush()?;

    let size = fs::metadata(output)?.len();
    println!("  Wrote {} ({} bytes)", output.display(), size);
    Ok(())
}
