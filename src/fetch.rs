//! Remote artifact fetching.
//!
//! Downloads are cached by filename and skipped when present. Transport
//! failures are retried a bounded number of times with a fixed delay; a
//! non-success HTTP status is not transient and fails immediately.
//! Completed downloads are written to a `.part` file and renamed into
//! place, so an interrupted transfer never satisfies the cache check.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Download `url` to `dest`, skipping when the file is already cached.
pub fn fetch(url: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        println!("  [SKIP] {} already downloaded", dest.display());
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating download directory {}", parent.display()))?;
    }

    let part = part_path(dest);
    let bytes = get_with_retry(url, &part)?;
    fs::rename(&part, dest)
        .with_context(|| format!("renaming {} into place", part.display()))?;

    println!("  Downloaded {} ({} bytes)", dest.display(), bytes);
    Ok(())
}

/// Fetch a checksum manifest to `dest` and return its contents. The cached
/// copy is reused, so a repeat run performs zero network calls.
pub fn fetch_text(url: &str, dest: &Path) -> Result<String> {
    fetch(url, dest)?;
    fs::read_to_string(dest).with_context(|| format!("reading manifest {}", dest.display()))
}

/// Temporary name a download is written to before the atomic rename.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` into `part`, returning the byte count. The body is never
/// buffered whole; the kernel tarball runs to hundreds of megabytes.
fn get_with_retry(url: &str, part: &Path) -> Result<u64> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let mut last_err = String::new();
    for attempt in 1..=ATTEMPTS {
        match stream_once(&client, url, part) {
            Ok(Some(bytes)) => return Ok(bytes),
            Ok(None) => bail!("GET {} returned a non-success status", url),
            Err(e) => {
                eprintln!(
                    "  [WARN] attempt {}/{} for {} failed: {}",
                    attempt, ATTEMPTS, url, e
                );
                last_err = e.to_string();
                if attempt < ATTEMPTS {
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }
    bail!("GET {} failed after {} attempts: {}", url, ATTEMPTS, last_err)
}

/// One transfer attempt. `Ok(None)` means the server answered with a
/// non-success status, which is not transient and must not be retried.
fn stream_once(
    client: &reqwest::blocking::Client,
    url: &str,
    part: &Path,
) -> Result<Option<u64>> {
    let mut res = client.get(url).send()?;
    if !res.status().is_success() {
        eprintln!("  [WARN] GET {} returned status {}", url, res.status());
        return Ok(None);
    }
    let mut file = fs::File::create(part)
        .with_context(|| format!("creating {}", part.display()))?;
    let bytes = std::io::copy(&mut res, &mut file)
        .with_context(|| format!("streaming body of {}", url))?;
    Ok(Some(bytes))
}
