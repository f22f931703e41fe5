use anyhow::{bail, Context, Result};

use bootforge::config::BuildConfig;
use bootforge::pipeline;
use bootforge::process::HostRunner;

fn usage() -> &'static str {
    "Usage: bootforge [--extra-packages] [--clean] [--smoke-test]\n\
     \n\
     Flags (order-independent):\n\
       --extra-packages   install the extended interpreter package set\n\
       --clean            remove all derived artifacts before building\n\
       --smoke-test       boot the result under QEMU after packaging\n\
     \n\
     Environment overrides:\n\
       KERNEL_VERSION     kernel release to build (default pinned)\n\
       ALPINE_VERSION     Alpine minirootfs release (default pinned)"
}

fn main() -> Result<()> {
    let mut extra_packages = false;
    let mut clean = false;
    let mut smoke_test = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--extra-packages" => extra_packages = true,
            "--clean" => clean = true,
            "--smoke-test" => smoke_test = true,
            "-h" | "--help" => {
                println!("{}", usage());
                return Ok(());
            }
            other => bail!("unknown argument '{}'\n\n{}", other, usage()),
        }
    }

    let cfg = BuildConfig::from_env(extra_packages, clean, smoke_test);
    let base_dir = std::env::current_dir().context("resolving current directory")?;
    pipeline::run(&cfg, &base_dir, &HostRunner)
}
