//! Build orchestrator for a minimal bootable Linux image.
//!
//! bootforge fetches a kernel source tree and an Alpine minirootfs, verifies
//! both against upstream checksum manifests, compiles the kernel, assembles
//! a staging root filesystem (packages plus a first-party console assistant),
//! and packages everything into one flat bootable blob for QEMU.
//!
//! # Architecture
//!
//! ```text
//! fetch ──▶ verify ──▶ kernel build ──┐
//!                 │                   ├──▶ image packaging ──▶ smoke test
//!                 └──▶ rootfs stage ──┘
//! ```
//!
//! Every expensive stage is guarded by a sentinel (see [`stage`]) so a
//! re-run skips completed work; `--clean` removes all derived state. All
//! external tools (make, tar, cpio, apk, qemu) are invoked through the
//! [`process::CommandRunner`] trait so the test suite substitutes a fake
//! that records invocations instead of compiling anything.

pub mod config;
pub mod fetch;
pub mod fsops;
pub mod image;
pub mod kernel;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod rootfs;
pub mod stage;
pub mod verify;

pub use config::BuildConfig;
pub use paths::BuildPaths;
pub use process::{CommandRunner, HostRunner};
