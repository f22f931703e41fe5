//! External process invocation.
//!
//! Every external tool the pipeline consumes (make, tar, cpio, apk, qemu)
//! runs through [`CommandRunner`], so tests substitute a fake that records
//! invocations and returns canned exit codes instead of compiling anything.
//! Tool output goes straight to the operator's terminal; a non-zero exit is
//! fatal and never retried.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Builder for an external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Message prefixed to the failure error when the command exits non-zero.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// The command line as a single display string.
    pub fn rendered(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Execute through `runner`; non-zero exit becomes an error carrying the
    /// command line and status.
    pub fn run(&self, runner: &dyn CommandRunner) -> Result<()> {
        let code = runner.run(self)?;
        if code != 0 {
            let what = self.error_msg.as_deref().unwrap_or("command failed");
            bail!("{}: `{}` exited with status {}", what, self.rendered(), code);
        }
        Ok(())
    }
}

/// Spawns a [`Cmd`] and reports its exit code.
pub trait CommandRunner {
    fn run(&self, cmd: &Cmd) -> Result<i32>;
}

/// Runs commands on the host with inherited stdio, so external tool output
/// reaches the operator verbatim.
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, cmd: &Cmd) -> Result<i32> {
        let mut command = Command::new(cmd.program());
        command.args(&cmd.args);
        if let Some(dir) = cmd.cwd() {
            command.current_dir(dir);
        }
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("failed to spawn `{}`", cmd.rendered()))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Run a shell pipeline (e.g. cpio | gzip) through the runner.
pub fn shell(runner: &dyn CommandRunner, script: &str, error_msg: &str) -> Result<()> {
    Cmd::new("sh")
        .arg("-c")
        .arg(script)
        .error_msg(error_msg)
        .run(runner)
}

/// Precondition check: fail with a diagnostic naming the missing path
/// before any dependent work is attempted.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at {}", what, path.display());
    }
    Ok(())
}
