use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::types::BwrapConfig;
use crate::error::{Result, VoxError};
use crate::sandbox::backends::process::{resolve_interpreter, JOB_PATH};
use crate::sandbox::limits::{apply_rlimits, ResourceLimits};
use crate::sandbox::traits::{IsolationBackend, IsolationCapabilities, JobSpec};

/// Mount point of the job directory inside the sandbox
const GUEST_WORKDIR: &str = "/sandbox";

/// Bubblewrap backend (Linux).
///
/// Each job gets fresh user, pid, network, ipc and uts namespaces. The
/// system directories are bound read-only, the job directory is bound
/// read-only at `/sandbox`, and `/tmp` is a private tmpfs.
pub struct BwrapBackend {
    binary: PathBuf,
    ro_binds: Vec<PathBuf>,
}

impl BwrapBackend {
    pub fn new(config: &BwrapConfig) -> Result<Self> {
        let binary = Self::locate(config).ok_or_else(|| VoxError::BackendNotAvailable {
            backend: "bwrap".to_string(),
            reason: "bubblewrap (bwrap) is not installed or cannot create namespaces".to_string(),
        })?;

        Ok(Self {
            binary,
            ro_binds: config.ro_binds.clone(),
        })
    }

    /// Check if bubblewrap is installed and able to create namespaces here.
    pub fn is_available(config: &BwrapConfig) -> bool {
        Self::locate(config).is_some()
    }

    fn locate(config: &BwrapConfig) -> Option<PathBuf> {
        if !cfg!(target_os = "linux") {
            return None;
        }

        let binary = match &config.binary_path {
            Some(path) => path.clone(),
            None => which::which("bwrap").ok()?,
        };

        // Unprivileged user namespaces may be disabled even when bwrap exists
        let works = std::process::Command::new(&binary)
            .args([
                "--unshare-all",
                "--ro-bind",
                "/",
                "/",
                "--",
                "true",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if !works {
            debug!(binary = %binary.display(), "bwrap availability check failed");
        }
        works.then_some(binary)
    }
}

#[async_trait]
impl IsolationBackend for BwrapBackend {
    fn name(&self) -> &str {
        "bwrap"
    }

    fn capabilities(&self) -> IsolationCapabilities {
        IsolationCapabilities {
            filesystem_isolation: true,
            network_isolation: true,
            privilege_drop: true,
            memory_limit: false,
        }
    }

    fn command(&self, spec: &JobSpec<'_>) -> Result<Command> {
        let interpreter = resolve_interpreter(&spec.interpreter.program)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--unshare-all",
            "--die-with-parent",
            "--new-session",
            "--clearenv",
        ]);
        cmd.args(["--setenv", "PATH", JOB_PATH]);
        cmd.args(["--setenv", "HOME", "/tmp"]);
        cmd.args(["--setenv", "TMPDIR", "/tmp"]);
        cmd.args(["--setenv", "LANG", "C.UTF-8"]);

        for bind in &self.ro_binds {
            cmd.arg("--ro-bind-try");
            cmd.arg(bind);
            cmd.arg(bind);
        }

        cmd.args(["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]);
        cmd.arg("--ro-bind");
        cmd.arg(spec.workdir);
        cmd.arg(GUEST_WORKDIR);
        cmd.args(["--chdir", GUEST_WORKDIR]);

        cmd.arg("--");
        cmd.arg(interpreter);
        cmd.args(&spec.interpreter.args);
        cmd.arg(format!("{}/{}", GUEST_WORKDIR, spec.source_file));

        // The host-side cwd only matters for bwrap itself
        cmd.current_dir(spec.workdir);
        cmd.env_clear();

        apply_rlimits(&mut cmd, &rlimits(spec.limits));

        Ok(cmd)
    }
}

/// Limits installed on the bwrap process. RLIMIT_NPROC is per user on the
/// host: with it set, bwrap's own clone into the new namespaces fails as
/// soon as the service's user owns that many processes, so it is left unset.
fn rlimits(limits: &ResourceLimits) -> ResourceLimits {
    ResourceLimits {
        max_processes: None,
        ..limits.clone()
    }
}
