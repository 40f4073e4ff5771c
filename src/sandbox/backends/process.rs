use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, VoxError};
use crate::sandbox::limits::apply_rlimits;
use crate::sandbox::traits::{IsolationBackend, IsolationCapabilities, JobSpec};

/// Search path handed to jobs instead of the service's own PATH
pub(crate) const JOB_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Plain subprocess backend.
///
/// Runs the interpreter directly on the host inside the job directory with
/// a scrubbed environment and rlimits. It provides no filesystem or network
/// isolation and is meant for development or hosts where neither bwrap nor
/// docker is installed. `max_processes` becomes RLIMIT_NPROC, which counts
/// every process of the service's user, not only the job's.
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an interpreter name to an absolute path on the host.
pub(crate) fn resolve_interpreter(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| VoxError::BackendNotAvailable {
        backend: "interpreter".to_string(),
        reason: format!("'{}' not found on PATH: {}", program, e),
    })
}

#[async_trait]
impl IsolationBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn capabilities(&self) -> IsolationCapabilities {
        IsolationCapabilities::default()
    }

    fn command(&self, spec: &JobSpec<'_>) -> Result<Command> {
        let program = resolve_interpreter(&spec.interpreter.program)?;

        let mut cmd = Command::new(program);
        cmd.args(&spec.interpreter.args);
        cmd.arg(spec.source_file);
        cmd.current_dir(spec.workdir);

        cmd.env_clear();
        cmd.env("PATH", JOB_PATH);
        cmd.env("HOME", spec.workdir);
        cmd.env("TMPDIR", spec.workdir);
        cmd.env("LANG", "C.UTF-8");

        apply_rlimits(&mut cmd, spec.limits);

        Ok(cmd)
    }
}
