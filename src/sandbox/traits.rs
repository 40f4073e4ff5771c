use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::types::InterpreterConfig;
use crate::error::Result;
use crate::sandbox::limits::ResourceLimits;
use crate::sandbox::Resource;

/// Containment properties a backend provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsolationCapabilities {
    /// Host filesystem outside the job directory is hidden or read-only
    pub filesystem_isolation: bool,
    /// No network access from inside the job
    pub network_isolation: bool,
    /// Job runs without the service's privileges
    pub privilege_drop: bool,
    /// Memory is capped by the backend itself, not only by RLIMIT_AS
    pub memory_limit: bool,
}

impl IsolationCapabilities {
    pub fn is_isolated(&self) -> bool {
        self.filesystem_isolation && self.network_isolation
    }
}

/// Everything a backend needs to build the command for one job.
#[derive(Debug)]
pub struct JobSpec<'a> {
    pub job_id: &'a Uuid,
    /// Host directory holding the source file
    pub workdir: &'a Path,
    pub source_file: &'a str,
    pub interpreter: &'a InterpreterConfig,
    pub limits: &'a ResourceLimits,
}

/// An isolation mechanism that turns a job into a spawnable command.
///
/// Backends only describe how to launch the interpreter. Spawning,
/// supervision, output capture and teardown are shared by the runner.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Returns the backend name (e.g., "bwrap", "docker")
    fn name(&self) -> &str;

    fn capabilities(&self) -> IsolationCapabilities;

    /// Build the command that runs the job's source file.
    fn command(&self, spec: &JobSpec<'_>) -> Result<Command>;

    /// Free anything the backend created outside the spawned process tree.
    /// Called after every job, including ones that failed to start.
    async fn release(&self, _job_id: &Uuid) -> Result<()> {
        Ok(())
    }

    /// A limit the backend itself saw the job hit, for jobs that otherwise
    /// look like plain failures. Called before `release`.
    async fn exceeded_limit(&self, _job_id: &Uuid) -> Option<Resource> {
        None
    }
}
