use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::sandbox::limits::ResourceLimits;

/// Lifecycle of a single execution job.
///
/// ```text
/// Created -> Validated -> Running -> Completed | TimedOut | ResourceExceeded | RuntimeError
///            Validated -> Rejected
/// Created | Validated -> CrashedOnSetup
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Validated,
    Running,
    Completed,
    TimedOut,
    ResourceExceeded,
    RuntimeError,
    Rejected,
    CrashedOnSetup,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Validated)
                | (Created, CrashedOnSetup)
                | (Validated, Running)
                | (Validated, Rejected)
                | (Validated, CrashedOnSetup)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, ResourceExceeded)
                | (Running, RuntimeError)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Validated | Self::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Validated => "validated",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ResourceExceeded => "resource_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::Rejected => "rejected",
            Self::CrashedOnSetup => "crashed_on_setup",
        };
        f.write_str(name)
    }
}

/// One submitted piece of code and its limits.
#[derive(Debug)]
pub struct ExecutionJob {
    pub id: Uuid,
    pub code: String,
    pub limits: ResourceLimits,
    state: JobState,
}

impl ExecutionJob {
    pub fn new(code: String, limits: ResourceLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            limits,
            state: JobState::Created,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {}",
            self.state,
            next
        );
        trace!(job_id = %self.id, from = %self.state, to = %next, "Job transition");
        self.state = next;
    }
}

/// Private working directory for one job. Removed by [`JobWorkspace::remove`],
/// or synchronously when dropped.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    source_path: PathBuf,
}

impl JobWorkspace {
    /// Create a fresh directory under `root` (or the system temp dir) and
    /// write the source file into it.
    pub async fn create(
        root: Option<&Path>,
        job_id: &Uuid,
        file_name: &str,
        code: &str,
    ) -> Result<Self> {
        let prefix = format!("voxcode-{}-", &job_id.simple().to_string()[..8]);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let source_path = dir.path().join(file_name);
        tokio::fs::write(&source_path, code).await?;

        // Readable by the unprivileged user the container backend runs as
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).await?;
            tokio::fs::set_permissions(&source_path, std::fs::Permissions::from_mode(0o644))
                .await?;
        }

        debug!(job_id = %job_id, path = %dir.path().display(), "Created job workspace");

        Ok(Self { dir, source_path })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Delete the directory on the blocking pool.
    pub async fn remove(self) {
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "Removed job workspace"),
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Failed to remove job workspace")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Workspace removal task failed"),
        }
    }
}
