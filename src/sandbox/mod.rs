mod backends;
mod capture;
mod factory;
mod job;
mod limits;
mod policy;
mod reaper;
mod runner;
mod traits;

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::VoxError;

pub use backends::{BwrapBackend, DockerBackend, ProcessBackend};
pub use factory::{available_backends, create_backend, BackendInfo};
pub use job::{ExecutionJob, JobState, JobWorkspace};
pub use limits::ResourceLimits;
pub use policy::ExecutionPolicy;
pub use runner::{Sandbox, EMPTY_CODE_MESSAGE};
pub use traits::{IsolationBackend, IsolationCapabilities, JobSpec};

/// A limit the job ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Output,
    CpuTime,
    Memory,
    FileSize,
}

impl Resource {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Output => "output size",
            Self::CpuTime => "CPU time",
            Self::Memory => "memory",
            Self::FileSize => "file size",
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    ResourceExceeded { resource: Resource },
    RuntimeError,
    Rejected { reason: String },
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ResourceExceeded { .. } => "resource_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Result of running one job in the sandbox.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    /// Signal that terminated the process, when it did not exit normally
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    /// Wall-clock budget the job ran under
    pub timeout: Duration,
    pub backend: String,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    /// The error a caller should surface for a failed job.
    pub fn failure(&self) -> Option<VoxError> {
        match &self.status {
            ExecutionStatus::Completed => None,
            ExecutionStatus::TimedOut => Some(VoxError::TimedOut {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            ExecutionStatus::ResourceExceeded { resource } => {
                Some(VoxError::ResourceExceeded(resource.describe().to_string()))
            }
            ExecutionStatus::RuntimeError => {
                let stderr = self.stderr.trim();
                let message = if !stderr.is_empty() {
                    stderr.to_string()
                } else if let Some(code) = self.exit_code {
                    format!("process exited with code {}", code)
                } else if let Some(signal) = self.signal {
                    format!("process was killed by signal {}", signal)
                } else {
                    "process failed".to_string()
                };
                Some(VoxError::RuntimeError(message))
            }
            ExecutionStatus::Rejected { reason } => Some(VoxError::Rejected(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            job_id: Uuid::new_v4(),
            status,
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(12),
            timeout: Duration::from_secs(5),
            backend: "process".to_string(),
        }
    }

    #[test]
    fn test_failure_messages() {
        assert!(result(ExecutionStatus::Completed).failure().is_none());

        let err = result(ExecutionStatus::TimedOut).failure().unwrap();
        assert_eq!(err.to_string(), "Execution timed out (max 5 seconds)");

        let err = result(ExecutionStatus::Rejected {
            reason: "source contains NUL bytes".to_string(),
        })
        .failure()
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Security restriction: source contains NUL bytes"
        );

        let mut failed = result(ExecutionStatus::RuntimeError);
        failed.exit_code = Some(2);
        assert_eq!(
            failed.failure().unwrap().to_string(),
            "Execution failed: process exited with code 2"
        );
        failed.stderr = "NameError: name 'x' is not defined\n".to_string();
        assert_eq!(
            failed.failure().unwrap().to_string(),
            "Execution failed: NameError: name 'x' is not defined"
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(ExecutionStatus::ResourceExceeded {
            resource: Resource::Output,
        })
        .unwrap();
        assert_eq!(json["kind"], "resource_exceeded");
        assert_eq!(json["resource"], "output");
    }
}
