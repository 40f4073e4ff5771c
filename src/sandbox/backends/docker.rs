use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::types::DockerConfig;
use crate::error::{Result, VoxError};
use crate::sandbox::limits::cpu_hard_limit;
use crate::sandbox::traits::{IsolationBackend, IsolationCapabilities, JobSpec};
use crate::sandbox::Resource;

/// Mount point of the job directory inside the container
const GUEST_WORKDIR: &str = "/sandbox";

/// uid:gid of `nobody`
const UNPRIVILEGED_USER: &str = "65534:65534";

/// Docker sandbox backend.
///
/// Every job runs in a fresh container with no network, a read-only root
/// filesystem, all capabilities dropped and an unprivileged user. Limits are
/// passed as container flags instead of rlimits on the docker client. The
/// container is kept after exit so its OOM state can be read, and removed
/// in `release`.
pub struct DockerBackend {
    image: String,
    cpus: f32,
    pids_limit: u64,
}

impl DockerBackend {
    pub fn new(config: &DockerConfig) -> Result<Self> {
        if !Self::is_available() {
            return Err(VoxError::BackendNotAvailable {
                backend: "docker".to_string(),
                reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                    .to_string(),
            });
        }

        info!(image = %config.image, "Docker backend initialized");

        Ok(Self {
            image: config.image.clone(),
            cpus: config.cpus,
            pids_limit: config.pids_limit,
        })
    }

    /// Check if the Docker backend is available on this system.
    ///
    /// Returns true if Docker daemon is accessible.
    pub fn is_available() -> bool {
        match std::process::Command::new("docker")
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// Check if a Docker image exists locally.
    pub async fn image_exists(image: &str) -> bool {
        match Command::new("docker")
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    fn container_name(job_id: &Uuid) -> String {
        format!("voxcode-{}", job_id.simple())
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    fn capabilities(&self) -> IsolationCapabilities {
        IsolationCapabilities {
            filesystem_isolation: true,
            network_isolation: true,
            privilege_drop: true,
            memory_limit: true,
        }
    }

    fn command(&self, spec: &JobSpec<'_>) -> Result<Command> {
        let limits = spec.limits;

        let mut cmd = Command::new("docker");
        cmd.args(["run", "--init"]);
        cmd.args(["--name", &Self::container_name(spec.job_id)]);

        // Network isolation and privilege drop
        cmd.args([
            "--network=none",
            "--read-only",
            "--cap-drop=ALL",
            "--security-opt=no-new-privileges",
        ]);
        cmd.args(["--user", UNPRIVILEGED_USER]);
        cmd.args(["--tmpfs", "/tmp:rw,size=16m"]);

        if let Some(bytes) = limits.memory_bytes {
            cmd.arg(format!("--memory={}b", bytes));
            cmd.arg(format!("--memory-swap={}b", bytes));
        }
        // Counted per container, unlike RLIMIT_NPROC
        cmd.arg(format!(
            "--pids-limit={}",
            limits.max_processes.unwrap_or(self.pids_limit)
        ));
        if let Some(secs) = limits.cpu_seconds {
            cmd.arg(format!("--ulimit=cpu={}:{}", secs, cpu_hard_limit(secs)));
        }
        if let Some(bytes) = limits.max_file_bytes {
            cmd.arg(format!("--ulimit=fsize={}:{}", bytes, bytes));
        }
        cmd.arg(format!("--cpus={}", self.cpus));

        cmd.arg("-v");
        cmd.arg(format!(
            "{}:{}:ro",
            spec.workdir.display(),
            GUEST_WORKDIR
        ));
        cmd.args(["-w", GUEST_WORKDIR]);
        cmd.args(["-e", "HOME=/tmp"]);

        cmd.arg(&self.image);
        cmd.arg(&spec.interpreter.program);
        cmd.args(&spec.interpreter.args);
        cmd.arg(format!("{}/{}", GUEST_WORKDIR, spec.source_file));

        Ok(cmd)
    }

    /// Force-remove the job's container. Killing the docker client does not
    /// stop the container, so this runs after every job.
    async fn release(&self, job_id: &Uuid) -> Result<()> {
        let name = Self::container_name(job_id);

        let output = Command::new("docker")
            .args(["rm", "-f", &name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            debug!(container = %name, "Removed container");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }

        warn!(container = %name, error = %stderr.trim(), "Failed to remove container");
        Err(VoxError::Internal(format!(
            "failed to remove container {}: {}",
            name,
            stderr.trim()
        )))
    }

    /// The kernel OOM killer inside the container looks like any other
    /// SIGKILL from outside; docker records it on the container.
    async fn exceeded_limit(&self, job_id: &Uuid) -> Option<Resource> {
        let name = Self::container_name(job_id);

        let output = Command::new("docker")
            .args(["inspect", "--format", "{{.State.OOMKilled}}", &name])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!(container = %name, "Could not inspect container");
            return None;
        }
        parse_oom_killed(&String::from_utf8_lossy(&output.stdout)).then_some(Resource::Memory)
    }
}

fn parse_oom_killed(inspect_output: &str) -> bool {
    inspect_output.trim() == "true"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{InterpreterConfig, LimitsConfig};
    use crate::sandbox::limits::ResourceLimits;

    #[test]
    fn test_run_flags() {
        let backend = DockerBackend {
            image: "python:3.12-slim".to_string(),
            cpus: 1.0,
            pids_limit: 64,
        };
        let dir = tempfile::tempdir().unwrap();
        let interpreter = InterpreterConfig::default();
        let limits = ResourceLimits::from(&LimitsConfig::default());
        let id = Uuid::new_v4();
        let spec = JobSpec {
            job_id: &id,
            workdir: dir.path(),
            source_file: "main.py",
            interpreter: &interpreter,
            limits: &limits,
        };

        let cmd = backend.command(&spec).unwrap();
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(!args.contains(&"--rm".to_string()));
        for flag in [
            "--network=none",
            "--read-only",
            "--cap-drop=ALL",
            "--pids-limit=64",
            "--ulimit=cpu=5:6",
        ] {
            assert!(args.contains(&flag.to_string()), "missing {}", flag);
        }
        assert!(args.contains(&DockerBackend::container_name(&id)));
        assert!(args.contains(&format!("{}:/sandbox:ro", dir.path().display())));

        let image = args.iter().position(|a| a == "python:3.12-slim").unwrap();
        assert_eq!(&args[image + 1..], ["python3", "-I", "-B", "/sandbox/main.py"]);
    }

    #[test]
    fn test_oom_killed_flag() {
        assert!(parse_oom_killed("true\n"));
        assert!(!parse_oom_killed("false\n"));
        assert!(!parse_oom_killed(""));
    }
}
