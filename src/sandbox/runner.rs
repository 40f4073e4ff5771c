use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::types::{InterpreterConfig, SandboxConfig};
use crate::error::{Result, VoxError};
use crate::sandbox::capture::{capture_bounded, CapturedStream};
use crate::sandbox::factory::create_backend;
use crate::sandbox::job::{ExecutionJob, JobState, JobWorkspace};
use crate::sandbox::limits::ResourceLimits;
use crate::sandbox::policy::ExecutionPolicy;
use crate::sandbox::reaper;
use crate::sandbox::traits::{IsolationBackend, JobSpec};
use crate::sandbox::{ExecutionResult, ExecutionStatus, Resource};

/// Message returned when an execution request has no code.
pub const EMPTY_CODE_MESSAGE: &str = "No code provided";

/// How long to wait for the killed process and its pipes to wind down
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// How often a CPU-limited job's process tree is sampled
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Runs untrusted code under an isolation backend.
///
/// Every job gets its own working directory, runs in its own session and is
/// bounded by wall-clock, output and rlimit budgets. Whatever happens to the
/// caller, the process tree and the directory do not outlive the job.
pub struct Sandbox {
    backend: Arc<dyn IsolationBackend>,
    interpreter: InterpreterConfig,
    defaults: ResourceLimits,
    policy: ExecutionPolicy,
    slots: Arc<Semaphore>,
    max_jobs: usize,
    queue_timeout: Duration,
    work_root: Option<PathBuf>,
}

/// What ended supervision of a running job
#[derive(Clone, Copy)]
enum Ending {
    Exited(ExitStatus),
    TimedOut,
    OutputExceeded,
}

impl Sandbox {
    pub fn new(backend: Arc<dyn IsolationBackend>, config: &SandboxConfig) -> Self {
        reaper::become_subreaper();
        let max_jobs = config.max_concurrent_jobs.max(1);
        Self {
            backend,
            interpreter: config.interpreter.clone(),
            defaults: ResourceLimits::from(&config.limits),
            policy: ExecutionPolicy::from(&config.policy),
            slots: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
            queue_timeout: Duration::from_millis(config.queue_timeout_ms),
            work_root: config.work_root.clone(),
        }
    }

    /// Select a backend per the configuration and build the sandbox around it.
    pub async fn from_config(config: &SandboxConfig) -> Result<Self> {
        let backend = create_backend(config).await?;
        Ok(Self::new(backend, config))
    }

    pub fn default_limits(&self) -> &ResourceLimits {
        &self.defaults
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run `code` under the default limits.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult> {
        self.submit(code, self.defaults.clone()).await
    }

    /// Run `code` under `limits`.
    ///
    /// Policy rejections and every way a started job can end are reported
    /// through `ExecutionResult::status`. `Err` is reserved for bad input,
    /// a full sandbox, and failures to set the job up.
    pub async fn submit(&self, code: &str, limits: ResourceLimits) -> Result<ExecutionResult> {
        if code.trim().is_empty() {
            return Err(VoxError::EmptyInput(EMPTY_CODE_MESSAGE.to_string()));
        }
        limits.validate()?;

        let mut job = ExecutionJob::new(code.to_string(), limits);
        job.transition(JobState::Validated);

        if let Some(reason) = self.policy.check(&job.code, &job.limits) {
            job.transition(JobState::Rejected);
            warn!(job_id = %job.id, reason = %reason, "Job rejected");
            return Ok(self.rejected(&job, reason));
        }

        let _permit = match tokio::time::timeout(
            self.queue_timeout,
            self.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(VoxError::Internal("sandbox is shut down".to_string())),
            Err(_) => {
                warn!(job_id = %job.id, max_jobs = self.max_jobs, "No free sandbox slot");
                return Err(VoxError::SandboxBusy {
                    max_jobs: self.max_jobs,
                });
            }
        };

        let workspace = match JobWorkspace::create(
            self.work_root.as_deref(),
            &job.id,
            &self.interpreter.source_file,
            &job.code,
        )
        .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                job.transition(JobState::CrashedOnSetup);
                error!(job_id = %job.id, error = %e, "Failed to prepare job workspace");
                return Err(VoxError::Internal(format!(
                    "failed to prepare job workspace: {}",
                    e
                )));
            }
        };

        let release = ReleaseGuard::new(self.backend.clone(), job.id);
        let result = self.run(&mut job, &workspace).await;
        release.release().await;
        workspace.remove().await;

        result
    }

    async fn run(&self, job: &mut ExecutionJob, workspace: &JobWorkspace) -> Result<ExecutionResult> {
        let spec = JobSpec {
            job_id: &job.id,
            workdir: workspace.path(),
            source_file: &self.interpreter.source_file,
            interpreter: &self.interpreter,
            limits: &job.limits,
        };

        let mut cmd = match self.backend.command(&spec) {
            Ok(cmd) => cmd,
            Err(e) => {
                job.transition(JobState::CrashedOnSetup);
                error!(job_id = %job.id, error = %e, "Failed to build job command");
                return Err(e);
            }
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        reaper::prepare_leader(&mut cmd);

        let started = Instant::now();
        let mut child = match reaper::spawn_leader(&mut cmd) {
            Ok(child) => child,
            Err(e) => {
                job.transition(JobState::CrashedOnSetup);
                error!(job_id = %job.id, error = %e, "Failed to start interpreter");
                return Err(VoxError::Internal(format!(
                    "failed to start interpreter: {}",
                    e
                )));
            }
        };
        let mut tree = JobTree::new(child.id());
        job.transition(JobState::Running);
        debug!(job_id = %job.id, pid = ?child.id(), backend = self.backend.name(), "Job started");

        let limit = job.limits.max_output_bytes;
        let mut stdout_task = spawn_capture(child.stdout.take(), limit);
        let mut stderr_task = spawn_capture(child.stderr.take(), limit);
        let mut stdout: Option<CapturedStream> = None;
        let mut stderr: Option<CapturedStream> = None;

        let deadline = tokio::time::sleep(job.limits.timeout);
        tokio::pin!(deadline);

        // RLIMIT_CPU kills with SIGKILL at the hard limit, which looks like
        // any other kill unless the CPU time used is known
        let sample_cpu = job.limits.cpu_seconds.is_some();
        let mut sampler = tokio::time::interval(CPU_SAMPLE_INTERVAL);
        sampler.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut peak_cpu: Option<Duration> = None;

        let ending = loop {
            tokio::select! {
                status = child.wait() => break Ending::Exited(status?),
                captured = &mut stdout_task, if stdout.is_none() => {
                    let captured = joined(captured);
                    let over = captured.truncated;
                    stdout = Some(captured);
                    if over {
                        break Ending::OutputExceeded;
                    }
                }
                captured = &mut stderr_task, if stderr.is_none() => {
                    let captured = joined(captured);
                    let over = captured.truncated;
                    stderr = Some(captured);
                    if over {
                        break Ending::OutputExceeded;
                    }
                }
                _ = &mut deadline => break Ending::TimedOut,
                _ = sampler.tick(), if sample_cpu => {
                    if let Some(pid) = tree.pid {
                        let sample = tokio::task::spawn_blocking(move || reaper::peak_cpu(pid))
                            .await
                            .ok()
                            .flatten();
                        peak_cpu = peak_cpu.max(sample);
                    }
                }
            }
        };

        if let Ending::Exited(_) = ending {
            tree.reaped();
        }
        tree.kill();

        let exit_status = match ending {
            Ending::Exited(status) => Some(status),
            _ => match tokio::time::timeout(TEARDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!(job_id = %job.id, error = %e, "Failed to reap job process");
                    None
                }
                Err(_) => {
                    warn!(job_id = %job.id, "Job process did not exit after SIGKILL");
                    None
                }
            },
        };
        if exit_status.is_some() {
            tree.reaped();
        }
        let duration = started.elapsed();

        // Anything that detached from the leader is a child of ours by now
        reaper::reap_orphans(TEARDOWN_GRACE).await;
        if exit_status.is_some() {
            tree.disarm();
        }

        let stdout = match stdout {
            Some(captured) => captured,
            None => finish_capture(&job.id, &mut stdout_task).await,
        };
        let stderr = match stderr {
            Some(captured) => captured,
            None => finish_capture(&job.id, &mut stderr_task).await,
        };
        let stdout_truncated = stdout.truncated;
        let stderr_truncated = stderr.truncated;

        let exit_code = exit_status.and_then(|s| s.code());
        let signal = exit_status.and_then(exit_signal);

        let status = match ending {
            Ending::TimedOut => ExecutionStatus::TimedOut,
            Ending::OutputExceeded => ExecutionStatus::ResourceExceeded {
                resource: Resource::Output,
            },
            Ending::Exited(_) if stdout_truncated || stderr_truncated => {
                ExecutionStatus::ResourceExceeded {
                    resource: Resource::Output,
                }
            }
            Ending::Exited(status) => classify_exit(status, &job.limits, peak_cpu),
        };
        let stdout = stdout.into_string();
        let stderr = stderr.into_string();

        let status = match status {
            ExecutionStatus::RuntimeError => match self.exceeded_limit(job, &stderr).await {
                Some(resource) => ExecutionStatus::ResourceExceeded { resource },
                None => ExecutionStatus::RuntimeError,
            },
            status => status,
        };

        job.transition(match status {
            ExecutionStatus::Completed => JobState::Completed,
            ExecutionStatus::TimedOut => JobState::TimedOut,
            ExecutionStatus::ResourceExceeded { .. } => JobState::ResourceExceeded,
            _ => JobState::RuntimeError,
        });

        info!(
            job_id = %job.id,
            backend = self.backend.name(),
            state = %job.state(),
            exit_code = ?exit_code,
            duration_ms = duration.as_millis() as u64,
            "Job finished"
        );

        Ok(ExecutionResult {
            job_id: job.id,
            status,
            exit_code,
            signal,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration,
            timeout: job.limits.timeout,
            backend: self.backend.name().to_string(),
        })
    }

    /// Tell a failed job that ran out of memory from one that merely failed.
    async fn exceeded_limit(&self, job: &ExecutionJob, stderr: &str) -> Option<Resource> {
        if let Some(resource) = self.backend.exceeded_limit(&job.id).await {
            return Some(resource);
        }
        let marker = self.interpreter.out_of_memory_marker.as_deref()?;
        (job.limits.memory_bytes.is_some() && !marker.is_empty() && stderr.contains(marker))
            .then_some(Resource::Memory)
    }

    fn rejected(&self, job: &ExecutionJob, reason: String) -> ExecutionResult {
        ExecutionResult {
            job_id: job.id,
            status: ExecutionStatus::Rejected { reason },
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::ZERO,
            timeout: job.limits.timeout,
            backend: self.backend.name().to_string(),
        }
    }
}

type CaptureTask = JoinHandle<std::io::Result<CapturedStream>>;

fn spawn_capture<R>(reader: Option<R>, limit: usize) -> CaptureTask
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match reader {
            Some(reader) => capture_bounded(reader, limit).await,
            None => Ok(CapturedStream::default()),
        }
    })
}

fn joined(
    result: std::result::Result<std::io::Result<CapturedStream>, tokio::task::JoinError>,
) -> CapturedStream {
    match result {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read job output");
            CapturedStream::default()
        }
        Err(e) => {
            warn!(error = %e, "Output capture task failed");
            CapturedStream::default()
        }
    }
}

/// Wait for a capture task whose pipe should close now that the job tree is dead.
async fn finish_capture(job_id: &Uuid, task: &mut CaptureTask) -> CapturedStream {
    match tokio::time::timeout(TEARDOWN_GRACE, &mut *task).await {
        Ok(result) => joined(result),
        Err(_) => {
            // A detached process still holds the pipe
            warn!(job_id = %job_id, "Output pipe stayed open after teardown");
            task.abort();
            CapturedStream::default()
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Map a normal exit to a status. Wrappers such as bwrap and docker report a
/// fatal signal as `128 + signo`. `peak_cpu` is the most CPU time any single
/// process of the job was seen using.
fn classify_exit(
    status: ExitStatus,
    limits: &ResourceLimits,
    peak_cpu: Option<Duration>,
) -> ExecutionStatus {
    if status.success() {
        return ExecutionStatus::Completed;
    }

    #[cfg(unix)]
    {
        let signal = exit_signal(status).or_else(|| {
            status
                .code()
                .filter(|c| *c > 128 && *c < 128 + 64)
                .map(|c| c - 128)
        });
        match signal {
            Some(libc::SIGXCPU) => {
                return ExecutionStatus::ResourceExceeded {
                    resource: Resource::CpuTime,
                }
            }
            Some(libc::SIGXFSZ) => {
                return ExecutionStatus::ResourceExceeded {
                    resource: Resource::FileSize,
                }
            }
            // The kernel kills at the hard CPU limit, one second past the soft one
            Some(libc::SIGKILL)
                if limits.cpu_seconds.is_some_and(|secs| {
                    peak_cpu.is_some_and(|cpu| cpu >= Duration::from_secs(secs))
                }) =>
            {
                return ExecutionStatus::ResourceExceeded {
                    resource: Resource::CpuTime,
                }
            }
            _ => {}
        }
    }

    #[cfg(not(unix))]
    let _ = (limits, peak_cpu);

    ExecutionStatus::RuntimeError
}

/// Kills the job's process tree unless disarmed after teardown finished.
struct JobTree {
    pid: Option<u32>,
    reaped: bool,
}

impl JobTree {
    fn new(pid: Option<u32>) -> Self {
        Self { pid, reaped: false }
    }

    fn kill(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        if self.reaped {
            // The pid may be reused once reaped; only the group is still ours
            #[cfg(unix)]
            if let Ok(pgid) = libc::pid_t::try_from(pid) {
                unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                }
            }
        } else {
            reaper::kill_tree(pid);
        }
    }

    /// The leader has been waited for.
    fn reaped(&mut self) {
        if let Some(pid) = self.pid {
            reaper::forget_leader(pid);
        }
        self.reaped = true;
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for JobTree {
    fn drop(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        self.kill();
        reaper::forget_leader(pid);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(reaper::reap_orphans(TEARDOWN_GRACE));
        }
    }
}

/// Calls `IsolationBackend::release` for a job, from a spawned task if the
/// job future is dropped before reaching the end.
struct ReleaseGuard {
    backend: Arc<dyn IsolationBackend>,
    job_id: Uuid,
    armed: bool,
}

impl ReleaseGuard {
    fn new(backend: Arc<dyn IsolationBackend>, job_id: Uuid) -> Self {
        Self {
            backend,
            job_id,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.backend.release(&self.job_id).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to release job resources");
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let backend = self.backend.clone();
        let job_id = self.job_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = backend.release(&job_id).await {
                    warn!(job_id = %job_id, error = %e, "Failed to release job resources");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{BackendType, LimitsConfig};
    use crate::sandbox::backends::ProcessBackend;

    fn sh_config(root: &std::path::Path, max_jobs: usize) -> SandboxConfig {
        SandboxConfig {
            backend: BackendType::Process,
            interpreter: InterpreterConfig {
                program: "sh".to_string(),
                args: vec![],
                source_file: "main.sh".to_string(),
                ..Default::default()
            },
            limits: LimitsConfig {
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                cpu_seconds: None,
                memory_mb: None,
                max_processes: None,
                max_file_bytes: None,
            },
            max_concurrent_jobs: max_jobs,
            queue_timeout_ms: 100,
            work_root: Some(root.to_path_buf()),
            ..Default::default()
        }
    }

    fn sh_sandbox(root: &std::path::Path) -> Sandbox {
        Sandbox::new(Arc::new(ProcessBackend::new()), &sh_config(root, 4))
    }

    fn is_empty_dir(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_completed_job() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let result = sandbox.execute("echo hello").await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.is_success());
        assert_eq!(result.backend, "process");
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_empty_code() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        for code in ["", "  \n "] {
            let err = sandbox.execute(code).await.unwrap_err();
            assert!(matches!(err, VoxError::EmptyInput(ref m) if m == EMPTY_CODE_MESSAGE));
        }
    }

    #[tokio::test]
    async fn test_invalid_limits() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let limits = sandbox.default_limits().clone().with_timeout(Duration::ZERO);

        let err = sandbox.submit("echo hi", limits).await.unwrap_err();
        assert!(matches!(err, VoxError::InvalidLimits(_)));
    }

    #[tokio::test]
    async fn test_runtime_error_keeps_stderr() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let result = sandbox.execute("echo partial\necho boom >&2\nexit 3").await.unwrap();

        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "partial\n");
        assert_eq!(result.stderr, "boom\n");
        assert_eq!(
            result.failure().unwrap().to_string(),
            "Execution failed: boom"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_is_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let result = sandbox.execute("exit 4").await.unwrap();

        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert!(result
            .failure()
            .unwrap()
            .to_string()
            .contains("exited with code 4"));
    }

    #[tokio::test]
    async fn test_rejected_job_never_spawns() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let result = sandbox.execute("touch marker\0").await.unwrap();

        assert!(matches!(result.status, ExecutionStatus::Rejected { .. }));
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_tree() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let limits = sandbox
            .default_limits()
            .clone()
            .with_timeout(Duration::from_millis(300));

        let started = Instant::now();
        let result = sandbox
            .submit("sleep 30 &\necho $!\nwait", limits)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            result.failure().unwrap().to_string(),
            "Execution timed out (max 300 ms)"
        );
        assert!(is_empty_dir(root.path()));

        #[cfg(target_os = "linux")]
        {
            let pid: i32 = result.stdout.trim().parse().unwrap();
            assert!(wait_until_gone(pid).await, "background sleep {} survived", pid);
        }
    }

    /// A killed process may linger as a zombie until its new parent reaps it.
    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..40 {
            let status = std::fs::read_to_string(format!("/proc/{}/status", pid));
            match status {
                Err(_) => return true,
                Ok(s) if s.lines().any(|l| l.starts_with("State:") && l.contains('Z')) => {
                    return true
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        false
    }

    #[cfg(target_os = "linux")]
    fn has_setsid() -> bool {
        which::which("setsid").is_ok()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_detached_process_is_killed_on_timeout() {
        if !has_setsid() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let limits = sandbox
            .default_limits()
            .clone()
            .with_timeout(Duration::from_millis(300));

        let result = sandbox
            .submit("setsid sleep 60 &\necho $!\nsleep 10", limits)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        let pid: i32 = result.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "detached sleep {} survived", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_detached_process_is_killed_after_exit() {
        if !has_setsid() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let started = Instant::now();
        let result = sandbox.execute("setsid sleep 60 &\necho $!").await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        let pid: i32 = result.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "detached sleep {} survived", pid);
        assert!(is_empty_dir(root.path()));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_double_fork_is_killed_after_exit() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let result = sandbox
            .execute("(sleep 60 > /dev/null 2>&1 &\necho $!)")
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        let pid: i32 = result.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "orphaned sleep {} survived", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sigkill_without_cpu_use_is_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let mut limits = sandbox.default_limits().clone();
        limits.cpu_seconds = Some(1);

        let result = sandbox.submit("sleep 2\nkill -9 $$", limits).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.signal, Some(libc::SIGKILL));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_sigkill_by_cpu_used() {
        use std::os::unix::process::ExitStatusExt;

        let mut limits = ResourceLimits::wall_clock(Duration::from_secs(10), 64);
        limits.cpu_seconds = Some(1);
        let killed = ExitStatus::from_raw(libc::SIGKILL);

        assert_eq!(
            classify_exit(killed, &limits, Some(Duration::from_millis(1950))),
            ExecutionStatus::ResourceExceeded {
                resource: Resource::CpuTime
            }
        );
        assert_eq!(
            classify_exit(killed, &limits, Some(Duration::from_millis(20))),
            ExecutionStatus::RuntimeError
        );
        assert_eq!(classify_exit(killed, &limits, None), ExecutionStatus::RuntimeError);

        // 137 from a wrapper is SIGKILL as well
        let wrapped = ExitStatus::from_raw(137 << 8);
        assert_eq!(classify_exit(wrapped, &limits, None), ExecutionStatus::RuntimeError);
        let xcpu = ExitStatus::from_raw((128 + libc::SIGXCPU) << 8);
        assert_eq!(
            classify_exit(xcpu, &limits, None),
            ExecutionStatus::ResourceExceeded {
                resource: Resource::CpuTime
            }
        );
    }

    #[tokio::test]
    async fn test_out_of_memory_is_reported_as_memory_limit() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let code = "echo 'MemoryError' >&2\nexit 1";

        let mut limits = sandbox.default_limits().clone();
        limits.memory_bytes = Some(512 * 1024 * 1024);
        let result = sandbox.submit(code, limits.clone()).await.unwrap();
        assert_eq!(
            result.status,
            ExecutionStatus::ResourceExceeded {
                resource: Resource::Memory
            }
        );
        assert_eq!(
            result.failure().unwrap().to_string(),
            "Resource limit exceeded: memory"
        );

        limits.memory_bytes = None;
        let result = sandbox.submit(code, limits).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
    }

    #[tokio::test]
    async fn test_output_flood_is_cut_at_ceiling() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let limits = sandbox.default_limits().clone().with_max_output_bytes(1000);

        let started = Instant::now();
        let result = sandbox
            .submit("while :; do echo yyyyyyyyyyyyyyyy; done", limits)
            .await
            .unwrap();

        assert_eq!(
            result.status,
            ExecutionStatus::ResourceExceeded {
                resource: Resource::Output
            }
        );
        assert!(result.stdout_truncated);
        assert!(result.stdout.len() <= 1000);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cpu_limit() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());
        let mut limits = sandbox
            .default_limits()
            .clone()
            .with_timeout(Duration::from_secs(10));
        limits.cpu_seconds = Some(1);

        let result = sandbox.submit("while :; do :; done", limits).await.unwrap();

        assert_eq!(
            result.status,
            ExecutionStatus::ResourceExceeded {
                resource: Resource::CpuTime
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_share_directories() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(sh_sandbox(root.path()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sandbox = sandbox.clone();
                tokio::spawn(async move {
                    let code = format!("echo {} > own.txt\nsleep 0.1\ncat own.txt\npwd", i);
                    sandbox.execute(&code).await.unwrap()
                })
            })
            .collect();

        let mut dirs = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap();
            let mut lines = result.stdout.lines();
            assert_eq!(lines.next(), Some(i.to_string().as_str()));
            dirs.push(lines.next().unwrap().to_string());
        }
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), 4);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_busy_when_no_slot_frees_up() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(Arc::new(ProcessBackend::new()), &sh_config(root.path(), 1));

        let (first, second) = tokio::join!(sandbox.execute("sleep 1"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sandbox.execute("echo late").await
        });

        assert!(first.unwrap().is_success());
        assert!(matches!(
            second.unwrap_err(),
            VoxError::SandboxBusy { max_jobs: 1 }
        ));
    }

    #[tokio::test]
    async fn test_dropped_job_is_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(root.path());

        let dropped =
            tokio::time::timeout(Duration::from_millis(200), sandbox.execute("sleep 30")).await;
        assert!(dropped.is_err());
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_python_example() {
        if which::which("python3").is_err() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            backend: BackendType::Process,
            work_root: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let sandbox = Sandbox::new(Arc::new(ProcessBackend::new()), &config);

        let result = sandbox.execute("print(1+1)").await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout, "2\n");
    }
}
