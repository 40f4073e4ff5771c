//! Per-job resource limits and their enforcement on the spawned process.

use std::time::Duration;

use tokio::process::Command;

use crate::config::types::LimitsConfig;
use crate::error::{Result, VoxError};

/// Budget applied to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock budget; the process tree is killed when it expires
    pub timeout: Duration,
    /// Ceiling on captured bytes, per stream
    pub max_output_bytes: usize,
    /// CPU seconds (RLIMIT_CPU)
    pub cpu_seconds: Option<u64>,
    /// Address space in bytes (RLIMIT_AS)
    pub memory_bytes: Option<u64>,
    /// Process count (RLIMIT_NPROC)
    pub max_processes: Option<u64>,
    /// Largest writable file in bytes (RLIMIT_FSIZE)
    pub max_file_bytes: Option<u64>,
}

impl From<&LimitsConfig> for ResourceLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
            cpu_seconds: config.cpu_seconds,
            memory_bytes: config.memory_mb.map(|mb| mb * 1024 * 1024),
            max_processes: config.max_processes,
            max_file_bytes: config.max_file_bytes,
        }
    }
}

impl ResourceLimits {
    /// Only wall-clock and output limits; no rlimits.
    pub fn wall_clock(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
            cpu_seconds: None,
            memory_bytes: None,
            max_processes: None,
            max_file_bytes: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Apply per-request overrides on top of these defaults.
    pub fn overridden(self, timeout_ms: Option<u64>, max_output_bytes: Option<usize>) -> Self {
        let limits = match timeout_ms {
            Some(ms) => self.with_timeout(Duration::from_millis(ms)),
            None => self,
        };
        match max_output_bytes {
            Some(bytes) => limits.with_max_output_bytes(bytes),
            None => limits,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(VoxError::InvalidLimits(
                "timeout must be positive".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(VoxError::InvalidLimits(
                "max output bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Install rlimits in the child between fork and exec.
#[cfg(unix)]
pub(crate) fn apply_rlimits(cmd: &mut Command, limits: &ResourceLimits) {
    let cpu = limits.cpu_seconds;
    let memory = limits.memory_bytes;
    let processes = limits.max_processes;
    let file_size = limits.max_file_bytes;

    // SAFETY: the closure runs in the forked child before exec and only calls
    // setrlimit, which is async-signal-safe. Captured values are Copy.
    unsafe {
        cmd.pre_exec(move || {
            set_limit(libc::RLIMIT_CORE, Some(0), Some(0))?;
            set_limit(libc::RLIMIT_CPU, cpu, cpu.map(cpu_hard_limit))?;
            set_limit(libc::RLIMIT_AS, memory, memory)?;
            set_limit(libc::RLIMIT_NPROC, processes, processes)?;
            set_limit(libc::RLIMIT_FSIZE, file_size, file_size)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_rlimits(_cmd: &mut Command, _limits: &ResourceLimits) {
    tracing::warn!("rlimits are not supported on this platform");
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;

#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type Resource = libc::c_int;

/// Hard CPU limit. The kernel sends SIGKILL at the hard limit and SIGXCPU at
/// the soft one, so the hard limit sits one second above.
pub(crate) fn cpu_hard_limit(soft: u64) -> u64 {
    soft.saturating_add(1)
}

#[cfg(unix)]
fn set_limit(resource: Resource, soft: Option<u64>, hard: Option<u64>) -> std::io::Result<()> {
    let (Some(soft), Some(hard)) = (soft, hard) else {
        return Ok(());
    };
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // An unprivileged process cannot raise its hard limit
    let ceiling = current.rlim_max;
    let clamp = |v: u64| {
        let v = v as libc::rlim_t;
        if ceiling != libc::RLIM_INFINITY && v > ceiling {
            ceiling
        } else {
            v
        }
    };
    let limit = libc::rlimit {
        rlim_cur: clamp(soft),
        rlim_max: clamp(hard),
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
