use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, VoxError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxConfig {
    pub server: ServerConfig,
    pub generator: GeneratorConfig,
    pub providers: HashMap<String, ProviderConfig>,
    pub sandbox: SandboxConfig,
}

impl Default for VoxConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            generator: GeneratorConfig::default(),
            providers: default_providers(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl VoxConfig {
    /// Reject configurations the sandbox or gateway cannot honor.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.sandbox.limits;
        let policy = &self.sandbox.policy;

        if self.server.port == 0 {
            return Err(VoxError::Config("server.port must be non-zero".to_string()));
        }
        if limits.timeout_ms == 0 {
            return Err(VoxError::Config(
                "sandbox.limits.timeout_ms must be positive".to_string(),
            ));
        }
        if limits.max_output_bytes == 0 {
            return Err(VoxError::Config(
                "sandbox.limits.max_output_bytes must be positive".to_string(),
            ));
        }
        if limits.timeout_ms > policy.max_timeout_ms {
            return Err(VoxError::Config(format!(
                "sandbox.limits.timeout_ms ({}) exceeds sandbox.policy.max_timeout_ms ({})",
                limits.timeout_ms, policy.max_timeout_ms
            )));
        }
        if limits.max_output_bytes > policy.max_output_bytes {
            return Err(VoxError::Config(format!(
                "sandbox.limits.max_output_bytes ({}) exceeds sandbox.policy.max_output_bytes ({})",
                limits.max_output_bytes, policy.max_output_bytes
            )));
        }
        if self.sandbox.max_concurrent_jobs == 0 {
            return Err(VoxError::Config(
                "sandbox.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.sandbox.interpreter.program.trim().is_empty() {
            return Err(VoxError::Config(
                "sandbox.interpreter.program must not be empty".to_string(),
            ));
        }
        let source_file = self.sandbox.interpreter.source_file.as_str();
        if std::path::Path::new(source_file)
            .file_name()
            .and_then(|n| n.to_str())
            != Some(source_file)
        {
            return Err(VoxError::Config(format!(
                "sandbox.interpreter.source_file must be a plain file name, got '{}'",
                source_file
            )));
        }
        if self.generator.request_timeout_ms == 0 {
            return Err(VoxError::Config(
                "generator.request_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(VoxError::Config(format!(
                "generator.temperature must be within 0.0..=2.0, got {}",
                self.generator.temperature
            )));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow any origin (the browser front-end is served from elsewhere)
    pub cors_permissive: bool,
    /// Maximum accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_permissive: true,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Code generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Provider name, key into `providers`
    pub provider: String,
    /// Model override (falls back to the provider's default model)
    pub model: Option<String>,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Sampling temperature. Generation is intentionally not deterministic.
    pub temperature: f32,
    /// Overall deadline for one completion request
    pub request_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            max_tokens: 500,
            temperature: 0.5,
            request_timeout_ms: 60_000,
        }
    }
}

/// Connection settings for one completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub default_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    HashMap::from([
        (
            "openai".to_string(),
            ProviderConfig {
                api_key_env: "OPENAI_API_KEY".to_string(),
                default_model: "gpt-3.5-turbo".to_string(),
                base_url: None,
            },
        ),
        (
            "anthropic".to_string(),
            ProviderConfig {
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                default_model: "claude-3-5-haiku-latest".to_string(),
                base_url: None,
            },
        ),
    ])
}

/// The isolation backend used to run jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Plain subprocess with rlimits (no filesystem or network isolation)
    Process,
    /// Bubblewrap namespaces (Linux)
    Bwrap,
    /// Docker container
    Docker,
    /// Automatically select the strongest available backend
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Interpreter invoked with the job's source file
    pub interpreter: InterpreterConfig,
    /// Default per-job limits
    pub limits: LimitsConfig,
    /// Admission policy checked before anything is spawned
    pub policy: PolicyConfig,
    /// Upper bound on jobs running at the same time
    pub max_concurrent_jobs: usize,
    /// How long a job may wait for a free slot
    pub queue_timeout_ms: u64,
    /// Parent directory for per-job working directories (system temp dir if unset)
    pub work_root: Option<PathBuf>,
    /// Bubblewrap-specific configuration
    pub bwrap: BwrapConfig,
    /// Docker-specific configuration
    pub docker: DockerConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            interpreter: InterpreterConfig::default(),
            limits: LimitsConfig::default(),
            policy: PolicyConfig::default(),
            max_concurrent_jobs: 4,
            queue_timeout_ms: 10_000,
            work_root: None,
            bwrap: BwrapConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Interpreter binary (resolved on PATH)
    pub program: String,
    /// Arguments placed before the source file path
    pub args: Vec<String>,
    /// Name of the source file written into the job directory
    pub source_file: String,
    /// Text the interpreter prints to stderr when an allocation fails under
    /// the memory limit
    pub out_of_memory_marker: Option<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            // Isolated mode: ignore PYTHON* env vars and user site-packages, no .pyc writes
            args: vec!["-I".to_string(), "-B".to_string()],
            source_file: "main.py".to_string(),
            out_of_memory_marker: Some("MemoryError".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock budget in milliseconds
    pub timeout_ms: u64,
    /// Ceiling on captured bytes per output stream
    pub max_output_bytes: usize,
    /// CPU time in seconds (RLIMIT_CPU)
    pub cpu_seconds: Option<u64>,
    /// Address space in MiB (RLIMIT_AS, or --memory for docker)
    pub memory_mb: Option<u64>,
    /// Process count. For the process backend this is RLIMIT_NPROC, which the
    /// kernel checks against every process of the service's user, not just
    /// the job's; bwrap ignores it and docker applies it per container.
    pub max_processes: Option<u64>,
    /// Largest file the job may write, in bytes (RLIMIT_FSIZE)
    pub max_file_bytes: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_output_bytes: 1024 * 1024,
            cpu_seconds: Some(5),
            memory_mb: Some(256),
            max_processes: None,
            max_file_bytes: Some(10 * 1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Largest accepted source text in bytes
    pub max_source_bytes: usize,
    /// Largest wall-clock budget a request may ask for
    pub max_timeout_ms: u64,
    /// Largest output ceiling a request may ask for
    pub max_output_bytes: usize,
    /// Refuse to start on a backend without filesystem and network isolation
    pub require_isolation: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
            max_timeout_ms: 30_000,
            max_output_bytes: 4 * 1024 * 1024,
            require_isolation: false,
        }
    }
}

/// Bubblewrap-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BwrapConfig {
    /// Path to bwrap binary (looked up on PATH if not set)
    pub binary_path: Option<PathBuf>,
    /// Host paths exposed read-only inside the sandbox, when they exist
    pub ro_binds: Vec<PathBuf>,
}

impl Default for BwrapConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            ro_binds: ["/usr", "/lib", "/lib64", "/bin", "/sbin", "/etc/alternatives"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image that provides the interpreter
    pub image: String,
    /// CPU share for the container (--cpus)
    pub cpus: f32,
    /// Process cap per container when `limits.max_processes` is unset
    pub pids_limit: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            cpus: 1.0,
            pids_limit: 64,
        }
    }
}
