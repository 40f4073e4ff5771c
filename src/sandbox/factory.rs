use std::sync::Arc;

use tracing::{info, warn};

use crate::config::types::{BackendType, SandboxConfig};
use crate::error::{Result, VoxError};
use crate::sandbox::backends::{BwrapBackend, DockerBackend, ProcessBackend};
use crate::sandbox::traits::IsolationBackend;

/// Create an isolation backend based on the configuration.
///
/// Fails if the requested backend is unavailable, or if the policy demands
/// isolation and the resolved backend cannot provide it.
pub async fn create_backend(config: &SandboxConfig) -> Result<Arc<dyn IsolationBackend>> {
    let backend_type = resolve_backend_type(config)?;

    let backend: Arc<dyn IsolationBackend> = match backend_type {
        BackendType::Bwrap => Arc::new(BwrapBackend::new(&config.bwrap)?),
        BackendType::Docker => {
            let backend = DockerBackend::new(&config.docker)?;
            if !DockerBackend::image_exists(&config.docker.image).await {
                warn!(
                    image = %config.docker.image,
                    "Docker image not present locally; the first job will pull it"
                );
            }
            Arc::new(backend)
        }
        BackendType::Process => Arc::new(ProcessBackend::new()),
        BackendType::Auto => {
            // Already resolved by resolve_backend_type
            unreachable!()
        }
    };

    let capabilities = backend.capabilities();
    if !capabilities.is_isolated() {
        if config.policy.require_isolation {
            return Err(VoxError::BackendNotAvailable {
                backend: backend.name().to_string(),
                reason: "policy requires filesystem and network isolation".to_string(),
            });
        }
        warn!(
            backend = backend.name(),
            "Jobs run without filesystem or network isolation; do not expose this service"
        );
    }

    info!(backend = backend.name(), "Sandbox backend selected");
    Ok(backend)
}

/// Resolve the backend type, handling Auto selection.
fn resolve_backend_type(config: &SandboxConfig) -> Result<BackendType> {
    match config.backend {
        BackendType::Auto => {
            // Priority: bwrap > docker > process
            if BwrapBackend::is_available(&config.bwrap) {
                return Ok(BackendType::Bwrap);
            }
            if DockerBackend::is_available() {
                return Ok(BackendType::Docker);
            }
            Ok(BackendType::Process)
        }
        other => Ok(other),
    }
}

/// Get information about available backends on this system.
pub fn available_backends(config: &SandboxConfig) -> Vec<BackendInfo> {
    let bwrap = BwrapBackend::is_available(&config.bwrap);
    let docker = DockerBackend::is_available();

    vec![
        BackendInfo {
            name: "bwrap",
            available: bwrap,
            description: "Bubblewrap namespaces (Linux)",
            unavailable_reason: if bwrap {
                None
            } else if cfg!(target_os = "linux") {
                Some("bwrap not installed or user namespaces disabled")
            } else {
                Some("Only available on Linux")
            },
        },
        BackendInfo {
            name: "docker",
            available: docker,
            description: "Docker container sandbox",
            unavailable_reason: if docker {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        },
        BackendInfo {
            name: "process",
            available: true,
            description: "Plain subprocess with rlimits (no isolation)",
            unavailable_reason: None,
        },
    ]
}

/// Information about an isolation backend.
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_process_backend() {
        let config = SandboxConfig {
            backend: BackendType::Process,
            ..Default::default()
        };
        let backend = create_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "process");
    }

    #[tokio::test]
    async fn test_require_isolation_refuses_process_backend() {
        let mut config = SandboxConfig {
            backend: BackendType::Process,
            ..Default::default()
        };
        config.policy.require_isolation = true;
        let err = create_backend(&config).await.err().unwrap();
        assert!(matches!(err, VoxError::BackendNotAvailable { .. }));
    }

    #[test]
    fn test_process_is_always_listed() {
        let backends = available_backends(&SandboxConfig::default());
        let process = backends.iter().find(|b| b.name == "process").unwrap();
        assert!(process.available);
    }
}
