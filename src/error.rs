use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Request errors
    #[error("{0}")]
    EmptyInput(String),

    #[error("Invalid resource limits: {0}")]
    InvalidLimits(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Provider errors
    #[error("Provider '{provider}' not found")]
    ProviderNotFound { provider: String },

    #[error("API key not found for provider '{provider}' (expected env: {env_var})")]
    ApiKeyMissing { provider: String, env_var: String },

    #[error("Provider API error: {message}")]
    ProviderApi {
        message: String,
        status: Option<u16>,
    },

    #[error("Rate limited by provider, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("Provider returned no completion: {0}")]
    Upstream(String),

    // Sandbox errors
    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Sandbox is at capacity ({max_jobs} jobs in flight), try again later")]
    SandboxBusy { max_jobs: usize },

    #[error("Security restriction: {0}")]
    Rejected(String),

    #[error("Execution timed out (max {})", timeout_label(.timeout_ms))]
    TimedOut { timeout_ms: u64 },

    #[error("Execution failed: {0}")]
    RuntimeError(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VoxError {
    /// True for failures of the external completion capability.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::ProviderApi { .. } | Self::RateLimited { .. } | Self::Upstream(_) | Self::Http(_)
        )
    }

    /// Short machine-readable class used in failure envelopes and logs.
    pub fn kind(&self) -> &'static str {
        if self.is_upstream() {
            return "upstream_error";
        }
        match self {
            Self::EmptyInput(_) => "empty_input",
            Self::InvalidLimits(_) => "invalid_limits",
            Self::Rejected(_) => "rejected",
            Self::TimedOut { .. } => "timed_out",
            Self::RuntimeError(_) => "runtime_error",
            Self::ResourceExceeded(_) => "resource_exceeded",
            Self::SandboxBusy { .. } => "busy",
            Self::Config(_)
            | Self::TomlParse(_)
            | Self::ProviderNotFound { .. }
            | Self::ApiKeyMissing { .. }
            | Self::BackendNotAvailable { .. } => "config_error",
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => "internal_error",
            Self::ProviderApi { .. } | Self::RateLimited { .. } | Self::Upstream(_) | Self::Http(_) => {
                "upstream_error"
            }
        }
    }
}

/// Render a timeout the way users read it: whole seconds when possible.
pub fn format_timeout(timeout_ms: u64) -> String {
    if timeout_ms % 1000 == 0 {
        let secs = timeout_ms / 1000;
        if secs == 1 {
            "1 second".to_string()
        } else {
            format!("{} seconds", secs)
        }
    } else {
        format!("{} ms", timeout_ms)
    }
}

fn timeout_label(timeout_ms: &u64) -> String {
    format_timeout(*timeout_ms)
}

pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = VoxError::TimedOut { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Execution timed out (max 5 seconds)");

        let err = VoxError::TimedOut { timeout_ms: 1500 };
        assert_eq!(err.to_string(), "Execution timed out (max 1500 ms)");
    }

    #[test]
    fn test_upstream_classification() {
        assert!(VoxError::Upstream("no choices".into()).is_upstream());
        assert!(VoxError::RateLimited { retry_after: None }.is_upstream());
        assert!(!VoxError::EmptyInput("No text input provided".into()).is_upstream());
        assert_eq!(VoxError::EmptyInput("x".into()).kind(), "empty_input");
        assert_eq!(
            VoxError::ProviderApi {
                message: "bad gateway".into(),
                status: Some(502)
            }
            .kind(),
            "upstream_error"
        );
        assert_eq!(
            VoxError::Io(std::io::Error::other("disk full")).kind(),
            "internal_error"
        );
    }
}
