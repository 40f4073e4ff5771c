//! Admission checks run before anything touches the filesystem.
//!
//! Containment comes from the isolation backend, not from scanning source
//! text; this layer only bounds what a request may ask for.

use std::time::Duration;

use crate::config::types::PolicyConfig;
use crate::error::format_timeout;
use crate::sandbox::limits::ResourceLimits;

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub max_source_bytes: usize,
    pub max_timeout: Duration,
    pub max_output_bytes: usize,
}

impl From<&PolicyConfig> for ExecutionPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_source_bytes: config.max_source_bytes,
            max_timeout: Duration::from_millis(config.max_timeout_ms),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

impl ExecutionPolicy {
    /// Returns the reason a job must be rejected, if any.
    pub fn check(&self, code: &str, limits: &ResourceLimits) -> Option<String> {
        if code.len() > self.max_source_bytes {
            return Some(format!(
                "source is {} bytes, the limit is {} bytes",
                code.len(),
                self.max_source_bytes
            ));
        }
        if code.contains('\0') {
            return Some("source contains NUL bytes".to_string());
        }
        if limits.timeout > self.max_timeout {
            return Some(format!(
                "requested timeout {} exceeds the maximum of {}",
                format_timeout(limits.timeout_ms()),
                format_timeout(u64::try_from(self.max_timeout.as_millis()).unwrap_or(u64::MAX))
            ));
        }
        if limits.max_output_bytes > self.max_output_bytes {
            return Some(format!(
                "requested output ceiling of {} bytes exceeds the maximum of {} bytes",
                limits.max_output_bytes, self.max_output_bytes
            ));
        }
        None
    }
}
