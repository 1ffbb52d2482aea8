//! Sandbox configuration

use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum size of submitted source code, in characters
pub const DEFAULT_CODE_LIMIT: usize = 200_000;

/// Maximum size of submitted standard input, in characters
pub const DEFAULT_INPUT_LIMIT: usize = 100_000;

/// Wall-clock deadline for a single execution step
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);

/// Configuration for a sandbox instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Directory under which per-request workspaces are created
    pub workspace_root: PathBuf,

    /// Maximum source code length in characters
    pub code_limit: usize,

    /// Maximum stdin length in characters
    pub input_limit: usize,

    /// Maximum execution time per step
    pub timeout: Duration,

    /// Bytes kept per output stream; anything beyond is drained and dropped
    pub max_output_bytes: usize,

    /// Executions allowed to run at the same time
    pub max_concurrent: usize,

    /// How long a request may wait for an execution slot
    pub queue_timeout: Duration,

    /// Environment variables passed to the executed program
    pub env: Vec<(String, String)>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("sandpit"),
            code_limit: DEFAULT_CODE_LIMIT,
            input_limit: DEFAULT_INPUT_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: 1024 * 1024, // 1MB
            max_concurrent: 16,
            queue_timeout: Duration::from_secs(10),
            env: vec![
                ("PATH".into(), default_path()),
                ("PYTHONUNBUFFERED".into(), "1".into()),
                ("LANG".into(), "C.UTF-8".into()),
            ],
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject settings that would make every request fail or hang
    pub fn validate(&self) -> Result<()> {
        if self.code_limit == 0 {
            return Err(SandboxError::Config("code_limit must be greater than zero".into()));
        }
        if self.input_limit == 0 {
            return Err(SandboxError::Config("input_limit must be greater than zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(SandboxError::Config("timeout must be greater than zero".into()));
        }
        if self.max_concurrent == 0 {
            return Err(SandboxError::Config("max_concurrent must be greater than zero".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config("max_output_bytes must be greater than zero".into()));
        }
        if self.workspace_root.as_os_str().is_empty() {
            return Err(SandboxError::Config("workspace_root must not be empty".into()));
        }
        Ok(())
    }
}

/// Builder for SandboxConfig
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    #[must_use]
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    #[must_use]
    pub fn code_limit(mut self, chars: usize) -> Self {
        self.config.code_limit = chars;
        self
    }

    #[must_use]
    pub fn input_limit(mut self, chars: usize) -> Self {
        self.config.input_limit = chars;
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    #[must_use]
    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    #[must_use]
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    #[must_use]
    pub fn queue_timeout(mut self, duration: Duration) -> Self {
        self.config.queue_timeout = duration;
        self
    }

    /// Set an environment variable, replacing any earlier value for the key
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.config.env.retain(|(k, _)| *k != key);
        self.config.env.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Search path handed to executed programs.
///
/// Inherits the host `PATH` so interpreters installed outside the system
/// directories (pyenv, nvm) are still found.
fn default_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into())
}
