//! Daemon configuration

use clap::Parser;
use sandpit_core::SandboxConfig;
use sandpit_core::config::{DEFAULT_CODE_LIMIT, DEFAULT_INPUT_LIMIT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Headroom for JSON framing and escapes on top of the raw payload limits
const BODY_OVERHEAD: usize = 64 * 1024;

/// Configuration for the daemon. Every flag can also be set through the
/// matching `SANDPIT_*` environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "sandpit-daemon")]
#[command(author, version, about = "HTTP service for ephemeral code execution")]
pub struct DaemonConfig {
    /// Address to listen on
    #[arg(long, env = "SANDPIT_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Directory for per-request workspaces (defaults to $TMPDIR/sandpit)
    #[arg(long, env = "SANDPIT_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Maximum source code length in characters
    #[arg(long, env = "SANDPIT_CODE_LIMIT", default_value_t = DEFAULT_CODE_LIMIT)]
    pub code_limit: usize,

    /// Maximum stdin length in characters
    #[arg(long, env = "SANDPIT_INPUT_LIMIT", default_value_t = DEFAULT_INPUT_LIMIT)]
    pub input_limit: usize,

    /// Execution deadline in milliseconds
    #[arg(long, env = "SANDPIT_TIMEOUT_MS", default_value_t = 7000)]
    pub timeout_ms: u64,

    /// Bytes of stdout and stderr kept per execution
    #[arg(long, env = "SANDPIT_MAX_OUTPUT_BYTES", default_value_t = 1024 * 1024)]
    pub max_output_bytes: usize,

    /// Executions allowed to run at the same time
    #[arg(long, env = "SANDPIT_MAX_CONCURRENT", default_value_t = 16)]
    pub max_concurrent: usize,

    /// How long a request may wait for a free execution slot, in milliseconds
    #[arg(long, env = "SANDPIT_QUEUE_TIMEOUT_MS", default_value_t = 10_000)]
    pub queue_timeout_ms: u64,
}

impl DaemonConfig {
    /// Sandbox settings derived from the flags
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        let mut builder = SandboxConfig::builder()
            .code_limit(self.code_limit)
            .input_limit(self.input_limit)
            .timeout_ms(self.timeout_ms)
            .max_output_bytes(self.max_output_bytes)
            .max_concurrent(self.max_concurrent)
            .queue_timeout(Duration::from_millis(self.queue_timeout_ms));

        if let Some(root) = &self.workspace_root {
            builder = builder.workspace_root(root);
        }
        builder.build()
    }

    /// Largest request body accepted. A character may take up to six bytes
    /// once JSON-escaped, so oversized code still reaches the validator and
    /// gets a precise error.
    #[must_use]
    pub fn body_limit(&self) -> usize {
        self.code_limit
            .saturating_add(self.input_limit)
            .saturating_mul(6)
            .saturating_add(BODY_OVERHEAD)
    }
}
