//! Error types for sandpit-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{field} exceeds the limit of {limit} characters (got {actual})")]
    PayloadTooLarge {
        field: &'static str,
        limit: usize,
        actual: usize,
    },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("too many executions in flight, try again later")]
    Busy,

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    /// Whether the error was caused by the submitted request rather than the host.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::PayloadTooLarge { .. } | Self::UnsupportedLanguage(_)
        )
    }
}
