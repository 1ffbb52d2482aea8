//! Request orchestration
//!
//! validate -> admit -> provision workspace -> [build] -> run -> destroy workspace.
//! Validation happens before anything is allocated; once a workspace exists it
//! is destroyed on every path out of [`Sandbox::execute`].

use crate::language::LanguageRegistry;
use crate::protocol::ExecuteRequest;
use crate::result::ExecutionOutcome;
use crate::runner::ProcessRunner;
use crate::validate::{ExecutionRequest, validate};
use crate::workspace::Workspace;
use crate::{Result, SandboxConfig, SandboxError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Executes untrusted code in throwaway workspaces
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: Arc<SandboxConfig>,
    registry: Arc<LanguageRegistry>,
    runner: ProcessRunner,
    permits: Arc<Semaphore>,
}

impl Sandbox {
    /// Sandbox with the built-in languages
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Self::with_registry(config, LanguageRegistry::global().clone())
    }

    pub fn with_registry(config: SandboxConfig, registry: LanguageRegistry) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            workspace_root = %config.workspace_root.display(),
            max_concurrent = config.max_concurrent,
            timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            "sandbox ready"
        );

        Ok(Self {
            runner: ProcessRunner::new(&config),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            registry: Arc::new(registry),
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Validate and run a request.
    ///
    /// Validation errors and [`SandboxError::Busy`] are returned before any
    /// workspace is created.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionOutcome> {
        let request = validate(request, &self.registry, &self.config)?;
        let _permit = self.admit().await?;

        let workspace = Workspace::provision(&self.config.workspace_root).await?;
        tracing::info!(
            workspace = %workspace.id(),
            language = request.recipe.name,
            code_len = request.source_code.len(),
            input_len = request.stdin.len(),
            "executing request"
        );

        let result = self.run_in(&workspace, &request).await;
        workspace.destroy().await;

        match &result {
            Ok(outcome) => tracing::info!(
                language = request.recipe.name,
                exit_code = ?outcome.exit_code,
                timed_out = outcome.timed_out,
                "execution finished"
            ),
            Err(e) => tracing::debug!(language = request.recipe.name, error = %e, "execution failed"),
        }
        result
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let recipe = &request.recipe;
        workspace
            .write_source(recipe.source_file, &request.source_code)
            .await?;

        if let Some(build) = recipe.build_command(workspace.path()) {
            let outcome = self
                .runner
                .run(&build, workspace.path(), "", self.config.timeout)
                .await?;
            if !outcome.is_success() {
                tracing::debug!(language = recipe.name, "build step failed, skipping run");
                return Ok(outcome);
            }
        }

        let run = recipe.run_command(workspace.path());
        self.runner
            .run(&run, workspace.path(), &request.stdin, self.config.timeout)
            .await
    }

    /// Wait for an execution slot, giving up after the queue timeout
    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(self.config.queue_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(SandboxError::Busy),
            Err(_elapsed) => {
                tracing::warn!(
                    max_concurrent = self.config.max_concurrent,
                    "no execution slot freed up in time"
                );
                Err(SandboxError::Busy)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> SandboxStatus {
        let max_concurrent = self.config.max_concurrent;
        SandboxStatus {
            max_concurrent,
            in_flight: max_concurrent.saturating_sub(self.permits.available_permits()),
        }
    }
}

/// Snapshot of execution slot usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxStatus {
    pub max_concurrent: usize,
    pub in_flight: usize,
}
