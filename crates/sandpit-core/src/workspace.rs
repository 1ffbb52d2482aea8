//! Disposable per-request workspaces
//!
//! Each execution gets its own directory `<root>/run-<uuid>`. The directory is
//! removed by [`Workspace::destroy`]; if the owner never gets there (task
//! cancelled, panic) the `Drop` impl removes it synchronously instead.

use crate::{Result, SandboxError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const REMOVE_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root`
    pub async fn provision(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create workspace root {}: {e}",
                root.display()
            ))
        })?;

        let id = Uuid::new_v4();
        let path = root.join(format!("run-{id}"));

        // create_dir, not create_dir_all: an existing leaf is an error, never reused
        tokio::fs::create_dir(&path).await.map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create workspace {}: {e}",
                path.display()
            ))
        })?;

        tracing::debug!(workspace = %path.display(), "workspace provisioned");

        Ok(Self {
            id,
            path,
            destroyed: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the submitted source into the workspace
    pub async fn write_source(&self, file_name: &str, content: &str) -> Result<PathBuf> {
        let file = self.path.join(file_name);
        tokio::fs::write(&file, content).await.map_err(|e| {
            SandboxError::Workspace(format!("failed to write {}: {e}", file.display()))
        })?;
        Ok(file)
    }

    /// Remove the workspace and everything in it.
    ///
    /// Never fails: errors are logged and one retry is made, so cleanup can
    /// not replace whatever error the execution itself produced.
    pub async fn destroy(mut self) {
        self.destroyed = true;

        for attempt in 1..=REMOVE_ATTEMPTS {
            match tokio::fs::remove_dir_all(&self.path).await {
                Ok(()) => {
                    tracing::debug!(workspace = %self.path.display(), "workspace removed");
                    return;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return,
                Err(e) => {
                    tracing::warn!(
                        workspace = %self.path.display(),
                        attempt,
                        error = %e,
                        "failed to remove workspace"
                    );
                    if attempt < REMOVE_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        // Only reached when the owning task was cancelled or panicked. The
        // removal blocks the current worker thread; there is no await in Drop.
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::debug!(workspace = %self.path.display(), "workspace removed on drop");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(workspace = %self.path.display(), error = %e, "failed to remove workspace on drop");
            }
        }
    }
}
