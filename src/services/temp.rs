use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::models::job::JobId;
use crate::workers::PipelineError;

/// Per-job scratch directory under a worker's temp root. Every file a job
/// materializes lives here, so removing the directory removes them all.
///
/// [`close`](Self::close) removes it and reports failures; dropping the
/// workspace removes it silently.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    job_id: JobId,
}

impl TempWorkspace {
    pub fn create(root: &Path, job_id: JobId) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(root)
            .map_err(|e| PipelineError::Processing(format!("Temp root unavailable: {e}")))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{job_id}-"))
            .tempdir_in(root)
            .map_err(|e| PipelineError::Processing(format!("Temp workspace not created: {e}")))?;
        tracing::debug!(job_id = %job_id, path = %dir.path().display(), "Temp workspace created");
        Ok(Self { dir, job_id })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a file named `name` inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let path = self.file(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn close(self) -> Result<(), PipelineError> {
        let job_id = self.job_id;
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| PipelineError::Resource(e.to_string()))?
            .map_err(|e| {
                PipelineError::Resource(format!("Failed to remove {}: {e}", path.display()))
            })?;
        tracing::debug!(job_id = %job_id, "Temp workspace removed");
        Ok(())
    }
}

/// Remove any workspace `job_id` left under `root`, e.g. after its
/// processing future was dropped mid-flight. Returns how many were removed.
pub async fn sweep_job_workspaces(root: &Path, job_id: JobId) -> Result<usize, PipelineError> {
    let prefix = format!("{job_id}-");
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PipelineError::Resource(e.to_string())),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::Resource(e.to_string()))?
    {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            tokio::fs::remove_dir_all(entry.path()).await.map_err(|e| {
                PipelineError::Resource(format!(
                    "Failed to remove {}: {e}",
                    entry.path().display()
                ))
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}
