//! Run-scoped blobs on a local filesystem root.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{validate_component, BlobService, RunId, StorageResult};

/// Filesystem-backed blob service with one directory per run.
///
/// Layout: `<root>/runs/<run id>/<blob name>`
pub struct FsBlobService {
    runs_dir: PathBuf,
}

impl FsBlobService {
    /// Create a new `FsBlobService` rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        std::fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    fn blob_path(&self, run_id: &RunId, name: &str) -> StorageResult<PathBuf> {
        validate_component(run_id.as_str())?;
        validate_component(name)?;
        Ok(self.runs_dir.join(run_id.as_str()).join(name))
    }
}

#[async_trait]
impl BlobService for FsBlobService {
    async fn upload(&self, run_id: &RunId, name: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(run_id, name)?;
        let run_dir = self.runs_dir.join(run_id.as_str());
        tokio::fs::create_dir_all(&run_dir).await?;

        // Write to a temp file in the same directory, then rename into place.
        let bytes = data.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&run_dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("blob writer task failed: {e}")))??;

        tracing::debug!(run_id = %run_id, name, bytes = data.len(), "blob stored");
        Ok(())
    }

    async fn download(&self, run_id: &RunId, name: &str) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(run_id, name)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    name: format!("{run_id}/{name}"),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }
}
