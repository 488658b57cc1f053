use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::WorkerError;

/// Object storage holding submitted artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copies the object stored under `key` into the file `destination`
    async fn download(&self, key: &str, destination: &Path) -> anyhow::Result<()>;
}

/// Artifact store backed by a local directory, keys are relative paths
pub struct LocalArtifactStore {
    bucket: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(bucket: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let key_path = Path::new(key);
        if key.is_empty()
            || key_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("invalid artifact key {key:?}");
        }
        Ok(self.bucket.join(key_path))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn download(&self, key: &str, destination: &Path) -> anyhow::Result<()> {
        let source = self.resolve(key)?;
        tokio::fs::copy(&source, destination)
            .await
            .with_context(|| format!("copying {} from bucket", source.display()))?;
        Ok(())
    }
}

/// A downloaded artifact inside its own scratch directory
///
/// The directory holds exactly this one file and belongs to a single job.
/// It is removed by [`Artifact::release`], or on drop if the job unwinds
/// before getting there.
#[derive(Debug)]
pub struct Artifact {
    dir: TempDir,
    path: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the scratch directory, logging rather than failing
    pub fn release(self) {
        let dir = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => log::debug!("Deleted scratch directory {}", dir.display()),
            Err(e) => log::warn!("Failed to delete scratch directory {}: {e}", dir.display()),
        }
    }
}

/// Materializes job artifacts into fresh scratch directories
pub struct ArtifactFetcher {
    store: Arc<dyn ArtifactStore>,
    scratch_root: PathBuf,
}

impl ArtifactFetcher {
    pub fn new(store: Arc<dyn ArtifactStore>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Downloads `artifact_ref` into a new, uniquely named scratch directory
    ///
    /// The file keeps the artifact's base name. On failure the partially
    /// populated directory is removed before returning.
    pub async fn fetch(&self, job_id: &str, artifact_ref: &str) -> Result<Artifact, WorkerError> {
        let file_name = Path::new(artifact_ref)
            .file_name()
            .ok_or_else(|| {
                WorkerError::Retrieval(format!("artifact reference {artifact_ref:?} has no file name"))
            })?
            .to_owned();

        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| {
                WorkerError::Retrieval(format!(
                    "creating scratch root {}: {e}",
                    self.scratch_root.display()
                ))
            })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("submission-{}-", sanitize(job_id)))
            .tempdir_in(&self.scratch_root)
            .map_err(|e| WorkerError::Retrieval(format!("creating scratch directory: {e}")))?;
        let path = dir.path().join(file_name);

        let artifact = Artifact { dir, path };
        if let Err(e) = self.store.download(artifact_ref, &artifact.path).await {
            artifact.release();
            return Err(WorkerError::Retrieval(format!("{e:#}")));
        }

        log::debug!("Fetched {artifact_ref} to {}", artifact.path.display());
        Ok(artifact)
    }
}

/// Keeps job ids usable inside a directory name
fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
