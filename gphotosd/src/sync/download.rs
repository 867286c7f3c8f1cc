use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gphotos_core::{PhotosClient, PhotosError};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::backoff::RetryPolicy;
use super::catalog::{Catalog, CatalogEntry, CatalogError};
use super::error::{Classify, ErrorKind};
use super::paths::{PathError, local_path_for};
use super::pool::{PoolError, WorkerPool};
use super::transfer::{TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("metadata refresh failed: {0}")]
    Api(#[from] PhotosError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("invalid local path: {0}")]
    Path(#[from] PathError),
    #[error("failed to place downloaded file: {0}")]
    Io(#[from] io::Error),
}

impl Classify for DownloadError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            DownloadError::Catalog(_) | DownloadError::Api(_) | DownloadError::Transfer(_) => None,
            DownloadError::Path(_) | DownloadError::Io(_) => Some(ErrorKind::StorageFailure),
        }
    }

    fn inner(&self) -> Option<&dyn Classify> {
        match self {
            DownloadError::Catalog(err) => Some(err),
            DownloadError::Api(err) => Some(err),
            DownloadError::Transfer(err) => Some(err),
            _ => None,
        }
    }
}

/// Everything a download job needs; shared by all jobs of a run.
#[derive(Clone)]
pub struct DownloadContext {
    pub api: PhotosClient,
    pub transfer: TransferClient,
    pub catalog: Catalog,
    pub retry: RetryPolicy,
    pub storage_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadySynced,
    Synced { path: PathBuf, bytes: u64 },
}

/// Downloads one catalog entry to its final location.
pub struct DownloadJob {
    id: Uuid,
    ctx: Arc<DownloadContext>,
}

impl DownloadJob {
    pub fn new(id: Uuid, ctx: Arc<DownloadContext>) -> Self {
        Self { id, ctx }
    }

    /// Runs the job to completion. Failures end up in the entry's `last_error`.
    pub async fn run(self) {
        match self.process().await {
            Ok(DownloadOutcome::AlreadySynced) => {
                tracing::debug!(uuid = %self.id, "entry already downloaded");
            }
            Ok(DownloadOutcome::Synced { path, bytes }) => {
                tracing::info!(uuid = %self.id, path = %path.display(), bytes, "downloaded");
            }
            Err(err) => {
                tracing::warn!(uuid = %self.id, error = %err, "download failed");
                if let Err(mark_err) = self.ctx.catalog.mark_errored(self.id, &err.to_string()).await {
                    tracing::error!(uuid = %self.id, error = %mark_err, "failed to record download error");
                }
            }
        }
    }

    pub async fn process(&self) -> Result<DownloadOutcome, DownloadError> {
        let mut entry = self.ctx.catalog.get(self.id).await?;
        if entry.downloaded {
            return Ok(DownloadOutcome::AlreadySynced);
        }

        let mut retry = self.ctx.retry.create();
        let temp = loop {
            match self.fetch_content(&mut entry).await {
                Ok(temp) => break temp,
                Err(err) => {
                    if !retry.should_retry(&err) {
                        return Err(err);
                    }
                    let delay = retry.wait().await;
                    tracing::debug!(
                        uuid = %self.id,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying download"
                    );
                }
            }
        };

        let placed = self.place(&entry, &temp).await;
        let (path, bytes) = match placed {
            Ok(placed) => placed,
            Err(err) => {
                discard_temp(&temp).await;
                return Err(err);
            }
        };
        self.ctx
            .catalog
            .mark_synced(self.id, bytes, OffsetDateTime::now_utc())
            .await?;
        Ok(DownloadOutcome::Synced { path, bytes })
    }

    /// One attempt, including at most one link refresh after a 403.
    async fn fetch_content(&self, entry: &mut CatalogEntry) -> Result<PathBuf, DownloadError> {
        let class = entry.mime_class();
        let err = match self.ctx.transfer.fetch_content(&entry.download_url, class).await {
            Ok(temp) => return Ok(temp),
            Err(err) if err.is_link_expired() => err,
            Err(err) => return Err(err.into()),
        };

        let item = self.ctx.api.get_item(&entry.remote_id).await?;
        if item.base_url == entry.download_url {
            return Err(err.into());
        }
        tracing::debug!(uuid = %self.id, remote_id = %entry.remote_id, "download link refreshed");
        self.ctx
            .catalog
            .update_download_url(&entry.remote_id, &item.base_url)
            .await?;
        entry.download_url = item.base_url;

        Ok(self
            .ctx
            .transfer
            .fetch_content(&entry.download_url, class)
            .await?)
    }

    async fn place(&self, entry: &CatalogEntry, temp: &Path) -> Result<(PathBuf, u64), DownloadError> {
        let target = local_path_for(
            &self.ctx.storage_root,
            &entry.local_directory,
            &entry.local_filename,
        )?;
        let bytes = promote(&self.ctx.storage_root, temp, &target).await?;
        Ok((target, bytes))
    }
}

/// Moves `temp` to `target`, overwriting it, and returns the final size.
/// Falls back to `copy_into_place` when a rename is not possible.
pub async fn promote(storage_root: &Path, temp: &Path, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        create_dirs_like(storage_root, parent).await?;
    }
    if let Err(rename_err) = tokio::fs::rename(temp, target).await {
        tracing::debug!(error = %rename_err, "rename failed; copying instead");
        copy_into_place(temp, target).await?;
    }
    Ok(tokio::fs::metadata(target).await?.len())
}

/// Copies `temp` over `target`, then removes `temp`. Once the copy has
/// landed the download counts as placed: a failed removal is only logged
/// and leaves a stray temp file behind.
async fn copy_into_place(temp: &Path, target: &Path) -> io::Result<()> {
    tokio::fs::copy(temp, target).await?;
    discard_temp(temp).await;
    Ok(())
}

#[cfg(unix)]
async fn create_dirs_like(storage_root: &Path, dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = tokio::fs::metadata(storage_root).await?.permissions().mode() & 0o7777;
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(mode);
    builder.create(dir).await
}

#[cfg(not(unix))]
async fn create_dirs_like(_storage_root: &Path, dir: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

async fn discard_temp(temp: &Path) {
    if let Err(err) = tokio::fs::remove_file(temp).await
        && err.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %err, "failed to remove temp file");
    }
}

/// Seam between the sync drivers and the download scheduler.
pub trait DownloadQueuer: Sync {
    /// Waits for intake capacity rather than dropping ids.
    fn queue_download(&self, ids: Vec<Uuid>) -> impl Future<Output = Result<(), PoolError>> + Send;
}

/// Worker pool running [`DownloadJob`]s for one process run.
pub struct DownloadService {
    ctx: Arc<DownloadContext>,
    pool: WorkerPool,
}

impl DownloadService {
    pub fn start(ctx: DownloadContext, workers: usize) -> Self {
        let mut pool = WorkerPool::new(workers);
        pool.start();
        Self {
            ctx: Arc::new(ctx),
            pool,
        }
    }

    /// Waits for every submitted download to finish.
    pub async fn finish(self) {
        self.pool.stop().await;
    }
}

impl DownloadQueuer for DownloadService {
    async fn queue_download(&self, ids: Vec<Uuid>) -> Result<(), PoolError> {
        for id in ids {
            let job = DownloadJob::new(id, Arc::clone(&self.ctx));
            self.pool.submit(Box::pin(job.run())).await?;
        }
        Ok(())
    }
}
