use anyhow::Context;
use gphotos_core::PhotosClient;

use crate::config::MirrorConfig;
use crate::sync::catalog::{Catalog, CatalogCounts};
use crate::sync::download::{DownloadContext, DownloadService};
use crate::sync::indexer::{Indexer, SyncReport};
use crate::sync::reconcile::{ReconcileReport, Reconciler};
use crate::sync::transfer::TransferClient;

pub async fn open_catalog(config: &MirrorConfig) -> anyhow::Result<Catalog> {
    Catalog::open(&config.database_path).await.with_context(|| {
        format!(
            "failed to open catalog at {}",
            config.database_path.display()
        )
    })
}

/// Clears every catalog entry and the sync cursor.
pub async fn truncate(config: &MirrorConfig) -> anyhow::Result<()> {
    let catalog = open_catalog(config).await?;
    catalog
        .truncate()
        .await
        .context("failed to truncate catalog")?;
    tracing::info!(database = %config.database_path.display(), "catalog truncated");
    Ok(())
}

pub async fn status(config: &MirrorConfig) -> anyhow::Result<CatalogCounts> {
    let catalog = open_catalog(config).await?;
    Ok(catalog.counts().await.context("failed to count catalog entries")?)
}

#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub reconcile: ReconcileReport,
    pub sync: SyncReport,
}

pub struct MirrorRuntime {
    config: MirrorConfig,
    api: PhotosClient,
    catalog: Catalog,
}

impl MirrorRuntime {
    pub async fn bootstrap(config: MirrorConfig) -> anyhow::Result<Self> {
        let token = config
            .token
            .clone()
            .context("GPHOTOS_TOKEN is not set")?;
        tokio::fs::create_dir_all(&config.storage_root)
            .await
            .with_context(|| {
                format!(
                    "failed to create storage root at {}",
                    config.storage_root.display()
                )
            })?;
        let api = PhotosClient::with_base_url(&config.api_base_url, token)
            .context("invalid photos api configuration")?;
        let catalog = open_catalog(&config).await?;

        Ok(Self {
            config,
            api,
            catalog,
        })
    }

    /// Reconciles pending entries, indexes new items, then waits for every
    /// queued download to finish. Downloads are drained even when a step fails.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        tracing::info!(
            storage_root = %self.config.storage_root.display(),
            workers = self.config.workers,
            "mirror run started"
        );
        let service = DownloadService::start(
            DownloadContext {
                api: self.api.clone(),
                transfer: TransferClient::new(&self.config.temp_dir),
                catalog: self.catalog.clone(),
                retry: self.config.retry_policy(),
                storage_root: self.config.storage_root.clone(),
            },
            self.config.workers,
        );

        let outcome = self.drive(&service).await;
        service.finish().await;

        let report = outcome?;
        tracing::info!(
            pending = report.reconcile.pending,
            refreshed = report.reconcile.refreshed,
            missing = report.reconcile.missing,
            mode = ?report.sync.mode,
            indexed = report.sync.indexed,
            renamed = report.sync.renamed,
            skipped = report.sync.skipped,
            undated = report.sync.undated,
            "sync completed"
        );
        Ok(report)
    }

    async fn drive(&self, service: &DownloadService) -> anyhow::Result<RunReport> {
        let reconcile = Reconciler::new(&self.api, &self.catalog, service)
            .with_batch_size(self.config.batch_size)
            .update()
            .await
            .context("failed to reconcile undownloaded entries")?;
        let sync = Indexer::new(&self.api, &self.catalog, service)
            .with_page_size(self.config.page_size)
            .sync()
            .await
            .context("failed to index remote library")?;
        Ok(RunReport { reconcile, sync })
    }
}
