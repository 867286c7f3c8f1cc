use std::collections::HashMap;

use gphotos_core::PhotosClient;
use uuid::Uuid;

use super::catalog::Catalog;
use super::download::DownloadQueuer;
use super::error::SyncError;

/// Upper bound accepted by the batch-get endpoint.
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries that were not downloaded when the sweep started.
    pub pending: usize,
    /// Entries whose link was refreshed and that were queued again.
    pub refreshed: usize,
    /// Entries the remote could not resolve; marked errored.
    pub missing: usize,
}

/// Re-queues every entry that never finished downloading, with fresh links.
pub struct Reconciler<'a, Q> {
    api: &'a PhotosClient,
    catalog: &'a Catalog,
    queue: &'a Q,
    batch_size: usize,
}

impl<'a, Q: DownloadQueuer> Reconciler<'a, Q> {
    pub fn new(api: &'a PhotosClient, catalog: &'a Catalog, queue: &'a Q) -> Self {
        Self {
            api,
            catalog,
            queue,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, DEFAULT_BATCH_SIZE);
        self
    }

    /// A failing batch aborts the sweep; earlier batches stay applied.
    pub async fn update(&self) -> Result<ReconcileReport, SyncError> {
        let pending = self.catalog.list_undownloaded_ids().await?;
        let mut report = ReconcileReport {
            pending: pending.len(),
            ..ReconcileReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(pending = pending.len(), "refreshing undownloaded entries");

        for batch in pending.chunks(self.batch_size) {
            let by_remote: HashMap<&str, Uuid> = batch
                .iter()
                .map(|item| (item.remote_id.as_str(), item.uuid))
                .collect();
            let remote_ids: Vec<String> = batch.iter().map(|item| item.remote_id.clone()).collect();
            let result = self.api.batch_get_items(&remote_ids).await?;

            for item in &result.items {
                let Some(uuid) = by_remote.get(item.id.as_str()) else {
                    tracing::warn!(remote_id = %item.id, "batch returned an unrequested item");
                    continue;
                };
                self.catalog
                    .update_download_url(&item.id, &item.base_url)
                    .await?;
                self.queue.queue_download(vec![*uuid]).await?;
                report.refreshed += 1;
            }

            for missing in &result.errors {
                let Some(uuid) = by_remote.get(missing.id.as_str()) else {
                    continue;
                };
                let message = format!(
                    "remote item unavailable ({}): {}",
                    missing.code, missing.message
                );
                tracing::warn!(uuid = %uuid, remote_id = %missing.id, %message, "skipping entry");
                self.catalog.mark_errored(*uuid, &message).await?;
                report.missing += 1;
            }
        }
        Ok(report)
    }
}
