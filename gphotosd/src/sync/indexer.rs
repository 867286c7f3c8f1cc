use gphotos_core::{MediaItem, PhotosClient, SearchDate};
use time::format_description::well_known::Rfc3339;
use time::macros::datetime;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use super::catalog::{Catalog, CatalogEntry, CatalogError, UniqueField};
use super::download::DownloadQueuer;
use super::error::SyncError;
use super::paths::{local_directory_for, numbered_filename};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Filing date for items whose creation time is missing or unreadable.
const UNDATED: OffsetDateTime = datetime!(0001-01-01 00:00:00 UTC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// No cursor yet: walk the whole library.
    Initial,
    /// Search from the cursor's UTC date onwards.
    Delta { since: SearchDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: ScanMode,
    /// New entries inserted and queued for download.
    pub indexed: usize,
    /// Subset of `indexed` that needed a numbered filename.
    pub renamed: usize,
    /// Items already present in the catalog.
    pub skipped: usize,
    /// Subset of `indexed` filed under the undated `1/1/1` directory.
    pub undated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { renamed: bool },
    Skipped,
}

/// Discovers remote items and records them in the catalog.
pub struct Indexer<'a, Q> {
    api: &'a PhotosClient,
    catalog: &'a Catalog,
    queue: &'a Q,
    page_size: u32,
}

impl<'a, Q: DownloadQueuer> Indexer<'a, Q> {
    pub fn new(api: &'a PhotosClient, catalog: &'a Catalog, queue: &'a Q) -> Self {
        Self {
            api,
            catalog,
            queue,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    /// Runs an initial or delta scan. On success the cursor moves to the time
    /// this call started; on failure it is left untouched.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let started_at = OffsetDateTime::now_utc();
        let mode = match self.catalog.get_cursor().await? {
            None => ScanMode::Initial,
            Some(cursor) => ScanMode::Delta {
                since: search_date(cursor),
            },
        };
        tracing::info!(?mode, "indexing remote library");

        let mut report = SyncReport {
            mode,
            indexed: 0,
            renamed: 0,
            skipped: 0,
            undated: 0,
        };
        let mut page_token: Option<String> = None;
        loop {
            let page = match mode {
                ScanMode::Initial => {
                    self.api
                        .list_page(self.page_size, page_token.as_deref())
                        .await?
                }
                ScanMode::Delta { since } => {
                    self.api
                        .search_page(
                            since,
                            SearchDate::FAR_FUTURE,
                            self.page_size,
                            page_token.as_deref(),
                        )
                        .await?
                }
            };
            let next = page.next_token().map(str::to_string);
            self.process_items(page.media_items, &mut report).await?;
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.catalog.set_cursor(started_at).await?;
        Ok(report)
    }

    async fn process_items(
        &self,
        items: Vec<MediaItem>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for item in items {
            let mut entry = candidate_from_item(item);
            match self.insert_with_rename(&mut entry).await? {
                InsertOutcome::Inserted { renamed } => {
                    report.indexed += 1;
                    if renamed {
                        report.renamed += 1;
                    }
                    if entry.created_at.is_none() {
                        report.undated += 1;
                    }
                    self.queue.queue_download(vec![entry.uuid]).await?;
                }
                InsertOutcome::Skipped => {
                    tracing::trace!(remote_id = %entry.remote_id, "already indexed");
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Inserts `entry`, appending `_002`, `_003`, ... to its filename until
    /// the local path is free. Each suffix is derived from the remote filename.
    async fn insert_with_rename(
        &self,
        entry: &mut CatalogEntry,
    ) -> Result<InsertOutcome, CatalogError> {
        let mut counter = 1u32;
        loop {
            match self.catalog.insert(entry).await {
                Ok(()) => return Ok(InsertOutcome::Inserted { renamed: counter > 1 }),
                Err(CatalogError::UniqueViolation(UniqueField::RemoteId)) => {
                    return Ok(InsertOutcome::Skipped);
                }
                Err(CatalogError::UniqueViolation(UniqueField::LocalPath)) => {
                    counter += 1;
                    entry.local_filename = numbered_filename(&entry.remote_filename, counter);
                    tracing::debug!(
                        remote_id = %entry.remote_id,
                        filename = %entry.local_filename,
                        "local path taken; renaming"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn search_date(cursor: OffsetDateTime) -> SearchDate {
    let utc = cursor.to_offset(UtcOffset::UTC);
    SearchDate {
        year: utc.year(),
        month: u8::from(utc.month()),
        day: utc.day(),
    }
}

fn candidate_from_item(item: MediaItem) -> CatalogEntry {
    let created = match item.media_metadata.creation_time.as_deref() {
        None => {
            tracing::warn!(remote_id = %item.id, "no creation time; filing as undated");
            None
        }
        Some(raw) => match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(created) => Some(created),
            Err(err) => {
                tracing::warn!(
                    remote_id = %item.id,
                    creation_time = raw,
                    error = %err,
                    "unreadable creation time; filing as undated"
                );
                None
            }
        },
    };

    CatalogEntry {
        uuid: Uuid::new_v4(),
        local_directory: local_directory_for(created.unwrap_or(UNDATED)),
        local_filename: item.filename.clone(),
        remote_id: item.id,
        download_url: item.base_url,
        mime_type: item.mime_type,
        remote_filename: item.filename,
        description: item.description.filter(|d| !d.is_empty()),
        downloaded: false,
        byte_size: None,
        created_at: created,
        modified_at: None,
        synced_at: None,
        last_error: None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use uuid::Uuid;

    use crate::sync::download::DownloadQueuer;
    use crate::sync::pool::PoolError;

    /// Collects queued ids instead of downloading them.
    #[derive(Default)]
    pub struct RecordingQueuer {
        pub queued: Mutex<Vec<Uuid>>,
    }

    impl RecordingQueuer {
        pub fn ids(&self) -> Vec<Uuid> {
            self.queued.lock().unwrap().clone()
        }
    }

    impl DownloadQueuer for RecordingQueuer {
        async fn queue_download(&self, ids: Vec<Uuid>) -> Result<(), PoolError> {
            self.queued.lock().unwrap().extend(ids);
            Ok(())
        }
    }

    /// Accepts a fixed number of ids, then reports the pool closed.
    pub struct ClosingQueuer {
        accept: usize,
        inner: RecordingQueuer,
    }

    impl ClosingQueuer {
        pub fn accepting(accept: usize) -> Self {
            Self {
                accept,
                inner: RecordingQueuer::default(),
            }
        }

        pub fn ids(&self) -> Vec<Uuid> {
            self.inner.ids()
        }
    }

    impl DownloadQueuer for ClosingQueuer {
        async fn queue_download(&self, ids: Vec<Uuid>) -> Result<(), PoolError> {
            if self.inner.ids().len() + ids.len() > self.accept {
                return Err(PoolError::Closed);
            }
            self.inner.queue_download(ids).await
        }
    }
}
