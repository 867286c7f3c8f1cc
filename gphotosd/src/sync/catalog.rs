use std::path::Path;

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions, sqlite::SqliteRow};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::{Classify, ErrorKind};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ENTRY_COLUMNS: &str = "uuid, remote_id, download_url, mime_type, remote_filename, description, downloaded, local_directory, local_filename, byte_size, created_at, modified_at, synced_at, last_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    /// `(local_directory, local_filename)`
    LocalPath,
    RemoteId,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Sqlx(#[source] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unique constraint violated on {0:?}")]
    UniqueViolation(UniqueField),
    #[error("catalog entry {0} not found")]
    NotFound(Uuid),
    #[error("invalid uuid in catalog: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("invalid timestamp in catalog: {0}")]
    InvalidTimestamp(#[from] time::error::ComponentRange),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            let message = db_err.message();
            if message.contains("media_items.remote_id") {
                return CatalogError::UniqueViolation(UniqueField::RemoteId);
            }
            if message.contains("media_items.local_directory") {
                return CatalogError::UniqueViolation(UniqueField::LocalPath);
            }
        }
        CatalogError::Sqlx(err)
    }
}

impl Classify for CatalogError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            CatalogError::UniqueViolation(_) => Some(ErrorKind::StorageConflict),
            _ => Some(ErrorKind::StorageFailure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeClass {
    Photo,
    Video,
}

impl MimeClass {
    pub fn from_mime_type(mime_type: &str) -> Self {
        if mime_type.contains("video") {
            MimeClass::Video
        } else {
            MimeClass::Photo
        }
    }
}

/// Local record of one remote media item.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub uuid: Uuid,
    pub remote_id: String,
    /// Short-lived base URL; goes stale after roughly an hour.
    pub download_url: String,
    pub mime_type: String,
    pub remote_filename: String,
    pub description: Option<String>,
    pub downloaded: bool,
    pub local_directory: String,
    pub local_filename: String,
    pub byte_size: Option<i64>,
    pub created_at: Option<OffsetDateTime>,
    pub modified_at: Option<OffsetDateTime>,
    pub synced_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl CatalogEntry {
    pub fn mime_class(&self) -> MimeClass {
        MimeClass::from_mime_type(&self.mime_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub uuid: Uuid,
    pub remote_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub total: i64,
    pub downloaded: i64,
    pub errored: i64,
}

/// SQLite-backed catalog. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, CatalogError> {
        let pool = SqlitePool::connect(database_url).await?;
        let catalog = Self { pool };
        catalog.init().await?;
        Ok(catalog)
    }

    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let catalog = Self { pool };
        catalog.init().await?;
        Ok(catalog)
    }

    pub async fn init(&self) -> Result<(), CatalogError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Fails with [`CatalogError::UniqueViolation`] when the remote id or the
    /// local path is already taken.
    pub async fn insert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        sqlx::query(
            "INSERT INTO media_items (
                uuid,
                remote_id,
                download_url,
                mime_type,
                remote_filename,
                description,
                downloaded,
                local_directory,
                local_filename,
                byte_size,
                created_at,
                modified_at,
                synced_at,
                last_error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(entry.uuid.to_string())
        .bind(&entry.remote_id)
        .bind(&entry.download_url)
        .bind(&entry.mime_type)
        .bind(&entry.remote_filename)
        .bind(&entry.description)
        .bind(if entry.downloaded { 1 } else { 0 })
        .bind(&entry.local_directory)
        .bind(&entry.local_filename)
        .bind(entry.byte_size)
        .bind(entry.created_at.map(OffsetDateTime::unix_timestamp))
        .bind(entry.modified_at.map(OffsetDateTime::unix_timestamp))
        .bind(entry.synced_at.map(OffsetDateTime::unix_timestamp))
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, uuid: Uuid) -> Result<CatalogEntry, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM media_items WHERE uuid = ?1"
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => entry_from_row(&row),
            None => Err(CatalogError::NotFound(uuid)),
        }
    }

    pub async fn mark_synced(
        &self,
        uuid: Uuid,
        byte_size: u64,
        synced_at: OffsetDateTime,
    ) -> Result<(), CatalogError> {
        let size = i64::try_from(byte_size).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE media_items
             SET downloaded = 1, byte_size = ?1, synced_at = ?2, last_error = NULL
             WHERE uuid = ?3",
        )
        .bind(size)
        .bind(synced_at.unix_timestamp())
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(uuid));
        }
        Ok(())
    }

    pub async fn mark_errored(&self, uuid: Uuid, message: &str) -> Result<(), CatalogError> {
        let result = sqlx::query("UPDATE media_items SET last_error = ?1 WHERE uuid = ?2")
            .bind(message)
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(uuid));
        }
        Ok(())
    }

    pub async fn list_undownloaded_ids(&self) -> Result<Vec<PendingItem>, CatalogError> {
        let rows = sqlx::query(
            "SELECT uuid, remote_id FROM media_items WHERE downloaded = 0 ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let uuid: String = row.try_get("uuid")?;
            out.push(PendingItem {
                uuid: Uuid::parse_str(&uuid)?,
                remote_id: row.try_get("remote_id")?,
            });
        }
        Ok(out)
    }

    /// Returns false when no entry carries `remote_id`.
    pub async fn update_download_url(
        &self,
        remote_id: &str,
        download_url: &str,
    ) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE media_items SET download_url = ?1 WHERE remote_id = ?2")
            .bind(download_url)
            .bind(remote_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_cursor(&self) -> Result<Option<OffsetDateTime>, CatalogError> {
        let row = sqlx::query("SELECT last_index FROM sync_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let last_index: Option<i64> = row.try_get("last_index")?;
        Ok(last_index
            .map(OffsetDateTime::from_unix_timestamp)
            .transpose()?)
    }

    pub async fn set_cursor(&self, last_index: OffsetDateTime) -> Result<(), CatalogError> {
        sqlx::query(
            "INSERT INTO sync_cursor (id, last_index)
             VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_index = excluded.last_index",
        )
        .bind(last_index.unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM media_items ORDER BY local_directory ASC, local_filename ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Deletes every entry and resets the cursor, so the next sync is an initial scan.
    pub async fn truncate(&self) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM media_items")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_cursor")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<CatalogCounts, CatalogError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN downloaded = 1 THEN 1 ELSE 0 END), 0) AS downloaded,
                COALESCE(SUM(CASE WHEN downloaded = 0 AND last_error IS NOT NULL THEN 1 ELSE 0 END), 0) AS errored
             FROM media_items",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CatalogCounts {
            total: row.try_get("total")?,
            downloaded: row.try_get("downloaded")?,
            errored: row.try_get("errored")?,
        })
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry, CatalogError> {
    let uuid: String = row.try_get("uuid")?;
    let downloaded: i64 = row.try_get("downloaded")?;
    Ok(CatalogEntry {
        uuid: Uuid::parse_str(&uuid)?,
        remote_id: row.try_get("remote_id")?,
        download_url: row.try_get("download_url")?,
        mime_type: row.try_get("mime_type")?,
        remote_filename: row.try_get("remote_filename")?,
        description: row.try_get("description")?,
        downloaded: downloaded != 0,
        local_directory: row.try_get("local_directory")?,
        local_filename: row.try_get("local_filename")?,
        byte_size: row.try_get("byte_size")?,
        created_at: timestamp(row, "created_at")?,
        modified_at: timestamp(row, "modified_at")?,
        synced_at: timestamp(row, "synced_at")?,
        last_error: row.try_get("last_error")?,
    })
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<Option<OffsetDateTime>, CatalogError> {
    let value: Option<i64> = row.try_get(column)?;
    Ok(value.map(OffsetDateTime::from_unix_timestamp).transpose()?)
}
