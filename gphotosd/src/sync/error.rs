use std::collections::HashSet;

use gphotos_core::{ApiErrorClass, PhotosError, classify_api_status};
use reqwest::StatusCode;
use thiserror::Error;

use super::catalog::CatalogError;
use super::pool::PoolError;

/// Closed taxonomy used by retry policies and the sync drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network failure or 5xx-class response.
    TransientTransport,
    /// HTTP 403 on a content URL.
    LinkExpired,
    /// Any other 4xx, or a response we could not decode.
    PermanentApi,
    /// Uniqueness violation in the catalog.
    StorageConflict,
    /// Any other persistence or local filesystem failure.
    StorageFailure,
}

/// Implemented by every error in the pipeline. Wrapper errors usually carry
/// no kind of their own and expose the wrapped cause through `inner`.
pub trait Classify {
    fn kind(&self) -> Option<ErrorKind>;

    fn inner(&self) -> Option<&dyn Classify> {
        None
    }
}

/// Walks `err` and its wrapped causes until one carries a kind in `kinds`.
pub fn chain_matches(err: &dyn Classify, kinds: &HashSet<ErrorKind>) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(kind) = err.kind()
            && kinds.contains(&kind)
        {
            return true;
        }
        current = err.inner();
    }
    false
}

pub fn kind_for_status(status: StatusCode) -> ErrorKind {
    match classify_api_status(status) {
        ApiErrorClass::Forbidden => ErrorKind::LinkExpired,
        ApiErrorClass::RateLimit | ApiErrorClass::Transient => ErrorKind::TransientTransport,
        ApiErrorClass::Unauthorized | ApiErrorClass::Permanent => ErrorKind::PermanentApi,
    }
}

impl Classify for PhotosError {
    fn kind(&self) -> Option<ErrorKind> {
        if self.is_transport() {
            return Some(ErrorKind::TransientTransport);
        }
        Some(
            self.status()
                .map(kind_for_status)
                .unwrap_or(ErrorKind::PermanentApi),
        )
    }
}

/// Failure of a sync or reconciliation run. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("api error: {0}")]
    Api(#[from] PhotosError),
    #[error("download queue rejected work: {0}")]
    Queue(#[from] PoolError),
}

impl Classify for SyncError {
    fn kind(&self) -> Option<ErrorKind> {
        None
    }

    fn inner(&self) -> Option<&dyn Classify> {
        match self {
            SyncError::Catalog(err) => Some(err),
            SyncError::Api(err) => Some(err),
            SyncError::Queue(_) => None,
        }
    }
}
