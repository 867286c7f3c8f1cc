pub mod backoff;
pub mod catalog;
pub mod download;
pub mod error;
pub mod indexer;
pub mod paths;
pub mod pool;
pub mod reconcile;
pub mod transfer;
