mod client;

pub use client::{
    ApiErrorClass, BatchGetResult, ItemError, MediaItem, MediaItemsPage, MediaMetadata,
    PhotosClient, PhotosError, SearchDate, classify_api_status,
};
