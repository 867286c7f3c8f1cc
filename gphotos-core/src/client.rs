use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";

#[derive(Debug, Error)]
pub enum PhotosError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status} for {url}: {body}")]
    Api {
        status: StatusCode,
        url: String,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Unauthorized,
    /// 403; for content URLs this means the embedded token expired.
    Forbidden,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct PhotosClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl PhotosClient {
    pub fn new(token: impl Into<String>) -> Result<Self, PhotosError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, PhotosError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_item(&self, remote_id: &str) -> Result<MediaItem, PhotosError> {
        let url = self.endpoint(&format!("/v1/mediaItems/{remote_id}"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches up to 50 items at once. Ids the API could not resolve come back
    /// in `errors`, matched to the request by position.
    pub async fn batch_get_items(&self, remote_ids: &[String]) -> Result<BatchGetResult, PhotosError> {
        let mut url = self.endpoint("/v1/mediaItems:batchGet")?;
        {
            let mut query = url.query_pairs_mut();
            for id in remote_ids {
                query.append_pair("mediaItemIds", id);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: BatchGetResponse = Self::handle_response(response).await?;

        let mut result = BatchGetResult::default();
        for (index, entry) in payload.media_item_results.into_iter().enumerate() {
            match (entry.media_item, entry.status) {
                (Some(item), _) => result.items.push(item),
                (None, Some(status)) => result.errors.push(ItemError {
                    id: remote_ids.get(index).cloned().unwrap_or_default(),
                    code: status.code,
                    message: status.message,
                }),
                (None, None) => {}
            }
        }
        Ok(result)
    }

    pub async fn list_page(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, PhotosError> {
        let mut url = self.endpoint("/v1/mediaItems")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(token) = page_token.filter(|t| !t.is_empty()) {
                query.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn search_page(
        &self,
        start: SearchDate,
        end: SearchDate,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, PhotosError> {
        let url = self.endpoint("/v1/mediaItems:search")?;
        let body = SearchRequest {
            page_size,
            page_token: page_token.filter(|t| !t.is_empty()),
            filters: SearchFilters {
                date_filter: DateFilter {
                    ranges: vec![DateRange {
                        start_date: start,
                        end_date: end,
                    }],
                },
            },
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, PhotosError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PhotosError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(PhotosError::Api { status, url, body })
        }
    }
}

impl PhotosError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PhotosError::Api { status, .. } => Some(*status),
            PhotosError::Request(err) => err.status(),
            PhotosError::Url(_) => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        self.status().map(classify_api_status)
    }

    /// True for failures that never produced a usable HTTP response.
    pub fn is_transport(&self) -> bool {
        match self {
            PhotosError::Request(err) => {
                err.status().is_none() && !err.is_decode() && !err.is_builder()
            }
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.is_transport()
            || matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            )
    }
}

pub fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Unauthorized
    } else if status == StatusCode::FORBIDDEN {
        ApiErrorClass::Forbidden
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    pub base_url: String,
    pub mime_type: String,
    #[serde(default)]
    pub media_metadata: MediaMetadata,
    pub filename: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemsPage {
    #[serde(default)]
    pub media_items: Vec<MediaItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl MediaItemsPage {
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Default)]
pub struct BatchGetResult {
    pub items: Vec<MediaItem>,
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub id: String,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct SearchDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl SearchDate {
    pub const FAR_FUTURE: SearchDate = SearchDate {
        year: 2999,
        month: 12,
        day: 31,
    };
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    media_item_results: Vec<MediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemResult {
    #[serde(default)]
    media_item: Option<MediaItem>,
    #[serde(default)]
    status: Option<ResultStatus>,
}

#[derive(Debug, Deserialize)]
struct ResultStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    filters: SearchFilters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchFilters {
    date_filter: DateFilter,
}

#[derive(Debug, Serialize)]
struct DateFilter {
    ranges: Vec<DateRange>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange {
    start_date: SearchDate,
    end_date: SearchDate,
}
