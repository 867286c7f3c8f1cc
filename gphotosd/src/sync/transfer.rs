use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;
use uuid::Uuid;

use super::catalog::MimeClass;
use super::error::{Classify, ErrorKind, kind_for_status};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("content request returned {status} for {url}")]
    Status { status: StatusCode, url: String },
}

impl TransferError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransferError::Status { status, .. } => Some(*status),
            TransferError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_link_expired(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }
}

impl Classify for TransferError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            TransferError::Status { status, .. } => Some(kind_for_status(*status)),
            TransferError::Request(err) => match err.status() {
                Some(status) => Some(kind_for_status(status)),
                None if err.is_decode() || err.is_builder() => Some(ErrorKind::PermanentApi),
                None => Some(ErrorKind::TransientTransport),
            },
            TransferError::Io(_) => Some(ErrorKind::StorageFailure),
            TransferError::Url(_) => Some(ErrorKind::PermanentApi),
        }
    }
}

/// Streams media content into private temp files.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    temp_dir: PathBuf,
}

impl TransferClient {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self::with_http(Client::new(), temp_dir)
    }

    pub fn with_http(http: Client, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Downloads the full-resolution content behind `base_url` and returns the
    /// temp file holding it. The caller owns (and must remove or promote) the file.
    pub async fn fetch_content(
        &self,
        base_url: &str,
        class: MimeClass,
    ) -> Result<PathBuf, TransferError> {
        let url = content_url(base_url, class)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status,
                url: response.url().to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let temp = self.temp_dir.join(format!("gphoto.{}.tmp", Uuid::new_v4()));
        if let Err(err) = write_stream(response, &temp).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(path = %temp.display(), error = %cleanup, "failed to remove temp file");
            }
            return Err(err);
        }
        Ok(temp)
    }
}

async fn write_stream(response: reqwest::Response, target: &Path) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Photos need `=d` to fetch original bytes; videos need `=dv`.
pub fn content_url(base_url: &str, class: MimeClass) -> Result<Url, url::ParseError> {
    let suffix = match class {
        MimeClass::Photo => "=d",
        MimeClass::Video => "=dv",
    };
    Url::parse(&format!("{base_url}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn appends_download_suffix_by_media_class() {
        assert_eq!(
            content_url("https://lh3.example.com/abc", MimeClass::Photo)
                .unwrap()
                .as_str(),
            "https://lh3.example.com/abc=d"
        );
        assert_eq!(
            content_url("https://lh3.example.com/abc", MimeClass::Video)
                .unwrap()
                .as_str(),
            "https://lh3.example.com/abc=dv"
        );
    }

    #[tokio::test]
    async fn streams_content_into_temp_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/abc=d"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = TransferClient::new(dir.path());
        let temp = client
            .fetch_content(&format!("{}/media/abc", server.uri()), MimeClass::Photo)
            .await
            .unwrap();

        assert_eq!(temp.parent(), Some(dir.path()));
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("gphoto.") && name.ends_with(".tmp"));
        assert_eq!(std::fs::read(&temp).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn forbidden_is_link_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/abc=dv"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = TransferClient::new(dir.path());
        let err = client
            .fetch_content(&format!("{}/media/abc", server.uri()), MimeClass::Video)
            .await
            .unwrap_err();

        assert!(err.is_link_expired());
        assert_eq!(err.kind(), Some(ErrorKind::LinkExpired));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = TransferClient::new(dir.path());
        let err = client
            .fetch_content(&format!("{}/media/abc", server.uri()), MimeClass::Photo)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::TransientTransport));
        assert!(!err.is_link_expired());
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let dir = tempdir().unwrap();
        let client = TransferClient::new(dir.path());
        let err = client
            .fetch_content("http://127.0.0.1:9/media/abc", MimeClass::Photo)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::TransientTransport));
    }
}
