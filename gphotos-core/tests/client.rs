use gphotos_core::{ApiErrorClass, PhotosClient, PhotosError, SearchDate, classify_api_status};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn media_item(id: &str, filename: &str) -> serde_json::Value {
    json!({
        "id": id,
        "productUrl": format!("https://photos.google.com/lr/photo/{id}"),
        "baseUrl": format!("https://lh3.googleusercontent.com/lr/{id}"),
        "mimeType": "image/jpeg",
        "mediaMetadata": {
            "creationTime": "2021-12-27T09:44:49Z",
            "width": "1080",
            "height": "2400",
            "photo": { "cameraMake": "Sony" }
        },
        "filename": filename
    })
}

#[tokio::test]
async fn get_item_includes_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems/ALU181g0"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(media_item("ALU181g0", "a.jpg")))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let item = client.get_item("ALU181g0").await.unwrap();

    assert_eq!(item.id, "ALU181g0");
    assert_eq!(item.filename, "a.jpg");
    assert_eq!(item.mime_type, "image/jpeg");
    assert_eq!(
        item.media_metadata.creation_time.as_deref(),
        Some("2021-12-27T09:44:49Z")
    );
}

#[tokio::test]
async fn list_page_passes_size_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .and(query_param("pageSize", "100"))
        .and(query_param("pageToken", "CkgKQnR5cG"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItems": [media_item("A", "a.jpg"), media_item("B", "b.jpg")],
            "nextPageToken": "next"
        })))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client.list_page(100, Some("CkgKQnR5cG")).await.unwrap();

    assert_eq!(page.media_items.len(), 2);
    assert_eq!(page.next_token(), Some("next"));
}

#[tokio::test]
async fn empty_list_page_has_no_next_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client.list_page(100, None).await.unwrap();

    assert!(page.media_items.is_empty());
    assert_eq!(page.next_token(), None);
}

#[tokio::test]
async fn search_page_posts_date_range_filter() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/mediaItems:search"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "pageSize": 100,
            "filters": {
                "dateFilter": {
                    "ranges": [{
                        "startDate": { "year": 2022, "month": 3, "day": 4 },
                        "endDate": { "year": 2999, "month": 12, "day": 31 }
                    }]
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItems": [media_item("A", "a.jpg")]
        })))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let start = SearchDate {
        year: 2022,
        month: 3,
        day: 4,
    };
    let page = client
        .search_page(start, SearchDate::FAR_FUTURE, 100, None)
        .await
        .unwrap();

    assert_eq!(page.media_items.len(), 1);
    assert_eq!(page.next_token(), None);
}

#[tokio::test]
async fn batch_get_splits_items_and_positional_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems:batchGet"))
        .and(query_param("mediaItemIds", "A"))
        .and(query_param("mediaItemIds", "B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mediaItemResults": [
                { "mediaItem": media_item("A", "a.jpg") },
                { "status": { "code": 5, "message": "media item not found" } }
            ]
        })))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let ids = vec!["A".to_string(), "B".to_string()];
    let result = client.batch_get_items(&ids).await.unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].id, "A");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].id, "B");
    assert_eq!(result.errors[0].code, 5);
    assert_eq!(result.errors[0].message, "media item not found");
}

#[tokio::test]
async fn api_error_keeps_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/mediaItems/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
        })))
        .mount(&server)
        .await;

    let client = PhotosClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.get_item("missing").await.unwrap_err();

    match &err {
        PhotosError::Api { status, body, .. } => {
            assert_eq!(*status, StatusCode::NOT_FOUND);
            assert!(body.contains("NOT_FOUND"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(!err.is_retryable());
}

#[test]
fn classifies_statuses() {
    assert_eq!(
        classify_api_status(StatusCode::FORBIDDEN),
        ApiErrorClass::Forbidden
    );
    assert_eq!(
        classify_api_status(StatusCode::UNAUTHORIZED),
        ApiErrorClass::Unauthorized
    );
    assert_eq!(
        classify_api_status(StatusCode::TOO_MANY_REQUESTS),
        ApiErrorClass::RateLimit
    );
    assert_eq!(
        classify_api_status(StatusCode::BAD_GATEWAY),
        ApiErrorClass::Transient
    );
    assert_eq!(
        classify_api_status(StatusCode::BAD_REQUEST),
        ApiErrorClass::Permanent
    );
}
