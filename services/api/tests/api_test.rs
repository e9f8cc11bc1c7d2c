use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gifgroup_api::config::ApiConfig;
use gifgroup_api::{
    create_router, start_api_server, AppState, AssetUploader, GifGroupService, KvStore,
    MemoryKvStore, MemoryObjectStore, RecordStore, SequenceManager,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

const BASE_URL: &str = "https://cc-gifgroup-api.s3.us-east-1.amazonaws.com";
const BOUNDARY: &str = "gifgroup-test-boundary";

struct TestApp {
    router: Router,
    kv: Arc<MemoryKvStore>,
    objects: Arc<MemoryObjectStore>,
}

fn app_state(kv: Arc<MemoryKvStore>, objects: Arc<MemoryObjectStore>) -> AppState {
    let sequences = Arc::new(SequenceManager::new(kv.clone()));
    let service = GifGroupService::new(
        sequences,
        Arc::new(RecordStore::new(kv.clone())),
        Arc::new(AssetUploader::new(objects, "default/group-default.gif")),
    );

    AppState {
        service,
        kv_store: kv,
        shutdown: CancellationToken::new(),
        request_timeout: Duration::from_secs(5),
    }
}

async fn test_app() -> TestApp {
    let kv = Arc::new(MemoryKvStore::new());
    let objects = Arc::new(MemoryObjectStore::new(BASE_URL));

    SequenceManager::new(kv.clone())
        .recover_all()
        .await
        .unwrap();

    TestApp {
        router: create_router(app_state(kv.clone(), objects.clone()), &ApiConfig::default()),
        kv,
        objects,
    }
}

/// Build a multipart/form-data body from (name, filename, bytes) parts
fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, bytes) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: image/gif\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(bytes.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn post_form(
    app: &TestApp,
    uri: &str,
    parts: &[(&str, Option<&str>, &str)],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();

    send(app, request).await
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_create_and_list_scenario() {
    let app = test_app().await;
    let default_url = format!("{}/default/group-default.gif", BASE_URL);

    let (status, body) = post_form(&app, "/groups", &[("name", None, "Cats")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["content"],
        serde_json::json!({"id": 1, "name": "Cats", "image_url": default_url})
    );

    let (status, body) = post_form(&app, "/groups", &[("name", None, "")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["content"],
        serde_json::json!({"id": 2, "name": "Unnamed Group", "image_url": default_url})
    );

    let (status, body) =
        post_form(&app, "/groups/2/gifs", &[("image", Some("a.gif"), "b")]).await;
    assert_eq!(status, StatusCode::OK);
    let gif = serde_json::json!({
        "id": 1,
        "group_id": 2,
        "image_url": format!("{}/groups/2/gifs/a.gif", BASE_URL)
    });
    assert_eq!(body["content"], gif);
    assert_eq!(
        app.objects.object("groups/2/gifs/a.gif").unwrap().body.as_ref(),
        b"b"
    );

    let (status, body) = get(&app, "/groups/2/gifs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], serde_json::json!([gif]));

    let (_, body) = get(&app, "/groups/1/gifs").await;
    assert_eq!(body["content"], serde_json::json!([]));

    let (_, body) = get(&app, "/groups").await;
    let mut ids: Vec<u64> = body["content"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["id"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_create_group_without_body() {
    let app = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/groups")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"]["name"], "Unnamed Group");
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn test_create_group_with_image() {
    let app = test_app().await;

    let (_, body) = post_form(
        &app,
        "/groups",
        &[("name", None, "Dogs"), ("image", Some("dog.gif"), "GIF89a")],
    )
    .await;

    assert_eq!(
        body["content"]["image_url"],
        format!("{}/groups/1/dog.gif", BASE_URL)
    );
}

#[tokio::test]
async fn test_gif_without_image_is_bad_request() {
    let app = test_app().await;

    let (status, body) = post_form(&app, "/groups/1/gifs", &[("name", None, "x")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], 4);
    assert_eq!(body["error_text"], "Invalid or missing image");
    assert!(body["content"].is_null());

    assert!(app.kv.get("gif:1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_file_field_counts_as_missing() {
    let app = test_app().await;

    let (status, body) = post_form(&app, "/groups/1/gifs", &[("image", Some(""), "")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 4);
}

#[tokio::test]
async fn test_invalid_group_id() {
    let app = test_app().await;

    let (status, body) = get(&app, "/groups/abc/gifs").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 4);
    assert_eq!(body["status_text"], "Bad Request");
    assert_eq!(body["error_text"], "Invalid group id");

    let (status, _) =
        post_form(&app, "/groups/abc/gifs", &[("image", Some("a.gif"), "b")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn test_empty_group_list() {
    let app = test_app().await;

    let (status, body) = get(&app, "/groups").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], serde_json::json!([]));
    assert_eq!(body["error_code"], 0);
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = test_app().await;

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_server_reports_bind_failure() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ApiConfig {
        host: "127.0.0.1".to_string(),
        port: taken.local_addr().unwrap().port(),
        ..Default::default()
    };

    let state = app_state(
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemoryObjectStore::new(BASE_URL)),
    );
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        start_api_server(state, &config, CancellationToken::new()),
    )
    .await
    .expect("server should fail instead of serving");

    assert!(res.is_err());
}
