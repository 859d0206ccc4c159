use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use file_service::{
    create_router, ApiSettings, AppState, Config, FileStore, Relay, StorageArea,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----file-service-test-boundary";

struct TestApp {
    _tmp: TempDir,
    store: Arc<FileStore>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::default(), "http://127.0.0.1:9/saveFile")
    }

    fn with_config(config: Config, relay_endpoint: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("files")).unwrap();
        std::fs::create_dir(tmp.path().join("uploads")).unwrap();

        let store = Arc::new(FileStore::new(
            tmp.path().join("files"),
            tmp.path().join("uploads"),
        ));
        let relay = Arc::new(Relay::new(
            store.clone(),
            reqwest::Client::new(),
            relay_endpoint,
            Duration::from_secs(5),
        ));
        let state = AppState {
            store: store.clone(),
            relay,
            settings: Arc::new(ApiSettings::from_config(&config)),
        };
        let router = create_router(state, &tmp.path().join("files"));

        Self {
            _tmp: tmp,
            store,
            router,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body.to_vec())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn stored(&self, area: StorageArea, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.store.directory(area).resolve_path(name)).ok()
    }
}

fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("file", filename, data)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, json) = app.send_json(get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_save_then_list() {
    let app = TestApp::new();

    let (status, json) = app
        .send_json(upload_request("/saveFile", "cat.jpg", b"meow"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);
    assert_eq!(json["message"], "success");
    assert!(json["data"]["path"].as_str().unwrap().ends_with("cat.jpg"));

    app.send_json(upload_request("/saveFile", "notes.TXT", b"n"))
        .await;

    let (status, json) = app.send_json(get("/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);

    let mut entries = json["data"].as_array().unwrap().clone();
    entries.sort_by_key(|e| e["filename"].as_str().unwrap().to_string());
    assert_eq!(
        serde_json::Value::Array(entries),
        serde_json::json!([
            { "filename": "cat.jpg", "type": "image" },
            { "filename": "notes.TXT", "type": "file" },
        ])
    );
}

#[tokio::test]
async fn test_save_duplicate_is_conflict_and_keeps_bytes() {
    let app = TestApp::new();
    app.send_json(upload_request("/saveFile", "report.pdf", b"v1"))
        .await;

    let (status, json) = app
        .send_json(upload_request("/saveFile", "report.pdf", b"v2"))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], 409);
    assert!(json.get("data").is_none());
    assert_eq!(app.stored(StorageArea::Store, "report.pdf").unwrap(), b"v1");
}

#[tokio::test]
async fn test_staging_duplicate_message() {
    let app = TestApp::new();
    app.send_json(upload_request("/uploadFile", "pic.png", b"a"))
        .await;

    let (status, json) = app
        .send_json(upload_request("/uploadFile", "pic.png", b"b"))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("duplicate image"));
}

#[tokio::test]
async fn test_staging_and_store_are_independent() {
    let app = TestApp::new();

    let (status, _) = app
        .send_json(upload_request("/saveFile", "same.png", b"store"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send_json(upload_request("/uploadFile", "same.png", b"staging"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_payload_is_accepted() {
    let app = TestApp::new();

    let (status, _) = app
        .send_json(upload_request("/saveFile", "empty.bin", b""))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.stored(StorageArea::Store, "empty.bin").unwrap(), b"");
}

#[tokio::test]
async fn test_upload_without_file_field_is_bad_request() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/saveFile")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("attachment", "a.txt", b"x")))
        .unwrap();

    let (status, json) = app.send_json(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);
}

#[tokio::test]
async fn test_upload_traversal_name_is_rejected() {
    let app = TestApp::new();

    let (status, _) = app
        .send_json(upload_request("/uploadFile", "../escape.txt", b"x"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.list_names(StorageArea::Staging).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let mut config = Config::default();
    config.api.max_upload_bytes = 1024;
    let app = TestApp::with_config(config, "http://127.0.0.1:9/saveFile");

    let (status, json) = app
        .send_json(upload_request("/saveFile", "big.bin", &[0u8; 2048]))
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["code"], 413);
    assert!(app.stored(StorageArea::Store, "big.bin").is_none());
}

#[tokio::test]
async fn test_download_round_trip() {
    let app = TestApp::new();
    let payload: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
    app.send_json(upload_request("/saveFile", "my data.bin", &payload))
        .await;

    let (status, headers, body) = app.send(get("/downloadFile?filename=my%20data.bin")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, payload);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"my%20data.bin\""
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[header::CONTENT_LENGTH], "200000");
}

#[tokio::test]
async fn test_download_missing_is_not_found() {
    let app = TestApp::new();

    let (status, json) = app.send_json(get("/downloadFile?filename=ghost.png")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], 404);
}

#[tokio::test]
async fn test_download_without_filename_is_bad_request() {
    let app = TestApp::new();

    let (status, _) = app.send_json(get("/downloadFile")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_static_serving_of_store() {
    let app = TestApp::new();
    app.send_json(upload_request("/saveFile", "logo.png", b"logo"))
        .await;

    let (status, _, body) = app.send(get("/files/logo.png")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"logo");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let app = TestApp::new();
    app.send_json(upload_request("/uploadFile", "draft.txt", b"draft"))
        .await;

    let (status, json) = app.send_json(post("/deleteFile?filename=draft.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["removed"], true);
    assert!(app.stored(StorageArea::Staging, "draft.txt").is_none());

    let request = Request::builder()
        .method("DELETE")
        .uri("/deleteFile?filename=draft.txt")
        .body(Body::empty())
        .unwrap();
    let (status, json) = app.send_json(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["removed"], false);
}

#[tokio::test]
async fn test_delete_io_failure_is_server_error() {
    let app = TestApp::new();
    let nested = app.store.directory(StorageArea::Staging).resolve_path("album");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("cover.png"), b"png").unwrap();

    let (status, json) = app.send_json(post("/deleteFile?filename=album")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], 500);
    assert!(nested.join("cover.png").exists());
}

#[tokio::test]
async fn test_delete_only_touches_staging() {
    let app = TestApp::new();
    app.send_json(upload_request("/saveFile", "keep.txt", b"keep"))
        .await;

    let (status, json) = app.send_json(post("/deleteFile?filename=keep.txt")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["removed"], false);
    assert_eq!(app.stored(StorageArea::Store, "keep.txt").unwrap(), b"keep");
}

#[tokio::test]
async fn test_direct_relay_moves_file() {
    let app = TestApp::new();
    app.send_json(upload_request("/uploadFile", "scan.jpeg", b"scan"))
        .await;

    let (status, json) = app
        .send_json(post("/nodeUploadFile?filename=scan.jpeg&type=direct"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);
    assert!(app.stored(StorageArea::Staging, "scan.jpeg").is_none());
    assert_eq!(app.stored(StorageArea::Store, "scan.jpeg").unwrap(), b"scan");
}

#[tokio::test]
async fn test_relay_missing_is_not_found() {
    let app = TestApp::new();

    let (status, json) = app
        .send_json(post("/nodeUploadFile?filename=ghost.png"))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], 404);
    assert!(app.store.list_names(StorageArea::Store).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relay_into_taken_name_forwards_conflict() {
    let app = TestApp::new();
    app.send_json(upload_request("/saveFile", "dup.png", b"original"))
        .await;
    app.send_json(upload_request("/uploadFile", "dup.png", b"incoming"))
        .await;

    let (status, json) = app
        .send_json(post("/nodeUploadFile?filename=dup.png"))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], 409);
    assert_eq!(app.stored(StorageArea::Store, "dup.png").unwrap(), b"original");
    assert!(app.stored(StorageArea::Staging, "dup.png").is_none());
}

#[tokio::test]
async fn test_download_excel() {
    let app = TestApp::new();
    app.send_json(upload_request("/saveFile", "a.png", b"a"))
        .await;
    app.send_json(upload_request("/saveFile", "b.pdf", b"b"))
        .await;

    let (status, headers, body) = app.send(get("/downloadExcel")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"inventory.xlsx\""
    );
    assert!(body.starts_with(b"PK"));
}

/// Serve a full app on a loopback port whose relay posts back to itself
async fn spawn_loopback_app() -> (TestApp, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let app = TestApp::with_config(Config::default(), &format!("{base}/saveFile"));
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (app, base)
}

async fn relay_over_http(transport: &str) {
    let (app, base) = spawn_loopback_app().await;
    let client = reqwest::Client::new();
    let payload: Vec<u8> = (0..=255u8).cycle().take(300_000).collect();

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(payload.clone()).file_name("video.bin"),
    );
    let staged = client
        .post(format!("{base}/uploadFile"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(staged.status().as_u16(), 200);

    let relayed = client
        .post(format!(
            "{base}/nodeUploadFile?filename=video.bin&type={transport}"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(relayed.status().as_u16(), 200);
    let json: serde_json::Value = relayed.json().await.unwrap();
    assert_eq!(json["code"], 200);
    assert!(json["data"]["path"].as_str().unwrap().ends_with("video.bin"));

    assert!(app.stored(StorageArea::Staging, "video.bin").is_none());
    assert_eq!(app.stored(StorageArea::Store, "video.bin").unwrap(), payload);
}

#[tokio::test]
async fn test_streamed_http_relay() {
    relay_over_http("fetch").await;
}

#[tokio::test]
async fn test_buffered_http_relay() {
    relay_over_http("axios").await;
}

#[tokio::test]
async fn test_concurrent_uploads_same_name() {
    let app = TestApp::new();

    let requests = (0..8).map(|i| {
        let router = app.router.clone();
        async move {
            let payload = format!("writer-{i}");
            router
                .oneshot(upload_request("/saveFile", "race.txt", payload.as_bytes()))
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(requests).await;

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let conflicts = statuses
        .iter()
        .filter(|s| **s == StatusCode::CONFLICT)
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}
