use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use ndarray::Array4;
use parking_lot::Mutex;
use serde_json::{json, Value};
use spot_detection::{
    config::{Config, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT},
    models::{LesionModel, ModelManager},
    notify::{EmailMessage, Notifier},
    web::{create_app, AppState},
    LesionCategory, SpotError,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const SESSION: &str = "test-session";
const BOUNDARY: &str = "spotboundary";

struct CountingModel {
    calls: AtomicUsize,
    distribution: Vec<f32>,
}

impl LesionModel for CountingModel {
    fn predict(&self, input: &Array4<f32>) -> spot_detection::Result<Vec<f32>> {
        assert_eq!(input.shape(), &[1, 75, 100, 3]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.distribution.clone())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[derive(Default)]
struct FakeNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, message: &EmailMessage) -> spot_detection::Result<()> {
        self.sent.lock().push(message.clone());
        if self.fail {
            Err(SpotError::Email("535 authentication failed".to_string()))
        } else {
            Ok(())
        }
    }
}

struct Harness {
    app: Router,
    model: Arc<CountingModel>,
    notifier: Arc<FakeNotifier>,
    upload_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

const MELANOMA: [f32; 7] = [0.01, 0.02, 0.07, 0.05, 0.15, 0.6, 0.1];

fn test_config(upload_dir: &Path) -> Config {
    Config::new(
        "127.0.0.1:0".to_string(),
        "final_model.onnx".to_string(),
        upload_dir.to_string_lossy().to_string(),
        Some(1),
        50,
        DEFAULT_SMTP_HOST.to_string(),
        DEFAULT_SMTP_PORT,
        false,
    )
    .unwrap()
}

fn harness_with(fail_email: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploaded_images");
    let config = test_config(&upload_dir);

    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
        distribution: MELANOMA.to_vec(),
    });
    let notifier = Arc::new(FakeNotifier {
        fail: fail_email,
        ..Default::default()
    });
    let models = ModelManager::verified(model.clone(), config.clone()).unwrap();
    // 启动自检会调用一次模型
    assert_eq!(model.calls.swap(0, Ordering::SeqCst), 1);
    let state = AppState::new(config, models, notifier.clone()).unwrap();

    Harness {
        app: create_app(state),
        model,
        notifier,
        upload_dir,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(false)
}

fn jpeg_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(160, 120, image::Rgb([180, 110, 90]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, image::ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

fn upload_request(file_name: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/analyze/upload")
        .header("X-Session-ID", SESSION)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("X-Session-ID", SESSION)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn recent_images(app: &Router) -> Vec<String> {
    let request = Request::get("/api/session")
        .header("X-Session-ID", SESSION)
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(app, request).await;
    serde_json::from_value(body["data"]["recent_images"].clone()).unwrap()
}

/// 在本地端口上提供固定内容，用于URL获取
async fn serve_fixture(content_type: &'static str, bytes: Vec<u8>) -> String {
    let app = Router::new().route(
        "/fixture",
        get(move || {
            let bytes = bytes.clone();
            async move { ([(header::CONTENT_TYPE, content_type)], bytes) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/fixture", addr)
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn upload_saves_file_and_predicts() {
    let h = harness();
    let data = jpeg_bytes();

    let (status, body) = send(&h.app, upload_request("lesion1.jpg", &data)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["session_id"], SESSION);

    let saved = h.upload_dir.join("lesion1.jpg");
    assert_eq!(std::fs::read(&saved).unwrap(), data);

    let prediction = &body["data"]["result"]["prediction"];
    let label = prediction["label"].as_str().unwrap();
    assert!(LesionCategory::ALL.iter().any(|c| c.name() == label));
    assert_eq!(label, "Melanoma");
    let confidence = prediction["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));

    assert_eq!(body["data"]["session"]["state"], "predicted");
    assert_eq!(recent_images(&h.app).await, vec!["lesion1.jpg"]);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upload_without_file_is_soft_guard() {
    let h = harness();
    let body = format!("--{BOUNDARY}--\r\n");
    let request = Request::post("/api/analyze/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn six_uploads_keep_last_five() {
    let h = harness();
    let data = jpeg_bytes();

    for i in 1..=6 {
        let (status, _) = send(&h.app, upload_request(&format!("lesion{}.jpg", i), &data)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let expected: Vec<String> = (2..=6).map(|i| format!("lesion{}.jpg", i)).collect();
    assert_eq!(recent_images(&h.app).await, expected);
}

#[tokio::test]
async fn unreachable_url_adds_nothing_and_skips_prediction() {
    let h = harness();

    let (status, body) = send(
        &h.app,
        json_request("/api/analyze/url", json!({ "url": "http://127.0.0.1:1/lesion.jpg" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "FETCH_ERROR");
    assert!(recent_images(&h.app).await.is_empty());
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(file_count(&h.upload_dir), 0);
}

#[tokio::test]
async fn empty_url_is_soft_guard() {
    let h = harness();

    let (status, body) = send(&h.app, json_request("/api/analyze/url", json!({ "url": "" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Please input url"));
}

#[tokio::test]
async fn url_image_is_fetched_and_classified() {
    let h = harness();
    let url = serve_fixture("image/jpeg", jpeg_bytes()).await;

    let (status, body) = send(&h.app, json_request("/api/analyze/url", json!({ "url": url }))).await;

    assert_eq!(status, StatusCode::OK);
    let name = body["data"]["result"]["image"]["name"].as_str().unwrap().to_string();
    assert!(name.starts_with("url-") && name.ends_with(".jpg"));
    assert!(h.upload_dir.join(&name).exists());
    assert_eq!(body["data"]["result"]["image"]["method"], "provide_url");
    assert_eq!(recent_images(&h.app).await, vec![name]);
}

#[tokio::test]
async fn non_image_url_is_rejected() {
    let h = harness();
    let url = serve_fixture("text/html", b"<html>not found</html>".to_vec()).await;

    let (status, body) = send(&h.app, json_request("/api/analyze/url", json!({ "url": url }))).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"]["code"], "UNSUPPORTED_FORMAT");
    assert!(recent_images(&h.app).await.is_empty());
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recent_requires_history() {
    let h = harness();

    let (status, body) = send(&h.app, json_request("/api/analyze/recent", json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No recent images available"));
}

#[tokio::test]
async fn recent_image_is_reclassified() {
    let h = harness();
    let data = jpeg_bytes();
    send(&h.app, upload_request("a.jpg", &data)).await;
    send(&h.app, upload_request("b.jpg", &data)).await;

    let (status, body) = send(&h.app, json_request("/api/analyze/recent", json!({ "name": "a.jpg" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["result"]["image"]["name"], "a.jpg");
    assert_eq!(body["data"]["result"]["image"]["method"], "use_recent");
    assert_eq!(recent_images(&h.app).await, vec!["a.jpg", "b.jpg"]);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn blank_email_never_reaches_notifier() {
    let h = harness();
    send(&h.app, upload_request("lesion1.jpg", &jpeg_bytes())).await;

    let (status, _) = send(&h.app, json_request("/api/notify", json!({ "email": "  " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.notifier.sent.lock().is_empty());
}

#[tokio::test]
async fn notify_without_prediction_is_conflict() {
    let h = harness();

    let (status, body) = send(
        &h.app,
        json_request("/api/notify", json!({ "email": "patient@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert!(h.notifier.sent.lock().is_empty());
}

#[tokio::test]
async fn email_is_sent_with_prediction() {
    let h = harness();
    send(&h.app, upload_request("lesion1.jpg", &jpeg_bytes())).await;

    let (status, body) = send(
        &h.app,
        json_request("/api/notify", json!({ "email": "patient@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delivery"]["status"], "sent");
    assert_eq!(body["data"]["session"]["state"], "email_sent");

    let sent = h.notifier.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "patient@example.com");
    assert_eq!(sent[0].subject, "Skin Lesion Analysis Results");
    assert!(sent[0].body.contains("classified as Melanoma"));
}

#[tokio::test]
async fn delivery_failure_is_reported() {
    let h = harness_with(true);
    send(&h.app, upload_request("lesion1.jpg", &jpeg_bytes())).await;

    let (status, body) = send(
        &h.app,
        json_request("/api/notify", json!({ "email": "patient@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delivery"]["status"], "failed");
    assert!(body["data"]["delivery"]["reason"]
        .as_str()
        .unwrap()
        .contains("535"));
    assert_eq!(body["data"]["session"]["state"], "predicted");
}

#[tokio::test]
async fn stored_image_is_served() {
    let h = harness();
    let data = jpeg_bytes();
    send(&h.app, upload_request("lesion1.jpg", &data)).await;

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/images/lesion1.jpg").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), data.as_slice());
}

#[tokio::test]
async fn index_and_health_respond() {
    let h = harness();

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = send(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_check"]["output_classes"], 7);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);

    let (status, body) = send(&h.app, Request::get("/api/info").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"]["num_classes"], 7);
    assert_eq!(body["model"]["startup_check"]["output_classes"], 7);
}

#[tokio::test]
async fn health_fails_when_model_output_is_not_a_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir.path().join("uploaded_images"));
    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
        distribution: vec![3.2, 0.1, -1.0, 0.0, 0.0, 0.0, 0.0],
    });

    assert!(ModelManager::verified(model.clone(), config.clone()).is_err());

    let models = ModelManager::with_model(model, config.clone());
    let state = AppState::new(config, models, Arc::new(FakeNotifier::default())).unwrap();
    let app = create_app(state);

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert!(status.is_server_error());
    assert_eq!(body["error"]["code"], "INFERENCE_ERROR");
}

#[tokio::test]
async fn failed_upload_still_returns_session_id() {
    let h = harness();
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"broken.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"definitely not a jpeg");
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    // 不带会话头：服务端会生成新的会话ID
    let request = Request::post("/api/analyze/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let header_id = response.headers()["X-Session-ID"].to_str().unwrap().to_string();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "IMAGE_DECODE_ERROR");
    assert_eq!(body["session_id"], header_id.as_str());
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));

    // 已保存的图片归属于返回的会话
    let request = Request::get("/api/session")
        .header("X-Session-ID", header_id.as_str())
        .body(Body::empty())
        .unwrap();
    let (_, session) = send(&h.app, request).await;
    assert_eq!(session["data"]["recent_images"], json!(["broken.jpg"]));
    assert_eq!(session["data"]["state"], "image_acquired");
}

#[tokio::test]
async fn validation_errors_echo_session_header() {
    let h = harness();

    let response = h
        .app
        .clone()
        .oneshot(json_request("/api/notify", json!({ "email": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["X-Session-ID"], SESSION);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["session_id"], SESSION);
}
