use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use drishti_core::DrishtiConfig;
use drishti_eye::CameraService;
use drishti_server::http::{create_router, ApiState};
use drishti_server::startup::build_service;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

const CONFIG: &str = r#"
shutdown_timeout_ms = 2000

[capture]
width = 64
height = 48
fps = 30

[[cameras]]
id = "lobby"
name = "Lobby"
url = "test://lobby"

[[cameras]]
id = "dock"
url = "test://dock"
"#;

async fn setup(dir: &std::path::Path) -> (Arc<CameraService>, Router) {
    let mut config = DrishtiConfig::from_str(CONFIG).unwrap();
    config.snapshots.dir = dir.to_path_buf();
    let service = build_service(&config).await.unwrap();
    let app = create_router(ApiState::new(service.clone()));
    (service, app)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for_frame(service: &CameraService, camera_id: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while service.latest_jpeg(camera_id).is_err() {
        assert!(Instant::now() < deadline, "no frame from {}", camera_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_health_and_camera_listing() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, app) = setup(dir.path()).await;

    let (status, _, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["cameras"], 2);

    let (status, _, body) = send(&app, get("/api/cameras")).await;
    assert_eq!(status, StatusCode::OK);
    let cameras: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(cameras["lobby"]["name"], "Lobby");
    assert_eq!(cameras["dock"]["name"], "dock");
    assert_eq!(cameras["lobby"]["state"], "disconnected");
    assert_eq!(cameras["lobby"]["connected"], false);
}

#[tokio::test]
async fn test_settings_update_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, app) = setup(dir.path()).await;

    let (status, _, body) = send(
        &app,
        post_json(
            "/api/settings",
            json!({"camera_id": "dock", "key": "detection_enabled", "value": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let updated: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(updated["success"], true);
    assert_eq!(updated["settings"]["detection_enabled"], false);

    let (status, _, body) = send(
        &app,
        post_json(
            "/api/settings",
            json!({"camera_id": "dock", "key": "confidence_threshold", "value": 1.5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "INVALID_SETTING");

    let (status, _, body) = send(
        &app,
        post_json(
            "/api/settings",
            json!({"camera_id": "ghost", "key": "detection_enabled", "value": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "UNKNOWN_CAMERA");

    let (status, _, body) = send(&app, get("/api/settings")).await;
    assert_eq!(status, StatusCode::OK);
    let all: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(all["dock"]["detection_enabled"], false);
    assert_eq!(all["dock"]["confidence_threshold"], json!(0.5));
    assert_eq!(all["lobby"]["detection_enabled"], true);
}

#[tokio::test]
async fn test_snapshot_before_first_frame_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, app) = setup(dir.path()).await;

    let (status, _, body) = send(&app, post_json("/api/snapshots/lobby", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "no frame available");

    let (status, _, _) = send(&app, get("/api/cameras/lobby/latest.jpg")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = send(&app, post_json("/api/snapshots/ghost", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_live_camera_frames_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let (service, app) = setup(dir.path()).await;
    service.supervisor().start("lobby").unwrap();
    wait_for_frame(&service, "lobby").await;

    let (status, content_type, body) = send(&app, get("/api/cameras/lobby/latest.jpg")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);

    let (status, _, body) = send(&app, post_json("/api/snapshots/lobby", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let snapshot: Value = serde_json::from_slice(&body).unwrap();
    let filename = snapshot["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("lobby_"));
    assert!(dir.path().join(&filename).exists());
    let path = snapshot["path"].as_str().unwrap();
    assert_eq!(std::path::Path::new(path), dir.path().join(&filename));

    let (status, _, body) = send(&app, get("/api/snapshots")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed[0]["filename"], filename.as_str());
    assert_eq!(listed[0]["camera_id"], "lobby");
    assert_eq!(listed[0]["path"], path);

    let (status, content_type, body) =
        send(&app, get(&format!("/api/snapshots/files/{}", filename))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(body, std::fs::read(dir.path().join(&filename)).unwrap());

    let timeout = Duration::from_secs(2);
    let report = tokio::task::spawn_blocking(move || service.shutdown(timeout))
        .await
        .unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_snapshot_files_only_served_from_index() {
    let dir = tempfile::tempdir().unwrap();
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, b"not a snapshot").unwrap();
    let snaps = dir.path().join("snaps");
    std::fs::create_dir(&snaps).unwrap();
    std::fs::write(snaps.join("stray_20240101-000000-000.jpg"), b"\xFF\xD8").unwrap();
    let (_service, app) = setup(&snaps).await;

    let (status, _, body) = send(&app, get("/api/snapshots/files/stray_20240101-000000-000.jpg")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"\xFF\xD8");

    for uri in [
        "/api/snapshots/files/missing_20240101-000000-000.jpg",
        "/api/snapshots/files/..%2Fsecret.txt",
        "/api/snapshots/files/secret.txt",
    ] {
        let (status, _, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], "UNKNOWN_SNAPSHOT");
    }

    // indexed, then deleted behind the server's back
    std::fs::remove_file(snaps.join("stray_20240101-000000-000.jpg")).unwrap();
    let (status, _, _) = send(&app, get("/api/snapshots/files/stray_20240101-000000-000.jpg")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
