//! HTTP-level behaviour of the status and streaming endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use tower::ServiceExt;
use undertow_core::testing::{MockTransferFactory, RecordingTelemetry, single_file_layout};
use undertow_core::{ShutdownSignal, TelemetryEvent, UndertowConfig, spawn_registry};
use undertow_web::{AppState, build_router};

const HASH: &str = "08ada5a7a6183aae1e09d831df6748d566095a10";
const FILE_LENGTH: usize = 1000;

struct TestServer {
    app: Router,
    factory: MockTransferFactory,
    telemetry: RecordingTelemetry,
    shutdown: ShutdownSignal,
}

impl TestServer {
    fn new(factory: MockTransferFactory) -> Self {
        Self::with_config(UndertowConfig::for_testing(), factory)
    }

    fn with_config(config: UndertowConfig, factory: MockTransferFactory) -> Self {
        let telemetry = RecordingTelemetry::new();
        let registry = spawn_registry(
            config.clone(),
            Arc::new(factory.clone()),
            Arc::new(telemetry.clone()),
        );
        let shutdown = ShutdownSignal::new();
        let app = build_router(AppState::new(registry, config, shutdown.clone()));

        Self {
            app,
            factory,
            telemetry,
            shutdown,
        }
    }

    fn with_movie() -> Self {
        let layout = single_file_layout("Sintel/sintel.mp4", FILE_LENGTH as u64, 100);
        Self::new(MockTransferFactory::with_content(
            layout,
            vec![Bytes::from(movie_bytes())],
        ))
    }

    async fn get(&self, uri: &str) -> Response {
        self.get_with_range(uri, None).await
    }

    async fn get_with_range(&self, uri: &str, range: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn sessions(&self) -> Vec<Value> {
        let response = self.get("/").await;
        assert_eq!(response.status(), StatusCode::OK);
        match body_json(response).await {
            Value::Array(sessions) => sessions,
            other => panic!("expected array, got {other}"),
        }
    }
}

fn movie_bytes() -> Vec<u8> {
    (0..FILE_LENGTH).map(|i| (i % 251) as u8).collect()
}

fn link_query(parameter: &str) -> String {
    format!("{parameter}=magnet%3A%3Fxt%3Durn%3Abtih%3A{HASH}%26dn%3DSintel")
}

async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_status_lists_no_sessions_initially() {
    let server = TestServer::new(MockTransferFactory::new());
    let response = server.get("/").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_json(response).await, Value::Array(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn test_add_rejects_bad_links_without_creating_sessions() {
    let server = TestServer::new(MockTransferFactory::new());

    assert_eq!(server.get("/add").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        server.get("/add?link=not-a-magnet").await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        server
            .get("/video?link=magnet%3A%3Fdn%3DNoHash")
            .await
            .status(),
        StatusCode::BAD_REQUEST
    );

    assert!(server.sessions().await.is_empty());
    assert_eq!(server.factory.started_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_add_reports_metadata_state() {
    let server = TestServer::new(MockTransferFactory::new());

    let response = server.get(&format!("/add?{}", link_query("magnet_link"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["dn"], "Sintel");
    assert_eq!(status["info_hash"], HASH);
    assert_eq!(status["state"], "metadata");
    assert_eq!(status["paused"], false);
    assert!(status.get("pieces").is_none());

    // The add request's connection is released once answered
    let sessions = server.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["connections"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_video_redirects_while_metadata_pending() {
    let server = TestServer::new(MockTransferFactory::new());
    let uri = format!("/video?{}&download_dir=%2Ftmp", link_query("link"));

    let started = tokio::time::Instant::now();
    let response = server.get(&uri).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), uri.as_str());
    assert!(started.elapsed() >= Duration::from_millis(100));

    let sessions = server.sessions().await;
    assert_eq!(sessions[0]["connections"], 0);
    assert_eq!(
        server.factory.requests()[0].download_dir,
        std::path::PathBuf::from("/tmp")
    );
}

#[tokio::test(start_paused = true)]
async fn test_video_serves_partial_content() {
    let server = TestServer::with_movie();
    server.get(&format!("/add?{}", link_query("link"))).await;

    let response = server
        .get_with_range(
            &format!("/video?{}", link_query("link")),
            Some("bytes=100-199"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers.get(header::CONTENT_RANGE).unwrap(), "bytes 100-199/1000");
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "100");
    assert_eq!(headers.get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(headers.get("transfermode.dlna.org").unwrap(), "Streaming");
    assert!(headers.contains_key("contentfeatures.dlna.org"));

    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), &movie_bytes()[100..200]);

    let sessions = server.sessions().await;
    assert_eq!(sessions[0]["state"], "downloading");
    assert_eq!(sessions[0]["connections"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_video_serves_whole_file_without_range() {
    let server = TestServer::with_movie();
    server.get(&format!("/add?{}", link_query("link"))).await;

    let response = server.get(&format!("/video?{}", link_query("link"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "1000");
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    assert_eq!(body_bytes(response).await.as_ref(), movie_bytes().as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_unsatisfiable_range_leaves_session_alone() {
    let server = TestServer::with_movie();
    server.get(&format!("/add?{}", link_query("link"))).await;

    for range in ["bytes=5000-", "bytes=oops"] {
        let response = server
            .get_with_range(&format!("/video?{}", link_query("link")), Some(range))
            .await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1000"
        );
    }

    let sessions = server.sessions().await;
    assert_eq!(sessions[0]["state"], "downloading");
    assert_eq!(sessions[0]["connections"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_includes_layout_once_downloading() {
    let server = TestServer::with_movie();
    server.get(&format!("/add?{}", link_query("link"))).await;

    let sessions = server.sessions().await;
    let status = &sessions[0];
    assert_eq!(status["pieces"], 10);
    assert_eq!(status["pieces_preload"], 1);
    assert_eq!(status["piece_length"], 100);
    assert_eq!(status["piece_map"][0], "..........");
    assert_eq!(status["video_ready"], false);
    assert_eq!(status["files"][0]["path"], "Sintel/sintel.mp4");
    assert_eq!(status["files"][0]["main"], true);
}

#[tokio::test(start_paused = true)]
async fn test_serving_reported_once_past_threshold() {
    let server = TestServer::with_movie();
    server.get(&format!("/add?{}", link_query("link"))).await;

    for _ in 0..3 {
        let response = server.get(&format!("/video?{}", link_query("link"))).await;
        body_bytes(response).await;
    }

    server.sessions().await;
    assert_eq!(server.telemetry.count(TelemetryEvent::Serving), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_metadata_returns_not_found() {
    // Keep the idle session around past the metadata deadline
    let mut config = UndertowConfig::for_testing();
    config.lifecycle.pause_timeout = Duration::from_secs(60);
    let metadata_timeout = config.lifecycle.metadata_timeout;
    let server = TestServer::with_config(config, MockTransferFactory::new());
    server.get(&format!("/add?{}", link_query("link"))).await;

    tokio::time::sleep(metadata_timeout).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = server.get(&format!("/video?{}", link_query("link"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.sessions().await[0]["state"], "failed");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_and_signals() {
    let server = TestServer::new(MockTransferFactory::new());
    server.get(&format!("/add?{}", link_query("link"))).await;

    let response = server.get("/shutdown").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(server.shutdown.is_triggered());

    let transfer = server.factory.transfer(HASH.parse().unwrap()).unwrap();
    assert_eq!(transfer.shutdown_count(), 1);
    assert_eq!(server.telemetry.count(TelemetryEvent::Removed), 1);

    assert_eq!(server.get("/").await.status(), StatusCode::SERVICE_UNAVAILABLE);
}
