mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use video_transcriber::server::{build_router, AppState};
use video_transcriber::{Config, JobId};

fn app(data_dir: &std::path::Path) -> (Router, AppState) {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();

    let state = AppState {
        orchestrator: common::orchestrator(&config.temp_dir(), false, 2),
        config: Arc::new(config),
    };
    (build_router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, header::HeaderMap) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec(), headers)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(dir.path());

    let (status, body, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "ok");
}

#[tokio::test]
async fn submission_without_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = app(dir.path());

    let (status, body, _) = send(&app, post_json("/api/transcriptions", json!({ "language": "en" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "bad_request");
    assert!(state.orchestrator.list(10).is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(dir.path());
    let id = JobId::new();

    let (status, body, _) = send(&app, get(&format!("/api/transcriptions/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "not_found");

    let (status, _, _) = send(&app, get(&format!("/api/transcriptions/{}/download?format=srt", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, get(&format!("/api/transcriptions/{}/events", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/transcriptions/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "deleted": false }));
}

#[tokio::test]
async fn url_submission_completes_and_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = app(dir.path());

    let (status, body, _) = send(
        &app,
        post_json(
            "/api/transcriptions",
            json!({ "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "include_timestamps": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let submitted = json_body(&body);
    assert_eq!(submitted["status"], "pending");
    assert_eq!(submitted["progress"], 0);
    let id = JobId::from(submitted["id"].as_str().unwrap());

    let (status, _, _) = send(&app, get(&format!("/api/transcriptions/{}/download", id))).await;
    assert!(status == StatusCode::CONFLICT || status == StatusCode::OK);

    common::follow(&state.orchestrator, &id).await;

    let (status, body, _) = send(&app, get(&format!("/api/transcriptions/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    let job = json_body(&body);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);

    let (status, body, headers) = send(&app, get(&format!("/api/transcriptions/{}/download?format=srt", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/x-subrip; charset=utf-8");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment; filename=\"Remote Talk.srt\""));
    assert!(String::from_utf8(body).unwrap().starts_with("1\n00:00:00,000 --> 00:00:02,500\n"));

    let (status, body, _) = send(&app, get(&format!("/api/transcriptions/{}/download?format=md", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("**[00:05]**"));

    let (status, _, _) = send(&app, get(&format!("/api/transcriptions/{}/download?format=pdf", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = send(&app, get("/api/transcriptions?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    let list = json_body(&body);
    let items = list["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["source_name"], "Remote Talk");
}

#[tokio::test]
async fn multipart_upload_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = app(dir.path());

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"lecture.mp4\"\r\n\
         Content-Type: video/mp4\r\n\r\nvideo bytes\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"output_kind\"\r\n\r\nboth\r\n\
         --{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/transcriptions")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap();

    let (status, body, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let id = JobId::from(json_body(&body)["id"].as_str().unwrap());

    let snapshots = common::follow(&state.orchestrator, &id).await;
    assert_eq!(snapshots.last().unwrap().status.as_str(), "completed");

    let job = state.orchestrator.get(&id).unwrap();
    assert_eq!(job.display_name(), "lecture.mp4");
    let uploads = state.config.uploads_dir();
    assert_eq!(fs_err::read_dir(&uploads).unwrap().count(), 0, "upload left behind");
}

#[tokio::test]
async fn multipart_without_file_or_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = app(dir.path());

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\nru\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/transcriptions")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap();

    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.orchestrator.list(10).is_empty());
}
