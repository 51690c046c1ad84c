use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use motionx_api::middleware::issue_token;
use motionx_api::state::AppStateInner;
use motionx_api::storage::BlobStore;
use motionx_sync::LocalBackend;
use motionx_types::api::{SessionResponse, UploadResponse};

const SECRET: &str = "test-secret";
const BOUNDARY: &str = "motionx-test-boundary";

async fn app(dir: &tempfile::TempDir, token: Option<&str>) -> Router {
    let backend = Arc::new(LocalBackend::in_memory().unwrap());
    let blobs = BlobStore::new(
        dir.path().to_path_buf(),
        "http://localhost:3000",
        token.map(str::to_string),
    )
    .await
    .unwrap();
    motionx_api::routes(Arc::new(AppStateInner::new(backend, blobs, SECRET.into())))
}

fn multipart(file: Option<(&str, &str, &[u8])>, target: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((name, mime, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(target) = target {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\n{target}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut req = Request::post("/api/upload").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    req.body(Body::from(body)).unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upload_needs_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir, Some("blob-token"))
        .await
        .oneshot(upload_request(None, multipart(Some(("a.png", "image/png", b"x")), None)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_without_file_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let token = issue_token(SECRET, Uuid::new_v4(), None).unwrap();
    let resp = app(&dir, Some("blob-token"))
        .await
        .oneshot(upload_request(Some(&token), multipart(None, Some("posts/u/a.png"))))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: UploadResponse = json(resp).await;
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("No file provided"));
}

#[tokio::test]
async fn missing_blob_token_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let token = issue_token(SECRET, Uuid::new_v4(), None).unwrap();
    let resp = app(&dir, None)
        .await
        .oneshot(upload_request(
            Some(&token),
            multipart(Some(("a.png", "image/png", b"png")), Some("posts/u/a.png")),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: UploadResponse = json(resp).await;
    assert!(body.is_not_configured());
}

#[tokio::test]
async fn upload_stores_the_file_and_returns_its_url() {
    let dir = tempfile::tempdir().unwrap();
    let user = Uuid::new_v4();
    let token = issue_token(SECRET, user, None).unwrap();
    let target = format!("dm/{}/photo.png", user);

    let resp = app(&dir, Some("blob-token"))
        .await
        .oneshot(upload_request(
            Some(&token),
            multipart(Some(("photo.png", "image/png", b"\x89PNG")), Some(&target)),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: UploadResponse = json(resp).await;
    assert!(body.success);
    assert_eq!(
        body.url.as_deref(),
        Some(format!("http://localhost:3000/blobs/{}", target).as_str())
    );
    let stored = tokio::fs::read(dir.path().join(&target)).await.unwrap();
    assert_eq!(stored, b"\x89PNG");
}

#[tokio::test]
async fn upload_rejects_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let token = issue_token(SECRET, Uuid::new_v4(), None).unwrap();
    let resp = app(&dir, Some("blob-token"))
        .await
        .oneshot(upload_request(
            Some(&token),
            multipart(Some(("a.png", "image/png", b"x")), Some("../../escape.png")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_without_token_redirects_to_login() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir, None)
        .await
        .oneshot(Request::get("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/auth/login");
}

#[tokio::test]
async fn first_session_provisions_a_profile_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, None).await;
    let user = Uuid::new_v4();
    let token = issue_token(SECRET, user, Some("river@example.com")).unwrap();

    let get = || {
        Request::get("/session")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let first: SessionResponse = json(app.clone().oneshot(get()).await.unwrap()).await;
    assert!(first.provisioned);
    assert_eq!(first.user_id, user);
    assert_eq!(first.profile.username, "river");

    let second: SessionResponse = json(app.oneshot(get()).await.unwrap()).await;
    assert!(!second.provisioned);
    assert_eq!(second.profile, first.profile);
}

#[tokio::test]
async fn upload_never_overwrites_an_existing_blob() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, Some("blob-token")).await;
    let victim = Uuid::new_v4();
    let target = format!("avatars/{}/me.png", victim);

    let own = issue_token(SECRET, victim, None).unwrap();
    let resp = app
        .clone()
        .oneshot(upload_request(
            Some(&own),
            multipart(Some(("me.png", "image/png", b"victim")), Some(&target)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let other = issue_token(SECRET, Uuid::new_v4(), None).unwrap();
    let resp = app
        .oneshot(upload_request(
            Some(&other),
            multipart(Some(("me.png", "image/png", b"attacker")), Some(&target)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: UploadResponse = json(resp).await;
    assert!(!body.success);

    let stored = tokio::fs::read(dir.path().join(&target)).await.unwrap();
    assert_eq!(stored, b"victim");
}
