//! End-to-end tests against the full router.

use super::router;
use crate::api::AppState;
use crate::config::Config;
use crate::db::test_pool;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "stow-test-boundary";

struct TestApp {
    app: Router,
    dir: TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_tests(&dir.path().join("spool"));
    let state = AppState::new(test_pool().await, config);
    TestApp {
        app: router(state),
        dir,
    }
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .send(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, _, body) = self.send(req).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn add_local_backend(&self, name: &str) -> Value {
        let base = self.dir.path().join(name);
        let (status, backend) = self
            .post_json(
                "/file_server/add/local",
                json!({"name": name, "base_path": base, "total_space": 1u64 << 32}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", backend);

        let id = backend["id"].as_str().unwrap().to_string();
        for _ in 0..100 {
            let (_, current) = self.get_json(&format!("/file_server/{}", id)).await;
            if current["status"] == "ok" {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("backend {} never became healthy", id);
    }

    async fn upload(&self, name: &str, data: &[u8], container_id: &str) -> Value {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"container_id\"\r\n\r\n{c}\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"item\"; filename=\"{n}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                b = BOUNDARY,
                c = container_id,
                n = name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let req = Request::post("/item/store")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _, body) = self.send(req).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body).unwrap()
    }

    async fn wait_settled(&self, id: &str) -> Value {
        for _ in 0..500 {
            let (_, item) = self.get_json(&format!("/item/{}", id)).await;
            if item["status"] != "pending" {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("item {} still pending", id);
    }
}

fn payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(2024).fill_bytes(&mut data);
    data
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_and_download_round_trip() {
    let app = test_app().await;
    app.add_local_backend("disk-a").await;

    let data = payload(1 << 20);
    let item = app.upload("payload.bin", &data, "123").await;
    assert_eq!(item["status"], "pending");
    assert_eq!(item["container_id"], "123");
    assert_eq!(item["size"], 1 << 20);

    let id = item["id"].as_str().unwrap();
    let item = app.wait_settled(id).await;
    assert_eq!(item["status"], "ok");
    assert_eq!(item["chunk_count"], 1);

    let (status, headers, body) = app
        .send(
            Request::get(format!("/item/{}/download", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"payload.bin\""
    );
    assert_eq!(blake3::hash(&body), blake3::hash(&data));

    // Listed under its container
    let (_, items) = app.get_json("/container/123/items?status=ok").await;
    assert_eq!(items.as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ranged_download_across_chunks() {
    let app = test_app().await;
    for name in ["a", "b", "c"] {
        app.add_local_backend(name).await;
    }

    let data = payload(3000);
    let item = app.upload("ranged.bin", &data, "").await;
    let id = item["id"].as_str().unwrap().to_string();
    let item = app.wait_settled(&id).await;
    assert_eq!(item["status"], "ok");
    assert_eq!(item["chunk_count"], 3);

    let (status, headers, body) = app
        .send(
            Request::get(format!("/item/{}/download", id))
                .header(header::RANGE, "bytes=900-2100")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 900-2100/3000");
    assert_eq!(body, &data[900..=2100]);

    let (status, _, _) = app
        .send(
            Request::get(format!("/item/{}/download", id))
                .header(header::RANGE, "bytes=5000-")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_upload_without_backends_fails() {
    let app = test_app().await;

    let item = app.upload("lonely.txt", b"nowhere to go", "123").await;
    let id = item["id"].as_str().unwrap();
    let item = app.wait_settled(id).await;
    assert_eq!(item["status"], "fail");

    let (status, body) = app.get_json(&format!("/item/{}/download", id)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("current status: fail"));
}

#[tokio::test]
async fn test_upload_requires_item_field() {
    let app = test_app().await;
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"container_id\"\r\n\r\n1\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let req = Request::post("/item/store")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = app.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_backend_credentials_redacted() {
    let app = test_app().await;
    let (status, created) = app
        .post_json(
            "/file_server/add/api",
            json!({
                "name": "remote",
                "address": "127.0.0.1",
                "port": 1,
                "endpoint": "store",
                "api_version": "v1",
                "user": "gateway",
                "password": "s3cret",
                "total_space": 1000
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["type"], "api");
    assert_eq!(created["params"]["password"], "***");

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = app.get_json(&format!("/file_server/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["params"]["password"], "***");
    assert_eq!(fetched["params"]["user"], "gateway");

    let (_, listed) = app.get_json("/file_server").await;
    assert!(!listed.to_string().contains("s3cret"));
}

#[tokio::test]
async fn test_unknown_backend_type_rejected() {
    let app = test_app().await;
    let (status, body) = app
        .post_json("/file_server/add/ftp", json!({"name": "x", "total_space": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ftp"));
}

#[tokio::test]
async fn test_missing_resources() {
    let app = test_app().await;
    assert_eq!(app.get_json("/item/nope").await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get_json("/item/nope/download").await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get_json("/file_server/nope").await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get_json("/container/nope").await.0, StatusCode::NOT_FOUND);
    assert_eq!(
        app.post_json("/item/nope/cancel", json!({})).await.0,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_container_lifecycle() {
    let app = test_app().await;
    let (status, created) = app
        .post_json(
            "/container/create",
            json!({"name": "photos", "description": "holiday"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_str().unwrap();

    let (status, fetched) = app.get_json(&format!("/container/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "photos");

    let (_, all) = app.get_json("/container").await;
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, _) = app.post_json("/container/create", json!({"name": " "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
