use axum::{Router, body::Body, http::Request};
use http_body_util::BodyExt;
use object_conveyor::{
    Address, ConveyPolicy, Conveyor, Manager,
    services::{memory_store::MemoryStore, retry::RetryPolicy},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "conveyor-test-boundary";

fn app_on(store: &MemoryStore) -> Router {
    let policy = ConveyPolicy {
        retry: RetryPolicy::none(),
        ..ConveyPolicy::default()
    };
    let conveyor = Conveyor::new(Arc::new(store.clone()), Address::new("media"), policy);
    object_conveyor::app(Manager::new(conveyor))
}

/// multipart/form-data body with one file field plus plain text fields.
fn multipart_body(filename: &str, content_type: &str, data: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = app_on(&MemoryStore::new());
    let res = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(json_body(res).await["status"], "ok");
}

#[tokio::test]
async fn readyz_reports_a_missing_bucket() {
    let res = app_on(&MemoryStore::new()).oneshot(get("/readyz")).await.unwrap();
    assert_eq!(res.status().as_u16(), 503);
    let body = json_body(res).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["checks"]["bucket"]["ok"], false);

    let res = app_on(&MemoryStore::with_bucket("media"))
        .oneshot(get("/readyz"))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
}

#[tokio::test]
async fn upload_then_read_back_under_a_category() {
    let store = MemoryStore::with_bucket("media");
    let app = app_on(&store);

    let body = multipart_body("logo.png", "image/png", b"\x89PNG bytes", &[]);
    let res = app
        .clone()
        .oneshot(upload_request("/objects?category=users/42", body))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);
    let created = json_body(res).await;
    assert_eq!(created["key"], "users/42/logo.png");
    assert_eq!(created["url"], "http://media.s3.amazonaws.com/users/42/logo.png");
    assert_eq!(created["size"], 10);

    let res = app
        .clone()
        .oneshot(get("/objects/logo.png?category=users/42"))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.headers()["content-type"], "image/png");
    assert!(res.headers().get("etag").is_some());
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"\x89PNG bytes");

    let res = app
        .oneshot(get("/info/logo.png?category=users/42"))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let info = json_body(res).await;
    assert_eq!(info["name"], "logo.png");
    assert_eq!(info["mime_type"], "image/png");
    assert_eq!(info["size"]["bytes"], 10);
}

#[tokio::test]
async fn form_fields_override_name_and_category() {
    let store = MemoryStore::with_bucket("media");
    let body = multipart_body(
        "scan.pdf",
        "application/pdf",
        b"%PDF",
        &[("name", "invoice.pdf"), ("category", "billing/2025")],
    );
    let res = app_on(&store)
        .oneshot(upload_request("/objects?category=ignored", body))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);
    assert_eq!(json_body(res).await["key"], "billing/2025/invoice.pdf");
    assert!(store.object("media", "billing/2025/invoice.pdf").is_some());
}

#[tokio::test]
async fn upload_without_a_file_is_rejected() {
    let store = MemoryStore::with_bucket("media");
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n"
    );
    let res = app_on(&store)
        .oneshot(upload_request("/objects", body.into_bytes()))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn missing_objects_are_404() {
    let app = app_on(&MemoryStore::with_bucket("media"));
    let res = app.clone().oneshot(get("/info/nope.png")).await.unwrap();
    assert_eq!(res.status().as_u16(), 404);
    assert_eq!(json_body(res).await["status"], 404);

    let res = app.oneshot(get("/objects/nope.png")).await.unwrap();
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn delete_removes_the_object_once() {
    let store = MemoryStore::with_bucket("media");
    let app = app_on(&store);
    let body = multipart_body("a.txt", "text/plain", b"hello", &[]);
    let res = app
        .clone()
        .oneshot(upload_request("/objects?category=tmp", body))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/objects/a.txt?category=tmp")
            .body(Body::empty())
            .unwrap()
    };
    let res = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(res.status().as_u16(), 204);
    assert!(store.object("media", "tmp/a.txt").is_none());

    let res = app.oneshot(delete()).await.unwrap();
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn image_upload_reports_the_original() {
    let store = MemoryStore::with_bucket("media");
    let body = multipart_body("pixel.png", "image/png", b"not decoded without sizes", &[]);
    let res = app_on(&store)
        .oneshot(upload_request("/images?category=products", body))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);
    let created = json_body(res).await;
    assert_eq!(created["success"], true);
    let name = created["name"].as_str().unwrap().to_string();
    assert!(name.ends_with(".png"));
    assert!(store.object("media", &format!("products/{name}")).is_some());
}
