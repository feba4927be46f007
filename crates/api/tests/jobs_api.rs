mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post_json};
use mayagen_db::{MemoryQueueStore, QueueStore};
use serde_json::json;

#[tokio::test]
async fn create_job_applies_defaults_and_sanitizes() {
    let store = Arc::new(MemoryQueueStore::new());
    let response = post_json(
        build_test_app(store.clone()),
        "/api/v1/jobs",
        json!({ "prompt": "  a cat on a sofa ", "category": "Wild Cats!" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let job = &body_json(response).await["data"];
    assert_eq!(job["prompt"], "a cat on a sofa");
    assert_eq!(job["status_id"], 1);
    assert_eq!(job["status"], "queued");
    assert_eq!(job["width"], 512);
    assert_eq!(job["height"], 512);
    assert_eq!(job["model"], "sd15");
    assert_eq!(job["provider"], "comfyui");
    assert_eq!(job["category"], "Wild_Cats");
    assert!(job["filename"].as_str().unwrap().starts_with("api_img_"));
    assert!(job["output_path"].is_null());
    assert!(job.get("claim_token").is_none());

    let id = job["id"].as_i64().unwrap();
    assert!(store.find_job(id).await.unwrap().is_some());
}

#[tokio::test]
async fn create_job_rejects_blank_prompt() {
    let app = build_test_app(Arc::new(MemoryQueueStore::new()));
    let response = post_json(app, "/api/v1/jobs", json!({ "prompt": "   " })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn create_job_rejects_out_of_range_size() {
    let app = build_test_app(Arc::new(MemoryQueueStore::new()));
    let response = post_json(
        app,
        "/api/v1/jobs",
        json!({ "prompt": "a cat", "width": 10_000 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = build_test_app(Arc::new(MemoryQueueStore::new()));
    let response = post_json(app, "/api/v1/jobs", json!({ "width": 512 })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn get_missing_job_returns_404() {
    let app = build_test_app(Arc::new(MemoryQueueStore::new()));
    let response = get(app, "/api/v1/jobs/999").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id 999 not found");
}

#[tokio::test]
async fn cancel_queued_job_then_conflict() {
    let store = Arc::new(MemoryQueueStore::new());
    let created = body_json(
        post_json(
            build_test_app(store.clone()),
            "/api/v1/jobs",
            json!({ "prompt": "a cat" }),
        )
        .await,
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();
    let uri = format!("/api/v1/jobs/{id}/cancel");

    let response = post_json(build_test_app(store.clone()), &uri, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status_id"], 5);

    let again = post_json(build_test_app(store.clone()), &uri, json!({})).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(again).await["code"], "CONFLICT");
}

#[tokio::test]
async fn store_outage_returns_500_without_details() {
    let store = Arc::new(MemoryQueueStore::new());
    store.set_unavailable(true);
    let response = get(build_test_app(store), "/api/v1/jobs/1").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}
