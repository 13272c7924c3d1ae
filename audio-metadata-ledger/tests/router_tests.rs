use std::collections::HashMap;
use std::sync::Arc;

use audio_metadata_ledger::config::Config;
use audio_metadata_ledger::processor::BatchProcessor;
use audio_metadata_ledger::server::{router, setup_metrics_recorder, with_metrics};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common_s3::{MockS3Client, S3Error};
use envconfig::Envconfig;
use http_body_util::BodyExt; // for `collect`
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

const BUCKET: &str = "audio-uploads";

fn app(client: &MockS3Client) -> Router {
    let env = HashMap::from([("BUCKET_NAME".to_string(), BUCKET.to_string())]);
    let settings = Config::init_from_hashmap(&env)
        .unwrap()
        .ledger_settings()
        .unwrap();
    router(Arc::new(BatchProcessor::new(settings, Arc::new(client.clone()))))
}

fn record(event_name: &str, key: &str) -> Value {
    json!({
        "eventVersion": "2.1",
        "eventSource": "aws:s3",
        "eventName": event_name,
        "s3": {
            "bucket": {"name": BUCKET},
            "object": {"key": key, "size": 2048}
        }
    })
}

fn invoke_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/invoke")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn index_and_health_checks() {
    let client = MockS3Client::new();

    for uri in ["/", "/_readiness", "/_liveness"] {
        let response = app(&client)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn invoke_reports_every_entry() {
    let client = MockS3Client::new();

    let response = app(&client)
        .oneshot(invoke_request(json!({
            "Records": [
                record("ObjectCreated:Put", "audiofiles/clientA/track+one.mp3"),
                record("ObjectRemoved:Delete", "audiofiles/clientA/gone.mp3"),
                record("ObjectCreated:Copy", "uploads/clientA/other.mp3"),
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["status"], "processed");
    assert_eq!(entries[0]["ledger_key"], "metadata/metadata.csv");
    assert_eq!(entries[0]["duplicate"], false);
    assert_eq!(entries[1]["status"], "skipped");
    assert_eq!(entries[1]["reason"], "not_applicable");
    assert_eq!(entries[1]["detail"], "ObjectRemoved:Delete");
    assert_eq!(entries[2]["status"], "skipped");

    let ledger = client.object(BUCKET, "metadata/metadata.csv").unwrap();
    assert!(ledger.contains("track one.mp3"));
    assert!(ledger.contains("clientA"));
}

#[tokio::test]
async fn invoke_returns_500_when_an_entry_failed() {
    let client = MockS3Client::new().get_object_ret(
        BUCKET,
        "metadata/metadata.csv",
        S3Error::OperationFailed("access denied".to_string()),
    );

    let response = app(&client)
        .oneshot(invoke_request(json!({
            "Records": [record("ObjectCreated:Put", "audiofiles/clientA/a.mp3")]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert_eq!(body["entries"][0]["status"], "failed");
    assert!(body["entries"][0]["error"]
        .as_str()
        .unwrap()
        .contains("metadata/metadata.csv"));
    assert_eq!(client.put_calls(), 0);
}

#[tokio::test]
async fn invoke_rejects_payloads_without_records() {
    let client = MockS3Client::new();

    let response = app(&client)
        .oneshot(invoke_request(json!({"Event": "s3:TestEvent"})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_eq!(client.put_calls(), 0);
}

// the only test in this binary that installs the global recorder
#[tokio::test]
async fn metrics_endpoint_reports_batches_and_requests() {
    let client = MockS3Client::new();
    let recorder_handle = setup_metrics_recorder().unwrap();
    let app = with_metrics(app(&client), recorder_handle);

    let response = app
        .clone()
        .oneshot(invoke_request(json!({
            "Records": [record("ObjectCreated:Put", "audiofiles/clientA/a.mp3")]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let rendered = String::from_utf8(body.to_vec()).unwrap();
    assert!(rendered.contains("ledger_batch_entries_total"));
    assert!(rendered.contains("ledger_writes_total"));
    assert!(rendered.contains(r#"route="/invoke""#));
}
