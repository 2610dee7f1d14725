use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::*;

#[derive(Default)]
struct Seen {
    field_names: Vec<String>,
    byte_len: usize,
    authorization: Option<String>,
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn leaf_image() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.jpg");
    std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0, 1, 2, 3, 4]).unwrap();
    let image_ref = format!("file://{}", path.display());
    (dir, image_ref)
}

async fn predict_ok(
    State(seen): State<Arc<Mutex<Seen>>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut names = Vec::new();
    let mut len = 0;
    while let Some(field) = multipart.next_field().await.unwrap() {
        names.push(field.name().unwrap_or_default().to_string());
        len += field.bytes().await.unwrap().len();
    }
    let mut seen = seen.lock().unwrap();
    seen.field_names = names;
    seen.byte_len = len;
    seen.authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Json(json!({
        "predicted_class": "Cassava Mosaic Disease (CMD)",
        "confidence": "92.5%",
        "severity": "Élevée",
        "treatment": "Use resistant varieties",
        "recommendations": ["Isolate infected plants"],
        "timestamp": "2026-03-01T08:00:00Z"
    }))
}

#[tokio::test]
async fn classify_posts_multipart_file() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let base = spawn(
        Router::new()
            .route("/predict", post(predict_ok))
            .with_state(seen.clone()),
    )
    .await;
    let (_dir, image_ref) = leaf_image();

    let classifier = RemoteClassifier::new(&base, Some("secret-key".to_string())).unwrap();
    let diagnosis = classifier.classify(&image_ref).await.unwrap();

    assert_eq!(diagnosis.label, "Cassava Mosaic Disease (CMD)");
    assert!((diagnosis.confidence - 0.925).abs() < 1e-9);
    assert_eq!(diagnosis.severity, Some(SeverityLevel::High));
    assert_eq!(diagnosis.recommendations, vec!["Isolate infected plants".to_string()]);
    assert_eq!(diagnosis.response_timestamp.as_deref(), Some("2026-03-01T08:00:00Z"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.field_names, vec!["file".to_string()]);
    assert_eq!(seen.byte_len, 9);
    assert_eq!(seen.authorization.as_deref(), Some("Bearer secret-key"));
}

#[tokio::test]
async fn http_error_carries_fastapi_detail() {
    let base = spawn(Router::new().route(
        "/predict",
        post(|| async {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": "Invalid image format" })),
            )
        }),
    ))
    .await;
    let (_dir, image_ref) = leaf_image();

    let classifier = RemoteClassifier::new(&base, None).unwrap();
    let err = classifier.classify(&image_ref).await.unwrap_err();
    assert_eq!(
        err,
        InferenceError::Http {
            status: 422,
            detail: "Invalid image format".to_string()
        }
    );
}

#[tokio::test]
async fn slow_classifier_times_out() {
    let base = spawn(Router::new().route(
        "/predict",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({}))
        }),
    ))
    .await;
    let (_dir, image_ref) = leaf_image();

    let classifier =
        RemoteClassifier::with_timeout(&base, None, Duration::from_millis(200)).unwrap();
    let err = classifier.classify(&image_ref).await.unwrap_err();
    assert_eq!(err, InferenceError::Timeout);
}

#[tokio::test]
async fn missing_image_is_unreadable() {
    let classifier = RemoteClassifier::new("http://127.0.0.1:9", None).unwrap();
    let err = classifier.classify("/no/such/leaf.jpg").await.unwrap_err();
    assert_eq!(err, InferenceError::ImageUnreadable("/no/such/leaf.jpg".to_string()));
}

#[tokio::test]
async fn health_reports_latency_or_offline() {
    let base = spawn(Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) })))
        .await;
    let classifier = RemoteClassifier::new(&base, None).unwrap();
    let health = classifier.health_check().await;
    assert_eq!(health.status, cassava_core::sync::BackendStatus::Online);
    assert!(health.latency_ms.is_some());

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let classifier = RemoteClassifier::new(&dead, None).unwrap();
    assert_eq!(classifier.health_check().await, BackendHealth::offline());
    assert!(!classifier.supports_offline());
}

#[test]
fn label_aliases_are_accepted() {
    for key in LABEL_KEYS {
        let body = json!({ key: "Healthy", "confidence": 0.97 });
        let diagnosis = parse_prediction(&body).unwrap();
        assert_eq!(diagnosis.label, "Healthy");
        assert_eq!(diagnosis.severity, None);
    }
}

#[test]
fn confidence_formats() {
    assert_eq!(parse_confidence(&json!(0.5)).unwrap(), 0.5);
    assert_eq!(parse_confidence(&json!("0.75")).unwrap(), 0.75);
    assert!((parse_confidence(&json!(" 92.5 %")).unwrap() - 0.925).abs() < 1e-9);
    assert!(parse_confidence(&json!(1.5)).is_err());
    assert!(parse_confidence(&json!("150%")).is_err());
    assert!(parse_confidence(&json!("high")).is_err());
    assert!(parse_confidence(&Value::Null).is_err());
}

#[test]
fn missing_label_is_malformed() {
    let err = parse_prediction(&json!({ "confidence": 0.9 })).unwrap_err();
    assert!(matches!(err, InferenceError::Malformed(_)));
}

#[test]
fn validation_detail_list_is_stringified() {
    let detail = error_detail(r#"{"detail":[{"loc":["body","file"],"msg":"field required"}]}"#);
    assert!(detail.contains("field required"));
    assert_eq!(error_detail("Internal Server Error"), "Internal Server Error");
}
