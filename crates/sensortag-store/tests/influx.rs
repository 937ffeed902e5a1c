//! InfluxSink against an in-process fake InfluxDB.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use sensortag_core::{Sample, SinkError, TelemetrySink};
use sensortag_store::{InfluxConfig, InfluxSink};
use sensortag_types::{DeviceKind, Metric};
use time::OffsetDateTime;

#[derive(Default)]
struct Recorded {
    queries: Vec<String>,
    writes: Vec<(HashMap<String, String>, String)>,
    auth: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn query(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    let mut recorded = state.lock().unwrap();
    if let Some(auth) = headers.get("authorization") {
        recorded.auth.push(auth.to_str().unwrap().to_string());
    }
    recorded.queries.push(form.get("q").cloned().unwrap_or_default());
    StatusCode::OK
}

async fn write(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> (StatusCode, String) {
    if body.contains("reject") {
        return (
            StatusCode::BAD_REQUEST,
            "{\"error\":\"unable to parse\"}".to_string(),
        );
    }
    state.lock().unwrap().writes.push((params, body));
    (StatusCode::NO_CONTENT, String::new())
}

async fn fake_influx() -> (InfluxConfig, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/query", post(query))
        .route("/write", post(write))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = InfluxConfig::new("st_report", "reporter", "secret")
        .host("127.0.0.1")
        .port(port);
    (config, state)
}

fn sample(device_id: &str, metric: Metric, value: f64) -> Sample {
    Sample {
        device_id: device_id.to_string(),
        kind: DeviceKind::Cc2650SensorTag,
        metric,
        value,
        timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
    }
}

#[tokio::test]
async fn test_ensure_database_sends_create_with_basic_auth() {
    let (config, state) = fake_influx().await;
    let sink = InfluxSink::new(config).unwrap();

    sink.ensure_database("st_report").await.unwrap();
    sink.ensure_database("st_report").await.unwrap();

    let recorded = state.lock().unwrap();
    assert_eq!(
        recorded.queries,
        vec!["CREATE DATABASE \"st_report\""; 2]
    );
    // base64("reporter:secret")
    assert_eq!(recorded.auth[0], "Basic cmVwb3J0ZXI6c2VjcmV0");
}

#[tokio::test]
async fn test_write_posts_line_protocol() {
    let (config, state) = fake_influx().await;
    let sink = InfluxSink::new(config).unwrap();

    sink.write(&sample("B0:B4:48:C0:12:34", Metric::Humidity, 41.5))
        .await
        .unwrap();

    let recorded = state.lock().unwrap();
    let (params, body) = &recorded.writes[0];
    assert_eq!(params.get("db").map(String::as_str), Some("st_report"));
    assert_eq!(params.get("precision").map(String::as_str), Some("ms"));
    assert_eq!(
        body,
        "humidity_TI-ST_b0b448c01234 value=41.5 1700000000000"
    );
}

#[tokio::test]
async fn test_rejected_write_reports_status() {
    let (config, _state) = fake_influx().await;
    let sink = InfluxSink::new(config).unwrap();

    let err = sink
        .write(&sample("reject", Metric::Lux, 1.0))
        .await
        .unwrap_err();
    match err {
        SinkError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("unable to parse"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
