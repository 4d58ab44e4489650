//! Integration tests for the host API client against an in-process fake host.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use printmon_rs::client::{ConnectionState, PrinterApi, PrinterStatusClient, StatusError};
use printmon_rs::detector::DetectionSettings;
use printmon_rs::lock::PrintStateLock;
use printmon_rs::supervisor::{ReconnectSupervisor, SupervisorSettings, TokioSleeper};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const API_KEY: &str = "TESTKEY0123";

struct MockHost {
    connection: (StatusCode, String),
    printer: (StatusCode, String),
    connect_status: StatusCode,
    delay: Option<Duration>,
    api_keys: Mutex<Vec<String>>,
    connect_bodies: Mutex<Vec<Value>>,
}

impl MockHost {
    fn new() -> Self {
        Self {
            connection: (StatusCode::OK, connection_body("Operational")),
            printer: (StatusCode::OK, printer_body(false, false, 0.0, 0.0)),
            connect_status: StatusCode::NO_CONTENT,
            delay: None,
            api_keys: Mutex::new(Vec::new()),
            connect_bodies: Mutex::new(Vec::new()),
        }
    }

    fn record_key(&self, headers: &HeaderMap) {
        let key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.api_keys.lock().unwrap().push(key);
    }
}

fn connection_body(state: &str) -> String {
    json!({
        "current": { "state": state, "port": "/dev/ttyACM0", "baudrate": 115200 },
        "options": { "ports": ["/dev/ttyACM0"] }
    })
    .to_string()
}

fn printer_body(printing: bool, paused: bool, tool_target: f64, bed_target: f64) -> String {
    json!({
        "state": {
            "text": "Operational",
            "flags": { "operational": true, "printing": printing, "paused": paused, "ready": true }
        },
        "temperature": {
            "tool0": { "actual": 24.5, "target": tool_target, "offset": 0 },
            "bed": { "actual": 23.1, "target": bed_target, "offset": 0 }
        }
    })
    .to_string()
}

async fn get_connection(State(host): State<Arc<MockHost>>, headers: HeaderMap) -> (StatusCode, String) {
    host.record_key(&headers);
    if let Some(delay) = host.delay {
        tokio::time::sleep(delay).await;
    }
    host.connection.clone()
}

async fn post_connection(
    State(host): State<Arc<MockHost>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    host.record_key(&headers);
    host.connect_bodies.lock().unwrap().push(body);
    host.connect_status
}

async fn get_printer(State(host): State<Arc<MockHost>>, headers: HeaderMap) -> (StatusCode, String) {
    host.record_key(&headers);
    host.printer.clone()
}

async fn spawn_host(host: Arc<MockHost>) -> String {
    let app = Router::new()
        .route("/api/connection", get(get_connection).post(post_connection))
        .route("/api/printer", get(get_printer))
        .with_state(host);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn client_with_timeout(base: &str, timeout: Duration) -> PrinterStatusClient {
    // Loopback traffic must not be routed through an ambient HTTP proxy.
    // The reqwest client itself has no timeout; the status client applies one.
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    PrinterStatusClient::with_http_client(base, API_KEY, timeout, http).unwrap()
}

fn client(base: &str) -> PrinterStatusClient {
    client_with_timeout(base, Duration::from_secs(5))
}

#[tokio::test]
async fn test_connection_status_parses_state_and_port() {
    let host = Arc::new(MockHost::new());
    let base = spawn_host(host.clone()).await;
    let status = client(&base).connection_status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Operational);
    assert_eq!(status.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(*host.api_keys.lock().unwrap(), vec![API_KEY.to_string()]);
}

#[tokio::test]
async fn test_connection_status_non_200_is_http_error() {
    let mut host = MockHost::new();
    host.connection = (StatusCode::FORBIDDEN, String::new());
    let base = spawn_host(Arc::new(host)).await;
    let err = client(&base).connection_status().await.unwrap_err();
    assert_eq!(err, StatusError::HttpStatus(403));
}

#[tokio::test]
async fn test_printer_telemetry_parses_flags_and_temperatures() {
    let mut host = MockHost::new();
    host.printer = (StatusCode::OK, printer_body(true, false, 210.0, 60.0));
    let base = spawn_host(Arc::new(host)).await;
    let telemetry = client(&base).printer_telemetry().await.unwrap();
    assert!(telemetry.printing);
    assert!(!telemetry.paused);
    assert_eq!(telemetry.extruder.target, 210.0);
    assert_eq!(telemetry.extruder.actual, 24.5);
    assert_eq!(telemetry.bed.target, 60.0);
    assert_eq!(telemetry.bed.actual, 23.1);
}

#[tokio::test]
async fn test_malformed_printer_payload_is_unparseable() {
    let mut host = MockHost::new();
    host.printer = (StatusCode::OK, json!({ "state": { "flags": { "printing": false } } }).to_string());
    let base = spawn_host(Arc::new(host)).await;
    let err = client(&base).printer_telemetry().await.unwrap_err();
    assert!(err.is_unparseable(), "got {:?}", err);
}

#[tokio::test]
async fn test_null_temperature_is_unparseable() {
    let mut host = MockHost::new();
    host.printer = (
        StatusCode::OK,
        json!({
            "state": { "flags": { "printing": false, "paused": false } },
            "temperature": {
                "tool0": { "actual": null, "target": null },
                "bed": { "actual": 20.0, "target": 0.0 }
            }
        })
        .to_string(),
    );
    let base = spawn_host(Arc::new(host)).await;
    assert!(client(&base).printer_telemetry().await.unwrap_err().is_unparseable());
}

#[tokio::test]
async fn test_printer_conflict_is_http_error() {
    let mut host = MockHost::new();
    host.printer = (StatusCode::CONFLICT, "Printer is not operational".to_string());
    let base = spawn_host(Arc::new(host)).await;
    let err = client(&base).printer_telemetry().await.unwrap_err();
    assert_eq!(err, StatusError::HttpStatus(409));
    assert!(!err.is_unparseable());
}

#[tokio::test]
async fn test_request_connect_posts_command() {
    let host = Arc::new(MockHost::new());
    let base = spawn_host(host.clone()).await;
    client(&base).request_connect("/dev/ttyUSB0", 250000).await.unwrap();
    let bodies = host.connect_bodies.lock().unwrap();
    assert_eq!(
        *bodies,
        vec![json!({ "command": "connect", "port": "/dev/ttyUSB0", "baudrate": 250000 })]
    );
    assert_eq!(*host.api_keys.lock().unwrap(), vec![API_KEY.to_string()]);
}

#[tokio::test]
async fn test_request_connect_requires_204() {
    let mut host = MockHost::new();
    host.connect_status = StatusCode::OK;
    let base = spawn_host(Arc::new(host)).await;
    let err = client(&base).request_connect("/dev/ttyACM0", 115200).await.unwrap_err();
    assert_eq!(err, StatusError::HttpStatus(200));
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = client(&format!("http://{}/", addr)).connection_status().await.unwrap_err();
    assert!(matches!(err, StatusError::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_slow_host_times_out() {
    let mut host = MockHost::new();
    host.delay = Some(Duration::from_secs(5));
    let base = spawn_host(Arc::new(host)).await;
    let client = client_with_timeout(&base, Duration::from_millis(200));
    let started = std::time::Instant::now();
    let err = client.connection_status().await.unwrap_err();
    assert!(matches!(err, StatusError::Network(_)), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_supervisor_reconnects_closed_printer_over_http() {
    let mut host = MockHost::new();
    host.connection = (StatusCode::OK, connection_body("Closed"));
    let host = Arc::new(host);
    let base = spawn_host(host.clone()).await;

    let dir = tempdir().unwrap();
    let settings = SupervisorSettings {
        serial_port: "/dev/ttyACM0".to_string(),
        baud_rate: 115200,
        connect_interval: Duration::from_secs(30),
        print_interval: Duration::from_secs(300),
        detection: DetectionSettings::disabled(),
    };
    let lock = PrintStateLock::new(dir.path().join(".printlock"));
    let mut supervisor = ReconnectSupervisor::new(client(&base), lock, settings, TokioSleeper);

    let report = supervisor.run_iteration().await;
    assert!(report.connect_attempted);
    assert!(report.connect_accepted);
    assert!(!report.telemetry_polled);
    assert_eq!(host.connect_bodies.lock().unwrap().len(), 1);
}
