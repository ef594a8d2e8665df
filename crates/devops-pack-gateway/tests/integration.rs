//! Gateway integration tests: start a real gateway and interact via WS + HTTP.
//!
//! Run with: `cargo test -p devops-pack-gateway --test integration`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use devops_pack_core::config::{Config, RunnerConfig};
use devops_pack_gateway::{GatewayState, ProvisionRunner};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Build a gateway whose runner writes credentials under `creds` and runs `command`.
async fn start_test_gateway(creds: &Path, command: Option<&str>) -> (Arc<GatewayState>, u16) {
    let port = find_free_port();

    let runner_config = RunnerConfig {
        command: command.map(String::from),
        timeout_ms: 10_000,
        credentials_dir: Some(creds.display().to_string()),
        ..Default::default()
    };
    let config = Config {
        runner: Some(runner_config),
        ..Default::default()
    };
    let runner = Arc::new(ProvisionRunner::from_config(&config));
    let state = Arc::new(GatewayState::new(Arc::new(config), runner));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = devops_pack_gateway::start_gateway(state_clone, port, true).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

async fn connect(port: u16) -> Ws {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    let hello = next_frame(&mut ws).await;
    assert_eq!(hello["event"], "connect");
    assert!(hello["data"]["conn_id"].is_string());

    ws
}

async fn next_frame(ws: &mut Ws) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

/// Collect `output` lines until one satisfies `last`.
async fn collect_output(ws: &mut Ws, last: impl Fn(&str) -> bool) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        assert_eq!(frame["event"], "output", "unexpected frame {frame}");
        let line = frame["data"].as_str().unwrap().to_string();
        let done = last(&line);
        lines.push(line);
        if done {
            return lines;
        }
    }
}

async fn send(ws: &mut Ws, frame: serde_json::Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) = start_test_gateway(creds.path(), None).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_ui_served_at_root() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) = start_test_gateway(creds.path(), None).await;

    let body = reqwest::get(format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("id=\"aws_access_key_id\""));
}

#[tokio::test]
async fn test_run_script_streams_command_output() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) =
        start_test_gateway(creds.path(), Some("echo step1; echo step2")).await;
    let mut ws = connect(port).await;

    send(
        &mut ws,
        json!({
            "event": "run_script",
            "data": {
                "aws_access_key_id": "AKIA123",
                "aws_secret_access_key": "secret",
                "region": "us-east-1"
            }
        }),
    )
    .await;

    let lines = collect_output(&mut ws, |l| l.starts_with("Run finished")).await;
    assert_eq!(
        lines[..5],
        [
            "Using default project name \"dev-ops-tools-pack\"",
            "You have opted for single virtual machine",
            "Login success!",
            "step1",
            "step2",
        ]
    );

    let credentials = std::fs::read_to_string(creds.path().join("credentials")).unwrap();
    assert!(credentials.contains("aws_access_key_id = AKIA123"));

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_run_script_missing_credentials() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) = start_test_gateway(creds.path(), Some("echo never")).await;
    let mut ws = connect(port).await;

    send(
        &mut ws,
        json!({
            "event": "run_script",
            "data": {
                "aws_access_key_id": "",
                "aws_secret_access_key": "",
                "region": ""
            }
        }),
    )
    .await;

    let lines = collect_output(&mut ws, |l| l.starts_with("[error]")).await;
    assert_eq!(
        lines,
        [
            "Using default project name \"dev-ops-tools-pack\"",
            "Using default region \"eu-central-1\"",
            "You have opted for single virtual machine",
            "[error] AWS Secret Key ID or AWS Secret Access Key is missing!",
        ]
    );
    assert!(!creds.path().join("credentials").exists());

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_unknown_event_and_bad_frame() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) = start_test_gateway(creds.path(), None).await;
    let mut ws = connect(port).await;

    send(&mut ws, json!({ "event": "nonexistent" })).await;
    let resp = next_frame(&mut ws).await;
    assert_eq!(resp["event"], "error");
    assert!(resp["data"]["message"].as_str().unwrap().contains("nonexistent"));

    ws.send(Message::Text("not json".to_string().into())).await.unwrap();
    let resp = next_frame(&mut ws).await;
    assert_eq!(resp["event"], "error");

    send(&mut ws, json!({ "event": "run_script", "data": "oops" })).await;
    let resp = next_frame(&mut ws).await;
    assert_eq!(resp["event"], "error");
    assert!(resp["data"]["message"].as_str().unwrap().contains("run_script"));

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_connection_tracked_and_released() {
    let creds = tempfile::tempdir().unwrap();
    let (state, port) = start_test_gateway(creds.path(), None).await;

    let mut ws = connect(port).await;
    assert_eq!(state.connection_count().await, 1);

    ws.close(None).await.ok();
    for _ in 0..50 {
        if state.connection_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.connection_count().await, 0);
}

#[tokio::test]
async fn test_run_script_without_region_key_uses_default() {
    let creds = tempfile::tempdir().unwrap();
    let (_state, port) =
        start_test_gateway(creds.path(), Some(r#"echo "region=$AWS_DEFAULT_REGION""#)).await;
    let mut ws = connect(port).await;

    send(
        &mut ws,
        json!({
            "event": "run_script",
            "data": {
                "aws_access_key_id": "AKIA123",
                "aws_secret_access_key": "secret"
            }
        }),
    )
    .await;

    let lines = collect_output(&mut ws, |l| l.starts_with("Run finished")).await;
    assert_eq!(lines[1], "Using default region \"eu-central-1\"");
    assert!(lines.contains(&"region=eu-central-1".to_string()));

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_disconnect_aborts_running_command() {
    let creds = tempfile::tempdir().unwrap();
    let marker = creds.path().join("finished");
    let command = format!("sleep 1; touch '{}'", marker.display());
    let (state, port) = start_test_gateway(creds.path(), Some(&command)).await;
    let mut ws = connect(port).await;

    send(
        &mut ws,
        json!({
            "event": "run_script",
            "data": {
                "aws_access_key_id": "AKIA123",
                "aws_secret_access_key": "secret",
                "region": "us-east-1"
            }
        }),
    )
    .await;
    collect_output(&mut ws, |l| l == "Login success!").await;

    ws.close(None).await.ok();
    drop(ws);
    for _ in 0..50 {
        if state.connection_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.connection_count().await, 0);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!marker.exists(), "command kept running after disconnect");
}
