//! Request-level tests for the run and session API.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use opsclaw_agent::AgentLoop;
use opsclaw_agent::testing::{RecordingExecutor, ScriptedProvider};
use opsclaw_config::{AppConfig, AssetConfig};
use opsclaw_gateway::{GatewayState, SharedState, build_router};
use opsclaw_memory::InMemorySessionStore;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state_with(provider: ScriptedProvider, executor: RecordingExecutor) -> SharedState {
    let ttl = AppConfig::default().gateway.finished_run_ttl_secs;
    state_with_ttl(provider, executor, ttl)
}

fn state_with_ttl(provider: ScriptedProvider, executor: RecordingExecutor, ttl_secs: u64) -> SharedState {
    let mut config = AppConfig::default();
    config.gateway.finished_run_ttl_secs = ttl_secs;
    config.assets.push(AssetConfig {
        name: "web-01".into(),
        host: "10.0.0.1".into(),
        port: 22,
        username: "ops".into(),
        password: Some("hunter2".into()),
        private_key_path: None,
    });
    let agent = Arc::new(AgentLoop::from_config(
        Arc::new(provider),
        Arc::new(executor),
        &config,
    ));
    Arc::new(GatewayState::new(
        config,
        agent,
        Arc::new(InMemorySessionStore::new()),
    ))
}

fn fleet() -> RecordingExecutor {
    RecordingExecutor::new([("web-01", "ops@10.0.0.1:22")])
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn send_text(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

/// `data:` payload of the first `event: <kind>` in an SSE body.
fn event_data(body: &str, kind: &str) -> Option<Value> {
    let marker = format!("event: {kind}\n");
    let start = body.find(&marker)? + marker.len();
    let line = body[start..].lines().next()?;
    serde_json::from_str(line.strip_prefix("data: ")?).ok()
}

#[tokio::test]
async fn sync_run_persists_and_continues_session() {
    let provider = ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"uptime"}"#,
        r#"{"action":"final","message":"web-01 已运行 3 天，状态正常"}"#,
        r#"{"action":"final","message":"web-01 负载正常"}"#,
    ]);
    let app = build_router(state_with(
        provider,
        fleet().with_output("web-01", "uptime", "up 3 days"),
    ));

    let (status, body) = send(&app, post("/api/run", json!({"instruction": "web-01 运行多久了"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "web-01 已运行 3 天，状态正常");
    assert_eq!(body["commands"][0]["command"], "uptime");
    assert_eq!(body["commands"][0]["result"], "up 3 days");
    assert_eq!(body["commands"][0]["asset_host"], "ops@10.0.0.1:22");
    assert_eq!(body["trace_id"].as_str().unwrap().len(), 12);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post(
            "/api/run",
            json!({"instruction": "负载呢", "session_id": session_id, "asset_select": "web-01"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id.as_str());

    let (status, list) = send(&app, get("/api/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["title"], "web-01 运行多久了");

    let (status, detail) = send(&app, get(&format!("/api/sessions/{session_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let turns = detail["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["user"], "负载呢");
    assert_eq!(turns[1]["asset_select"], "web-01");
    assert!(detail.get("messages").is_none());

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/sessions/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = send(&app, get(&format!("/api/sessions/{session_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "会话不存在");
}

#[tokio::test]
async fn empty_instruction_is_rejected() {
    let app = build_router(state_with(ScriptedProvider::repeating("{}"), fleet()));
    let (status, body) = send(&app, post("/api/run", json!({"instruction": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("instruction"));

    let (status, _) = send(&app, post("/api/run/stream", json!({"instruction": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transport_failure_surfaces_as_error() {
    let provider = ScriptedProvider::new(Vec::<String>::new());
    let app = build_router(state_with(provider, fleet()));
    let (status, body) = send(&app, post("/api/run", json!({"instruction": "巡检"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().starts_with("模型调用失败"));
}

#[tokio::test]
async fn stream_emits_ordered_events_and_stays_pollable() {
    let provider = ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"df -h"}"#,
        r#"{"action":"final","message":"磁盘使用率 95%，建议清理。"}"#,
    ]);
    let state = state_with(provider, fleet().with_output("web-01", "df -h", "/dev/sda1 50G 47G 3G 95% /"));
    let app = build_router(state.clone());

    let (status, text) = send_text(&app, post("/api/run/stream", json!({"instruction": "检查 web-01"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with(':'));
    assert!(text.contains("stream start"));

    let order: Vec<usize> = ["start", "model_reply", "command_start", "command", "reply"]
        .iter()
        .map(|k| text.find(&format!("event: {k}\n")).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "events out of order:\n{text}");
    assert!(!text.contains("event: error\n"));

    let start = event_data(&text, "start").unwrap();
    let trace_id = start["trace_id"].as_str().unwrap().to_string();
    assert_eq!(start["session_id"].as_str().unwrap().len(), 12);

    let command = event_data(&text, "command").unwrap();
    assert_eq!(command["asset_host"], "ops@10.0.0.1:22");
    assert_eq!(command["result"], "/dev/sda1 50G 47G 3G 95% /");
    assert_eq!(event_data(&text, "reply").unwrap()["reply"], "磁盘使用率 95%，建议清理。");

    let (status, snapshot) = send(&app, get(&format!("/api/run/status/{trace_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["running"], false);
    assert_eq!(snapshot["reply"], "磁盘使用率 95%，建议清理。");
    assert_eq!(snapshot["commands"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["model_replies"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, post("/api/run/stop", json!({"trace_id": trace_id}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "未找到该任务或任务已结束");
}

#[tokio::test]
async fn round_budget_exhaustion_streams_error() {
    let provider = ScriptedProvider::repeating(r#"{"action":"list_assets"}"#);
    let app = build_router(state_with(provider, fleet()));
    let (_, text) = send_text(&app, post("/api/run/stream", json!({"instruction": "巡检"}))).await;
    let error = event_data(&text, "error").unwrap();
    assert_eq!(error["detail"], "已达到最大轮数，任务未完成。");
    assert!(!text.contains("event: reply\n"));
    assert_eq!(text.matches("event: model_reply\n").count(), 50);
}

#[tokio::test]
async fn stop_mid_run_cancels_at_next_round() {
    let provider = ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"sleep 1"}"#,
        r#"{"action":"execute_command","asset":"web-01","command":"uptime"}"#,
    ]);
    let executor = fleet().with_delay(Duration::from_millis(300));
    let state = state_with(provider, executor);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post("/api/run/stream", json!({"instruction": "慢命令"})))
        .await
        .unwrap();
    let mut body = response.into_body();
    let mut text = String::new();
    while event_data(&text, "start").is_none() {
        let frame = body.frame().await.unwrap().unwrap();
        if let Ok(data) = frame.into_data() {
            text.push_str(&String::from_utf8_lossy(&data));
        }
    }
    let trace_id = event_data(&text, "start").unwrap()["trace_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, ack) = send(&app, post("/api/run/stop", json!({"trace_id": trace_id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], true);

    let rest = body.collect().await.unwrap().to_bytes();
    text.push_str(&String::from_utf8_lossy(&rest));
    assert_eq!(event_data(&text, "reply").unwrap()["reply"], "已按用户请求停止。");
    assert!(!text.contains("\"command\":\"uptime\""));
}

#[tokio::test]
async fn disconnected_stream_run_is_swept() {
    let provider = ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"uptime"}"#,
        r#"{"action":"final","message":"web-01 运行正常"}"#,
    ]);
    let executor = fleet().with_delay(Duration::from_millis(100));
    let state = state_with_ttl(provider, executor, 0);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post("/api/run/stream", json!({"instruction": "检查 web-01"})))
        .await
        .unwrap();
    let mut body = response.into_body();
    body.frame().await.unwrap().unwrap();
    // The client goes away before the terminal event, so nothing acknowledges the run.
    drop(body);

    let mut swept = 0;
    for _ in 0..100 {
        swept += state.registry.sweep();
        if swept > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(swept, 1);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn unknown_run_status_is_404() {
    let app = build_router(state_with(ScriptedProvider::repeating("{}"), fleet()));
    let (status, body) = send(&app, get("/api/run/status/000000000000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "未找到该任务或任务已结束");
}

#[tokio::test]
async fn assets_hide_secrets() {
    let app = build_router(state_with(ScriptedProvider::repeating("{}"), fleet()));
    let (status, body) = send(&app, get("/api/assets")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "web-01");
    assert_eq!(body[0]["has_password"], true);
    assert!(!body.to_string().contains("hunter2"));
}
