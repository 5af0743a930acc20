//! End-to-end tests across the opsclaw crates.
//!
//! These wire configuration, the agent loop, session storage and the
//! gateway together the way the binary does, with the model and the fleet
//! replaced by scripted fakes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use opsclaw_agent::session;
use opsclaw_agent::testing::{RecordingExecutor, ScriptedProvider};
use opsclaw_agent::{AgentLoop, NoProgress, RunRequest, RunStatus};
use opsclaw_config::AppConfig;
use opsclaw_core::{CancellationToken, Role, SessionStore, short_id};
use opsclaw_gateway::{GatewayState, build_router};
use opsclaw_memory::SqliteSessionStore;
use tower::ServiceExt;

const CONFIG: &str = r#"
[provider]
api_key = "sk-test"
model = "deepseek-chat"

[agent]
max_rounds = 3

[[assets]]
name = "web-01"
host = "10.0.0.1"
username = "ops"
password = "hunter2"

[[assets]]
name = "db-01"
host = "10.0.0.2"
port = 2222
username = "postgres"
"#;

fn load_config(dir: &tempfile::TempDir) -> AppConfig {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    let mut config = AppConfig::load_from(&path).unwrap();
    config.sessions.db_path = Some(dir.path().join("sessions.db").to_string_lossy().to_string());
    config
}

fn fleet() -> RecordingExecutor {
    RecordingExecutor::new([("web-01", "ops@10.0.0.1:22"), ("db-01", "postgres@10.0.0.2:2222")])
}

async fn open_store(config: &AppConfig) -> Arc<dyn SessionStore> {
    let path = config.session_db_path();
    Arc::new(SqliteSessionStore::new(&path.to_string_lossy()).await.unwrap())
}

// ── Config ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_config_file_drives_the_agent() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir);
    assert!(config.validate().is_ok());
    assert!(!config.needs_api_key());
    assert_eq!(config.asset("db-01").unwrap().port, 2222);
    assert_eq!(config.asset("web-01").unwrap().port, 22);

    let provider = Arc::new(ScriptedProvider::repeating(r#"{"action":"list_assets"}"#));
    let agent = AgentLoop::from_config(provider.clone(), Arc::new(fleet()), &config);
    let outcome = agent
        .run(
            RunRequest::new(short_id(), "巡检所有主机"),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(provider.call_count(), 3);
    assert!(provider.requests().iter().all(|r| r.model == "deepseek-chat"));
}

#[tokio::test]
async fn e2e_starter_config_parses_and_validates() {
    let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
    assert!(parsed.validate().is_ok());
    assert_eq!(parsed.agent.max_rounds, 50);
    assert_eq!(parsed.gateway.port, 8000);
    assert!(!parsed.assets.is_empty());
}

// ── Agent + sessions ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_two_turns_share_a_sqlite_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir);
    let store = open_store(&config).await;

    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"uptime"}"#,
        r#"{"action":"final","message":"web-01 已运行 3 天，状态正常。"}"#,
        r#"{"action":"final","message":"web-01 负载 0.15，处于正常范围。"}"#,
    ]));
    let executor = Arc::new(fleet().with_output("web-01", "uptime", "up 3 days, load average: 0.15"));
    let agent = AgentLoop::from_config(provider.clone(), executor.clone(), &config);
    let cancel = CancellationToken::new();

    // First turn: new session.
    let first = session::resume(store.as_ref(), None).await.unwrap();
    assert!(first.existing.is_none());
    let outcome = agent
        .run(
            RunRequest::new(short_id(), "web-01 运行多久了").with_history(first.history()),
            &NoProgress,
            &cancel,
        )
        .await;
    assert!(outcome.is_done());
    assert_eq!(outcome.commands.len(), 1);
    assert_eq!(outcome.commands[0].asset_host, "ops@10.0.0.1:22");
    session::record(store.as_ref(), &first, "web-01 运行多久了", None, &outcome)
        .await
        .unwrap();

    // Second turn: continues with the stored conversation.
    let second = session::resume(store.as_ref(), Some(first.id.as_str())).await.unwrap();
    assert_eq!(second.id, first.id);
    let history = second.history();
    assert!(history.iter().any(|m| m.role == Role::User && m.content == "web-01 运行多久了"));

    let outcome = agent
        .run(
            RunRequest::new(short_id(), "负载呢").with_history(history),
            &NoProgress,
            &cancel,
        )
        .await;
    assert_eq!(outcome.reply, "web-01 负载 0.15，处于正常范围。");
    session::record(store.as_ref(), &second, "负载呢", Some("web-01".into()), &outcome)
        .await
        .unwrap();

    let last_request = provider.requests().pop().unwrap();
    assert!(
        last_request
            .messages
            .iter()
            .any(|m| m.content.contains("up 3 days"))
    );

    let stored = store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "web-01 运行多久了");
    assert_eq!(stored.turns.len(), 2);
    assert_eq!(stored.turns[1].asset_select.as_deref(), Some("web-01"));
    assert_eq!(store.list().await.unwrap().len(), 1);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn e2e_dangerous_command_never_reaches_the_fleet() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir);
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"db-01","command":"rm -rf /"}"#,
        r#"{"action":"final","message":"该命令风险过高，已放弃执行，db-01 未做任何变更。"}"#,
    ]));
    let executor = Arc::new(fleet());
    let agent = AgentLoop::from_config(provider, executor.clone(), &config);

    let outcome = agent
        .run(
            RunRequest::new(short_id(), "清空 db-01"),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_done());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn e2e_failed_run_keeps_no_turn() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir);
    let store = open_store(&config).await;
    let agent = AgentLoop::from_config(
        Arc::new(ScriptedProvider::new(Vec::<String>::new())),
        Arc::new(fleet()),
        &config,
    );

    let handle = session::resume(store.as_ref(), None).await.unwrap();
    let outcome = agent
        .run(
            RunRequest::new(short_id(), "巡检"),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome.status, RunStatus::Failed);
    session::record(store.as_ref(), &handle, "巡检", None, &outcome)
        .await
        .unwrap();

    let stored = store.get(&handle.id).await.unwrap().unwrap();
    assert!(stored.turns.is_empty());
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_gateway_over_sqlite_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir);
    let store = open_store(&config).await;
    let provider = Arc::new(ScriptedProvider::repeating(
        r#"{"action":"final","message":"两台主机均在线，状态正常。"}"#,
    ));
    let agent = Arc::new(AgentLoop::from_config(provider, Arc::new(fleet()), &config));
    let app = build_router(Arc::new(GatewayState::new(config, agent, store.clone())));

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let run = Request::builder()
        .method("POST")
        .uri("/api/run")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"instruction":"主机都在线吗"}"#))
        .unwrap();
    let response = app.clone().oneshot(run).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["reply"], "两台主机均在线，状态正常。");

    let session_id = body["session_id"].as_str().unwrap();
    let stored = store.get(session_id).await.unwrap().unwrap();
    assert_eq!(stored.turns.len(), 1);
    assert_eq!(stored.turns[0].user, "主机都在线吗");
}
