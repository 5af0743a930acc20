//! End-to-end runs of the agent loop against scripted fakes.

use opsclaw_agent::loop_runner::LIST_ASSETS_COMMAND;
use opsclaw_agent::testing::{RecordingExecutor, ScriptedProvider};
use opsclaw_agent::{AgentLoop, RunEvent, RunRequest, RunStatus, prompt};
use opsclaw_core::{CancellationToken, Role};
use std::sync::Arc;
use tokio::sync::mpsc;

fn fleet() -> RecordingExecutor {
    RecordingExecutor::new([("web-01", "ops@10.0.0.1:22"), ("db-01", "ops@10.0.0.2:22")])
}

fn drain(mut rx: mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn run_with(
    provider: Arc<ScriptedProvider>,
    executor: Arc<RecordingExecutor>,
    instruction: &str,
    cancel: &CancellationToken,
) -> (opsclaw_agent::RunOutcome, Vec<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = AgentLoop::new(provider, executor, "test-model");
    let outcome = agent
        .run(RunRequest::new("0123456789ab", instruction), &tx, cancel)
        .await;
    (outcome, drain(rx))
}

#[tokio::test]
async fn list_assets_is_dispatched_and_fed_back() {
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"list_assets"}"#,
        r#"{"action":"final","message":"共 2 台资产，状态正常"}"#,
    ]));
    let executor = Arc::new(fleet());
    let (outcome, events) = run_with(
        provider.clone(),
        executor.clone(),
        "有哪些资产",
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(executor.list_calls(), 1);
    assert_eq!(provider.call_count(), 2);

    let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        kinds,
        vec!["model_reply", "command_start", "command", "model_reply"]
    );
    match &events[2] {
        RunEvent::Command { command, result, .. } => {
            assert_eq!(command, LIST_ASSETS_COMMAND);
            assert!(result.contains("- db-01: ops@10.0.0.2:22"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let second = &provider.requests()[1].messages;
    let last = second.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert!(last.content.starts_with("<tool_result>\n- web-01"));
}

#[tokio::test]
async fn command_then_final_records_one_entry() {
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"df -h"}"#,
        r#"{"action":"final","message":"磁盘使用率 95%，建议清理。"}"#,
    ]));
    let executor = Arc::new(fleet().with_output(
        "web-01",
        "df -h",
        "Filesystem Size Used Avail Use% Mounted on\n/dev/sda1 50G 47G 3.0G 95% /",
    ));
    let (outcome, events) = run_with(
        provider.clone(),
        executor.clone(),
        "web-01 磁盘",
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.reply, "磁盘使用率 95%，建议清理。");
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.commands.len(), 1);
    let record = &outcome.commands[0];
    assert_eq!(record.asset_name, "web-01");
    assert_eq!(record.command, "df -h");
    assert_eq!(record.asset_host, "ops@10.0.0.1:22");
    assert!(record.result.contains("95% /"));

    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::CommandStart { asset_host, .. } if asset_host == "ops@10.0.0.1:22"
    )));
    let requests = provider.requests();
    let fed_back = &requests[1].messages.last().unwrap().content;
    assert!(fed_back.starts_with("<tool_result asset=\"web-01\">\n"));
    assert!(fed_back.ends_with("\n</tool_result>"));
}

#[tokio::test]
async fn dangerous_command_never_reaches_executor() {
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"rm -rf /"}"#,
        r#"{"action":"final","message":"已拒绝危险命令，服务状态正常"}"#,
    ]));
    let executor = Arc::new(fleet());
    let (outcome, events) = run_with(
        provider.clone(),
        executor.clone(),
        "清理 web-01",
        &CancellationToken::new(),
    )
    .await;

    assert!(executor.calls().is_empty());
    assert!(outcome.commands.is_empty());
    assert!(!events.iter().any(|e| e.event_type() == "command_start"));
    assert_eq!(provider.call_count(), 2);
    let requests = provider.requests();
    let fed_back = &requests[1].messages.last().unwrap().content;
    assert!(fed_back.starts_with("<tool_result>"));
    assert_eq!(outcome.status, RunStatus::Done);
}

#[tokio::test]
async fn stop_during_command_keeps_result_and_cancels() {
    let cancel = CancellationToken::new();
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"execute_command","asset":"web-01","command":"uptime"}"#,
        r#"{"action":"execute_command","asset":"db-01","command":"uptime"}"#,
    ]));
    let executor = Arc::new(
        fleet()
            .with_output("web-01", "uptime", "up 3 days")
            .cancel_on_execute(cancel.clone()),
    );
    let (outcome, events) = run_with(provider.clone(), executor.clone(), "uptime", &cancel).await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.reply, prompt::CANCELLED);
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(outcome.commands.len(), 1);
    assert_eq!(outcome.commands[0].result, "up 3 days");
    assert_eq!(events.last().unwrap().event_type(), "command");
}

#[tokio::test]
async fn round_budget_is_a_hard_ceiling() {
    let provider = Arc::new(ScriptedProvider::repeating(r#"{"action":"list_assets"}"#));
    let executor = Arc::new(fleet());
    let (outcome, _) = run_with(
        provider.clone(),
        executor.clone(),
        "巡检",
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.rounds, 50);
    assert_eq!(provider.call_count(), 50);
    assert_eq!(executor.list_calls(), 50);
    assert_eq!(outcome.error.as_deref(), Some(prompt::ROUND_BUDGET_EXHAUSTED));
}

#[tokio::test]
async fn round_temperatures() {
    let provider = Arc::new(ScriptedProvider::new([
        r#"{"action":"list_assets"}"#,
        r#"{"action":"list_assets"}"#,
        r#"{"action":"final","message":"两台资产运行正常"}"#,
    ]));
    run_with(provider.clone(), Arc::new(fleet()), "巡检", &CancellationToken::new()).await;
    assert_eq!(provider.temperatures(), vec![0.5, 0.3, 0.3]);
}

#[tokio::test]
async fn tool_call_markup_is_accepted() {
    let provider = Arc::new(ScriptedProvider::new([
        r#"<think>先看负载</think><tool_call>{"name":"execute_command","arguments":{"asset":"db-01","command":"uptime"}}</tool_call>"#,
        "```json\n{\"action\": \"final\", \"message\": \"db-01 负载正常\"}\n```",
    ]));
    let executor = Arc::new(fleet());
    let (outcome, _) = run_with(provider, executor.clone(), "db-01 负载", &CancellationToken::new()).await;
    assert_eq!(executor.calls(), vec![("db-01".to_string(), "uptime".to_string())]);
    assert_eq!(outcome.reply, "db-01 负载正常");
}
