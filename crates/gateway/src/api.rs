//! HTTP API.
//!
//! Endpoints:
//!
//! - `GET    /api/assets`                   Configured assets, without secrets
//! - `POST   /api/run`                      Run an instruction, wait for the reply
//! - `POST   /api/run/stream`               Run an instruction, SSE progress
//! - `POST   /api/run/stop`                 Request a running run to stop
//! - `GET    /api/run/status/{trace_id}`    Current `RunState` snapshot
//! - `GET    /api/sessions`                 Sessions, most recent first
//! - `GET    /api/sessions/{id}`            One session with its turns
//! - `DELETE /api/sessions/{id}`            Delete a session

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{delete, get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

use opsclaw_agent::session::{self, SessionHandle};
use opsclaw_agent::{ProgressSink, RunEvent, RunOutcome, RunRequest, RunStatus};
use opsclaw_core::{CommandRecord, RunState, SessionSummary, Turn, short_id};

use crate::SharedState;
use crate::registry::RegistrySink;

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub instruction: String,
    #[serde(default)]
    pub asset_names: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// UI selection label, stored with the turn.
    #[serde(default)]
    pub asset_select: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub reply: String,
    pub commands: Vec<CommandRecord>,
    pub trace_id: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StopBody {
    pub trace_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct AssetView {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub has_password: bool,
    pub has_private_key: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub turns: Vec<Turn>,
}

const RUN_NOT_FOUND: &str = "未找到该任务或任务已结束";
const SESSION_NOT_FOUND: &str = "会话不存在";

// ── Router ────────────────────────────────────────────────────────────────

/// `/api` routes. Nest under `/api`.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/assets", get(list_assets_handler))
        .route("/run", post(run_handler))
        .route("/run/stream", post(run_stream_handler))
        .route("/run/stop", post(stop_handler))
        .route("/run/status/{trace_id}", get(status_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .with_state(state)
}

// ── Runs ──────────────────────────────────────────────────────────────────

/// A validated run request with its ids assigned.
struct PreparedRun {
    trace_id: String,
    instruction: String,
    asset_names: Vec<String>,
    asset_select: Option<String>,
    session: SessionHandle,
}

async fn prepare(state: &SharedState, body: RunBody) -> Result<PreparedRun, ApiError> {
    let instruction = body.instruction.trim().to_string();
    if instruction.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "instruction 不能为空"));
    }
    let session = session::resume(state.sessions.as_ref(), body.session_id.as_deref())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let asset_names = body
        .asset_names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    Ok(PreparedRun {
        trace_id: short_id(),
        instruction,
        asset_names,
        asset_select: body.asset_select,
        session,
    })
}

/// Register, run to completion on its own task, persist, and report the
/// terminal event. Returns the outcome and the terminal event sent.
async fn drive(
    state: SharedState,
    run: PreparedRun,
    events: Option<UnboundedSender<RunEvent>>,
) -> (RunOutcome, RunEvent) {
    let PreparedRun {
        trace_id,
        instruction,
        asset_names,
        asset_select,
        session,
    } = run;
    let cancel = state.registry.register(
        &trace_id,
        &session.id,
        &instruction,
        asset_names.clone(),
    );
    if let Some(tx) = &events {
        tx.emit(RunEvent::Start {
            trace_id: trace_id.clone(),
            session_id: session.id.clone(),
        });
    }

    let sink = RegistrySink::new(state.registry.clone(), trace_id.clone(), events.clone());
    let request = RunRequest::new(trace_id.clone(), instruction.clone())
        .with_asset_names(asset_names)
        .with_history(session.history());
    let outcome = state.agent.run(request, &sink, &cancel).await;

    if let Err(e) =
        session::record(state.sessions.as_ref(), &session, &instruction, asset_select, &outcome).await
    {
        warn!(trace_id = %trace_id, session_id = %session.id, error = %e, "Failed to save session");
    }

    let terminal = match outcome.status {
        RunStatus::Failed => {
            let detail = outcome
                .error
                .clone()
                .unwrap_or_else(|| outcome.reply.clone());
            state.registry.finish(&trace_id, None, Some(&detail));
            RunEvent::Error { detail }
        }
        RunStatus::Done | RunStatus::Cancelled => {
            state.registry.finish(&trace_id, Some(&outcome.reply), None);
            RunEvent::Reply {
                reply: outcome.reply.clone(),
            }
        }
    };
    info!(
        trace_id = %trace_id,
        status = ?outcome.status,
        rounds = outcome.rounds,
        commands = outcome.commands.len(),
        "Run complete"
    );
    if let Some(tx) = &events {
        tx.emit(terminal.clone());
    }
    (outcome, terminal)
}

/// `POST /api/run`
async fn run_handler(
    State(state): State<SharedState>,
    Json(body): Json<RunBody>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = prepare(&state, body).await?;
    let trace_id = run.trace_id.clone();
    let session_id = run.session.id.clone();
    info!(trace_id = %trace_id, instruction = %run.instruction, assets = ?run.asset_names, "/api/run");

    let registry = state.registry.clone();
    let (outcome, terminal) = tokio::spawn(drive(state, run, None))
        .await
        .map_err(|e| {
            error!(trace_id = %trace_id, error = %e, "Run task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("执行出错: {e}"))
        })?;
    registry.acknowledge(&trace_id);

    match terminal {
        RunEvent::Error { detail } if outcome.reply.is_empty() => {
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, detail))
        }
        _ => Ok(Json(RunResponse {
            reply: outcome.reply,
            commands: outcome.commands,
            trace_id,
            session_id,
        })),
    }
}

fn sse_event(event: &RunEvent) -> SseEvent {
    SseEvent::default()
        .event(event.event_type())
        .data(event.data())
}

/// `POST /api/run/stream`
///
/// Emits a leading comment, then `start`, progress events and exactly one
/// terminal `reply` or `error`. Idle gaps get keep-alive comments.
async fn run_stream_handler(
    State(state): State<SharedState>,
    Json(body): Json<RunBody>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let run = prepare(&state, body).await?;
    let trace_id = run.trace_id.clone();
    info!(trace_id = %trace_id, instruction = %run.instruction, assets = ?run.asset_names, "/api/run/stream");

    let heartbeat = Duration::from_secs(state.config.gateway.heartbeat_secs);
    let registry = state.registry.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(state, run, Some(tx)));

    let opening = futures::stream::once(async {
        Ok::<_, Infallible>(SseEvent::default().comment("stream start"))
    });
    let events = UnboundedReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    // Runs once the channel closes, i.e. after the terminal event went out.
    let drained = futures::stream::once(async move {
        info!(trace_id = %trace_id, "Event stream drained");
        registry.acknowledge(&trace_id);
    })
    .filter_map(|()| async { None::<Result<SseEvent, Infallible>> });

    let stream = opening.chain(events).chain(drained);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text("keep-alive"),
    ))
}

/// `POST /api/run/stop`
async fn stop_handler(
    State(state): State<SharedState>,
    Json(body): Json<StopBody>,
) -> Result<Json<StopResponse>, ApiError> {
    state.registry.stop(&body.trace_id).map_err(|e| {
        warn!(trace_id = %body.trace_id, error = %e, "Stop for unknown run");
        api_error(StatusCode::NOT_FOUND, RUN_NOT_FOUND)
    })?;
    Ok(Json(StopResponse {
        ok: true,
        message: "已发送停止请求".into(),
    }))
}

/// `GET /api/run/status/{trace_id}`
async fn status_handler(
    State(state): State<SharedState>,
    Path(trace_id): Path<String>,
) -> Result<Json<RunState>, ApiError> {
    state
        .registry
        .status(&trace_id)
        .map(Json)
        .map_err(|_| api_error(StatusCode::NOT_FOUND, RUN_NOT_FOUND))
}

// ── Assets ────────────────────────────────────────────────────────────────

async fn list_assets_handler(State(state): State<SharedState>) -> Json<Vec<AssetView>> {
    Json(
        state
            .config
            .assets
            .iter()
            .map(|a| AssetView {
                name: a.name.clone(),
                host: a.host.clone(),
                port: a.port,
                username: a.username.clone(),
                has_password: a.password.as_deref().is_some_and(|p| !p.is_empty()),
                has_private_key: a
                    .private_key_path
                    .as_deref()
                    .is_some_and(|p| !p.trim().is_empty()),
            })
            .collect(),
    )
}

// ── Sessions ──────────────────────────────────────────────────────────────

async fn list_sessions_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    state
        .sessions
        .list()
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let record = state
        .sessions
        .get(&id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND))?;
    Ok(Json(SessionDetail {
        id: record.id,
        title: record.title,
        created_at: record.created_at,
        updated_at: record.updated_at,
        turns: record.turns,
    }))
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let removed = state
        .sessions
        .delete(&id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !removed {
        return Err(api_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND));
    }
    info!(session_id = %id, "Session deleted");
    Ok(Json(OkResponse { ok: true }))
}
