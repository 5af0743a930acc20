//! The agent loop: ask the model, decode one action, dispatch it, repeat.

use crate::codec::ToolResultCodec;
use crate::parser::ActionParser;
use crate::prompt;
use crate::report;
use crate::stream_event::{ProgressSink, RunEvent};
use crate::transcript::InteractionLog;
use opsclaw_config::AppConfig;
use opsclaw_core::run::fill_command;
use opsclaw_core::{
    Action, AssetExecutor, CancellationToken, CommandRecord, Conversation, Message, Provider,
    ProviderError, ProviderRequest, Role, ToolResult,
};
use opsclaw_security::{
    GuardVerdict, SafetyGuard, is_fluff, looks_like_asset_reselection, looks_like_final_summary,
    looks_like_intent_without_dispatch,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ROUNDS: u32 = 50;
pub const DEFAULT_MAX_NUDGES: u32 = 2;

const FIRST_ROUND_TEMPERATURE: f32 = 0.5;
const LATER_ROUND_TEMPERATURE: f32 = 0.3;
const FIRST_ROUND_RETRY_TEMPERATURE: f32 = 0.7;
const SUMMARY_TEMPERATURE: f32 = 0.2;
const STRICT_SUMMARY_TEMPERATURE: f32 = 0.1;

/// A re-ask reply shorter than this that opens like an action but does not
/// parse was cut off mid-JSON.
const TRUNCATED_ACTION_CHARS: usize = 80;
const LONG_TEXT_SUMMARY_CHARS: usize = 400;
const TABLE_TEXT_CHARS: usize = 100;

/// Command name recorded for an asset listing.
pub const LIST_ASSETS_COMMAND: &str = "list_assets";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A final answer was produced.
    Done,
    /// Round budget exhausted, or the model transport failed.
    Failed,
    /// Stopped at a round boundary on request.
    Cancelled,
}

/// One instruction to run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub trace_id: String,
    pub instruction: String,
    /// Assets the caller fixed for this run; empty means unconstrained.
    pub asset_names: Vec<String>,
    /// Messages of the session being continued, if any.
    pub history: Vec<Message>,
}

impl RunRequest {
    pub fn new(trace_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            instruction: instruction.into(),
            asset_names: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_asset_names(mut self, asset_names: Vec<String>) -> Self {
        self.asset_names = asset_names;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Result of one run, ready to persist.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub trace_id: String,
    pub status: RunStatus,
    /// Text for the operator. Empty only when the model transport failed.
    pub reply: String,
    /// Set when `status` is `Failed`.
    pub error: Option<String>,
    /// The whole conversation including history, for session storage.
    pub conversation: Conversation,
    pub commands: Vec<CommandRecord>,
    /// Model rounds used.
    pub rounds: u32,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }
}

/// Mutable state of one run.
struct RunContext<'a> {
    trace_id: String,
    /// The operator's instruction as typed.
    instruction: String,
    /// Index of this run's first message in `conversation`.
    run_start: usize,
    asset_names: Vec<String>,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    conversation: Conversation,
    commands: Vec<CommandRecord>,
    log: InteractionLog,
    rounds: u32,
}

impl RunContext<'_> {
    fn push_assistant(&mut self, content: &str) {
        self.log.turn("assistant", content);
        self.conversation.push(Message::assistant(content));
    }

    fn push_user(&mut self, content: &str) {
        self.log.turn("user", content);
        self.conversation.push(Message::user(content));
    }

    async fn finish(&mut self, status: RunStatus, reply: String, error: Option<String>) -> RunOutcome {
        self.log
            .final_reply(if reply.is_empty() {
                error.as_deref().unwrap_or_default()
            } else {
                &reply
            })
            .await;
        RunOutcome {
            trace_id: self.trace_id.clone(),
            status,
            reply,
            error,
            conversation: std::mem::take(&mut self.conversation),
            commands: std::mem::take(&mut self.commands),
            rounds: self.rounds,
        }
    }
}

/// Drives one model through the action protocol against one executor.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    executor: Arc<dyn AssetExecutor>,
    model: String,
    max_tokens: Option<u32>,
    max_rounds: u32,
    max_nudges: u32,
    parser: ActionParser,
    guard: SafetyGuard,
    codec: ToolResultCodec,
    post_process_tables: bool,
    interaction_log_dir: Option<PathBuf>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn AssetExecutor>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            executor,
            model: model.into(),
            max_tokens: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_nudges: DEFAULT_MAX_NUDGES,
            parser: ActionParser::standard(),
            guard: SafetyGuard::new(),
            codec: ToolResultCodec::default(),
            post_process_tables: true,
            interaction_log_dir: None,
        }
    }

    /// Build from the `[provider]` and `[agent]` config sections.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn AssetExecutor>,
        config: &AppConfig,
    ) -> Self {
        let mut agent = Self::new(provider, executor, config.provider.model.clone())
            .with_max_tokens(config.provider.max_tokens)
            .with_max_rounds(config.agent.max_rounds)
            .with_max_nudges(config.agent.max_nudges)
            .with_tool_result_max_chars(config.agent.tool_result_max_chars)
            .with_post_process_tables(config.agent.post_process_tables);
        if let Some(dir) = config
            .agent
            .interaction_log_dir
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            agent = agent.with_interaction_log_dir(dir);
        }
        agent
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_max_nudges(mut self, max: u32) -> Self {
        self.max_nudges = max;
        self
    }

    pub fn with_tool_result_max_chars(mut self, max: usize) -> Self {
        self.codec = ToolResultCodec::new(max);
        self
    }

    pub fn with_post_process_tables(mut self, enabled: bool) -> Self {
        self.post_process_tables = enabled;
        self
    }

    pub fn with_interaction_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.interaction_log_dir = Some(dir.into());
        self
    }

    pub fn with_parser(mut self, parser: ActionParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one instruction to completion.
    ///
    /// Never fails: transport errors, exhaustion and cancellation all come
    /// back as a [`RunOutcome`]. `command_start`, `command` and
    /// `model_reply` events go to `progress`; the caller owns `start`,
    /// `reply` and `error`.
    pub async fn run(
        &self,
        request: RunRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let RunRequest {
            trace_id,
            instruction,
            asset_names,
            history,
        } = request;

        let mut conversation = Conversation::from_messages(history);
        if conversation.messages.first().map(|m| m.role) != Some(Role::System) {
            conversation
                .messages
                .insert(0, Message::system(prompt::SYSTEM_PROMPT));
        }
        let effective = prompt::effective_instruction(&instruction, &asset_names);
        let run_start = conversation.len();
        conversation.push(Message::user(effective.clone()));

        let log = match &self.interaction_log_dir {
            Some(dir) => {
                InteractionLog::create(dir, &trace_id, &instruction, prompt::SYSTEM_PROMPT, &effective)
            }
            None => InteractionLog::disabled(),
        };

        info!(
            trace_id = %trace_id,
            messages = conversation.len(),
            assets = ?asset_names,
            model = %self.model,
            "Starting agent run"
        );

        let mut ctx = RunContext {
            trace_id,
            instruction,
            run_start,
            asset_names,
            progress,
            cancel,
            conversation,
            commands: Vec::new(),
            log,
            rounds: 0,
        };
        let mut nudges = 0u32;

        for round in 0..self.max_rounds {
            if cancel.is_cancelled() {
                info!(trace_id = %ctx.trace_id, round = round + 1, "Run cancelled");
                return ctx.finish(RunStatus::Cancelled, prompt::CANCELLED.into(), None).await;
            }
            ctx.rounds = round + 1;
            info!(trace_id = %ctx.trace_id, round = round + 1, "Requesting model reply");

            let content = match self.next_reply(&ctx, round).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(trace_id = %ctx.trace_id, round = round + 1, error = %e, "Model call failed");
                    return ctx.finish(RunStatus::Failed, String::new(), Some(format!("模型调用失败：{e}"))).await;
                }
            };
            progress.emit(RunEvent::ModelReply {
                round: round + 1,
                content: content.clone(),
            });

            let Some(action) = self.parser.parse(&content) else {
                let intent = looks_like_intent_without_dispatch(&content);
                if round >= 1 && !intent && looks_like_final_summary(&content) {
                    info!(trace_id = %ctx.trace_id, len = content.chars().count(), "Accepting plain-text summary as final reply");
                    ctx.push_assistant(&content);
                    return ctx.finish(RunStatus::Done, content, None).await;
                }
                if nudges < self.max_nudges {
                    nudges += 1;
                    let nudge = self.nudge_for(&content, &ctx.asset_names);
                    warn!(
                        trace_id = %ctx.trace_id,
                        round = round + 1,
                        nudges,
                        len = content.chars().count(),
                        "No action in model reply, nudging"
                    );
                    ctx.push_assistant(&content);
                    ctx.push_user(&nudge);
                    continue;
                }
                warn!(trace_id = %ctx.trace_id, round = round + 1, "No action in model reply, nudges exhausted");
                if content.is_empty() {
                    return ctx.finish(RunStatus::Done, prompt::NO_VALID_ACTION.into(), None).await;
                }
                ctx.push_assistant(&content);
                return ctx.finish(RunStatus::Done, content, None).await;
            };

            debug!(trace_id = %ctx.trace_id, action = action.kind(), "Decoded action");
            ctx.push_assistant(&content);

            let result = match action {
                Action::Final { message } => {
                    let reply = self.finalize(&mut ctx, &message, &content).await;
                    info!(trace_id = %ctx.trace_id, rounds = ctx.rounds, len = reply.chars().count(), "Run finished");
                    return ctx.finish(RunStatus::Done, reply, None).await;
                }
                Action::ListAssets => {
                    info!(trace_id = %ctx.trace_id, "Listing assets");
                    self.list_assets(&mut ctx).await
                }
                Action::ExecuteCommand { asset, command } => {
                    match self.dispatch_command(&mut ctx, &asset, &command).await {
                        Some(result) => result,
                        None => {
                            info!(trace_id = %ctx.trace_id, "Run cancelled before dispatch");
                            return ctx.finish(RunStatus::Cancelled, prompt::CANCELLED.into(), None).await;
                        }
                    }
                }
                Action::Unrecognized { raw } => {
                    warn!(trace_id = %ctx.trace_id, action = %raw, "Unknown action");
                    self.codec.wrap(&prompt::unknown_action_result(&raw), None)
                }
            };
            ctx.push_user(&result.text);
        }

        warn!(trace_id = %ctx.trace_id, max_rounds = self.max_rounds, "Round budget exhausted");
        ctx.finish(
            RunStatus::Failed,
            prompt::ROUND_BUDGET_EXHAUSTED.into(),
            Some(prompt::ROUND_BUDGET_EXHAUSTED.into()),
        )
        .await
    }

    async fn ask(&self, conversation: &Conversation, temperature: f32) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: conversation.messages.clone(),
            temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.provider.complete(request).await?;
        Ok(response.message.content.trim().to_string())
    }

    /// The round's reply, retrying once on an empty one.
    async fn next_reply(&self, ctx: &RunContext<'_>, round: u32) -> Result<String, ProviderError> {
        let temperature = if round == 0 {
            FIRST_ROUND_TEMPERATURE
        } else {
            LATER_ROUND_TEMPERATURE
        };
        let content = self.ask(&ctx.conversation, temperature).await?;
        if !content.is_empty() {
            return Ok(content);
        }
        let retry = if round == 0 {
            FIRST_ROUND_RETRY_TEMPERATURE
        } else {
            LATER_ROUND_TEMPERATURE
        };
        info!(trace_id = %ctx.trace_id, round = round + 1, temperature = retry, "Empty model reply, retrying once");
        self.ask(&ctx.conversation, retry).await
    }

    /// A re-ask during finalization. Failures read as an empty reply.
    async fn reask(&self, ctx: &mut RunContext<'_>, temperature: f32) -> String {
        match self.ask(&ctx.conversation, temperature).await {
            Ok(content) => {
                ctx.progress.emit(RunEvent::ModelReply {
                    round: ctx.rounds,
                    content: content.clone(),
                });
                content
            }
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, error = %e, "Summary re-ask failed");
                String::new()
            }
        }
    }

    fn nudge_for(&self, content: &str, asset_names: &[String]) -> String {
        if !asset_names.is_empty() && looks_like_asset_reselection(content) {
            prompt::asset_fixed_nudge(asset_names)
        } else if looks_like_intent_without_dispatch(content) {
            prompt::DISPATCH_NUDGE.to_string()
        } else {
            prompt::FORMAT_NUDGE.to_string()
        }
    }

    /// Asset listing, reported like a command with no asset.
    async fn list_assets(&self, ctx: &mut RunContext<'_>) -> ToolResult {
        ctx.progress.emit(RunEvent::CommandStart {
            asset_name: String::new(),
            command: LIST_ASSETS_COMMAND.into(),
            asset_host: String::new(),
        });
        let listing = self.executor.list_assets().await;
        fill_command(&mut ctx.commands, "", LIST_ASSETS_COMMAND, &listing, "");
        ctx.progress.emit(RunEvent::Command {
            asset_name: String::new(),
            command: LIST_ASSETS_COMMAND.into(),
            asset_host: String::new(),
            result: listing.clone(),
        });
        self.codec.wrap(&listing, None)
    }

    /// Guard, resolve and execute one command. `None` when the run was
    /// cancelled before the command started.
    async fn dispatch_command(
        &self,
        ctx: &mut RunContext<'_>,
        asset: &str,
        command: &str,
    ) -> Option<ToolResult> {
        let asset = asset.trim();
        let command = command.trim().replace("\\n", "\n").replace("\\t", "\t");

        let candidate = Action::ExecuteCommand {
            asset: asset.to_string(),
            command: command.clone(),
        };
        if let GuardVerdict::Rejected { reason, message } = self.guard.check(&candidate) {
            warn!(trace_id = %ctx.trace_id, asset, command = %command, reason = ?reason, "Command rejected");
            return Some(self.codec.wrap(&message, None));
        }

        let Some(asset_host) = self.executor.asset_host(asset) else {
            warn!(trace_id = %ctx.trace_id, asset, "Unknown asset");
            let listing = self.executor.list_assets().await;
            return Some(
                self.codec
                    .wrap(&prompt::unknown_asset_result(asset, &listing), None),
            );
        };

        if ctx.cancel.is_cancelled() {
            return None;
        }

        info!(trace_id = %ctx.trace_id, asset, host = %asset_host, command = %command, "Dispatching command");
        ctx.progress.emit(RunEvent::CommandStart {
            asset_name: asset.to_string(),
            command: command.clone(),
            asset_host: asset_host.clone(),
        });
        ctx.commands.push(CommandRecord {
            asset_name: asset.to_string(),
            command: command.clone(),
            result: String::new(),
            asset_host: asset_host.clone(),
        });

        let output = self.executor.execute(asset, &command).await;

        fill_command(&mut ctx.commands, asset, &command, &output, &asset_host);
        ctx.progress.emit(RunEvent::Command {
            asset_name: asset.to_string(),
            command: command.clone(),
            asset_host,
            result: output.clone(),
        });
        Some(self.codec.wrap(&output, Some(asset)))
    }

    /// The reply for a `Final` action: post-processed, then re-asked up to
    /// twice while it is still fluff.
    async fn finalize(&self, ctx: &mut RunContext<'_>, message: &str, raw: &str) -> String {
        let mut reply = if self.post_process_tables {
            report::post_process_final(
                &ctx.instruction,
                &ctx.conversation.messages[ctx.run_start..],
                message,
                raw,
            )
        } else {
            message.trim().to_string()
        };
        if !is_fluff(&reply) {
            return reply;
        }

        info!(trace_id = %ctx.trace_id, "Final message too generic, asking for a summary");
        ctx.push_user(prompt::SUMMARY_NUDGE);
        let mut extra = self.reask(ctx, SUMMARY_TEMPERATURE).await;
        if extra.starts_with("{\"action")
            && extra.chars().count() < TRUNCATED_ACTION_CHARS
            && self.parser.parse(&extra).is_none()
        {
            info!(trace_id = %ctx.trace_id, len = extra.chars().count(), "Summary reply looks truncated, retrying once");
            extra = self.reask(ctx, SUMMARY_TEMPERATURE).await;
        }
        if !extra.is_empty() {
            ctx.push_assistant(&extra);
            if let Some(better) = self.accept_summary(&extra, LONG_TEXT_SUMMARY_CHARS) {
                reply = better;
            }
        }
        if !is_fluff(&reply) {
            return reply;
        }

        info!(trace_id = %ctx.trace_id, "Summary still generic, asking for one line of JSON");
        ctx.push_user(prompt::STRICT_SUMMARY_NUDGE);
        let extra = self.reask(ctx, STRICT_SUMMARY_TEMPERATURE).await;
        if !extra.is_empty() {
            ctx.push_assistant(&extra);
            if let Some(better) = self.accept_summary(&extra, TABLE_TEXT_CHARS) {
                reply = better;
            }
        }
        if is_fluff(&reply) {
            info!(trace_id = %ctx.trace_id, "Falling back to generic completion message");
            return prompt::GENERIC_COMPLETION.to_string();
        }
        reply
    }

    /// A usable final message from a re-ask reply: a non-fluff `final`
    /// action, or free text longer than `min_text_chars` that reads as a
    /// summary or carries a table.
    fn accept_summary(&self, extra: &str, min_text_chars: usize) -> Option<String> {
        if let Some(Action::Final { message }) = self.parser.parse(extra) {
            if !is_fluff(&message) {
                return Some(message.trim().to_string());
            }
        }
        let len = extra.chars().count();
        let table = extra.matches('|').count() >= 3 && len > TABLE_TEXT_CHARS;
        (len > min_text_chars && !extra.starts_with('{') && (looks_like_final_summary(extra) || table))
            .then(|| extra.trim().to_string())
    }
}
