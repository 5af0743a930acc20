//! Scripted fakes for driving the agent loop without a model or a network.
//!
//! Compiled for this crate's tests and, behind the `testing` feature, for
//! downstream test suites.

use async_trait::async_trait;
use opsclaw_core::error::ProviderError;
use opsclaw_core::message::Message;
use opsclaw_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use opsclaw_core::{AssetExecutor, CancellationToken};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A provider that returns queued replies in order.
///
/// Every request is recorded. When the queue runs dry the fallback reply is
/// used if one was set, otherwise the call fails with `InvalidResponse`.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same text.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new()).with_fallback(reply)
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Queue a transport failure after the replies queued so far.
    pub fn then_error(self, error: ProviderError) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error));
        }
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Temperatures of every request, in order.
    pub fn temperatures(&self) -> Vec<f32> {
        self.requests().iter().map(|r| r.temperature).collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let text = match next {
            Some(reply) => reply?,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))?,
        };
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

/// An executor over named fake assets that records every call.
pub struct RecordingExecutor {
    assets: Vec<(String, String)>,
    outputs: HashMap<(String, String), String>,
    default_output: String,
    delay: Option<Duration>,
    cancel_on_execute: Option<CancellationToken>,
    calls: Mutex<Vec<(String, String)>>,
    list_calls: Mutex<usize>,
}

impl RecordingExecutor {
    /// `assets` are `(name, "user@host:port")` pairs.
    pub fn new<I, N, H>(assets: I) -> Self
    where
        I: IntoIterator<Item = (N, H)>,
        N: Into<String>,
        H: Into<String>,
    {
        Self {
            assets: assets
                .into_iter()
                .map(|(n, h)| (n.into(), h.into()))
                .collect(),
            outputs: HashMap::new(),
            default_output: "ok".into(),
            delay: None,
            cancel_on_execute: None,
            calls: Mutex::new(Vec::new()),
            list_calls: Mutex::new(0),
        }
    }

    /// Canned output for one `(asset, command)` pair.
    pub fn with_output(
        mut self,
        asset: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.outputs
            .insert((asset.into(), command.into()), output.into());
        self
    }

    pub fn with_default_output(mut self, output: impl Into<String>) -> Self {
        self.default_output = output.into();
        self
    }

    /// Sleep this long inside every `execute`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` while a command is executing, as a stop request would.
    pub fn cancel_on_execute(mut self, token: CancellationToken) -> Self {
        self.cancel_on_execute = Some(token);
        self
    }

    /// `(asset, command)` of every `execute`, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.lock().map(|c| *c).unwrap_or_default()
    }
}

#[async_trait]
impl AssetExecutor for RecordingExecutor {
    async fn list_assets(&self) -> String {
        if let Ok(mut n) = self.list_calls.lock() {
            *n += 1;
        }
        self.assets
            .iter()
            .map(|(name, host)| format!("- {name}: {host}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn execute(&self, asset: &str, command: &str) -> String {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((asset.to_string(), command.to_string()));
        }
        if let Some(token) = &self.cancel_on_execute {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outputs
            .get(&(asset.to_string(), command.to_string()))
            .cloned()
            .unwrap_or_else(|| self.default_output.clone())
    }

    fn asset_host(&self, asset: &str) -> Option<String> {
        self.assets
            .iter()
            .find(|(name, _)| name == asset)
            .map(|(_, host)| host.clone())
    }
}
