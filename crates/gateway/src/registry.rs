//! Run Registry: live `RunState` snapshots and cancellation tokens, keyed
//! by trace id.
//!
//! One `std::sync::Mutex` guards the whole map. It is only held for short,
//! non-async sections.

use opsclaw_agent::{ProgressSink, RunEvent};
use opsclaw_core::{CancellationToken, RegistryError, RunState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

struct Entry {
    state: RunState,
    /// Released on finish; a stop after that is an unknown run.
    cancel: Option<CancellationToken>,
    finished_at: Option<Instant>,
    acknowledged_at: Option<Instant>,
}

impl Entry {
    fn mark_finished(&mut self) {
        self.finished_at.get_or_insert_with(Instant::now);
    }

    /// Start of the TTL clock: the acknowledgement, or the finish when no
    /// observer ever acknowledged (a client that disconnected mid-stream).
    fn expiry_base(&self) -> Option<Instant> {
        self.acknowledged_at.or(self.finished_at)
    }
}

pub struct RunRegistry {
    runs: Mutex<HashMap<String, Entry>>,
    finished_ttl: Duration,
}

impl RunRegistry {
    /// `finished_ttl`: how long a finished run stays pollable, counted from
    /// its acknowledgement or, lacking one, from its finish.
    pub fn new(finished_ttl: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            finished_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a run and hand back its cancellation token.
    pub fn register(
        &self,
        trace_id: &str,
        session_id: &str,
        instruction: &str,
        asset_names: Vec<String>,
    ) -> CancellationToken {
        self.sweep();
        let token = CancellationToken::new();
        self.lock().insert(
            trace_id.to_string(),
            Entry {
                state: RunState::new(trace_id, session_id, instruction, asset_names),
                cancel: Some(token.clone()),
                finished_at: None,
                acknowledged_at: None,
            },
        );
        info!(trace_id, session_id, "Run registered");
        token
    }

    /// Mirror one progress event into the run's snapshot.
    pub fn record(&self, trace_id: &str, event: &RunEvent) {
        let mut runs = self.lock();
        let Some(entry) = runs.get_mut(trace_id) else {
            return;
        };
        if event.is_terminal() {
            entry.mark_finished();
        }
        let state = &mut entry.state;
        match event {
            RunEvent::CommandStart {
                asset_name,
                command,
                asset_host,
            } => state.command_started(asset_name, command, asset_host),
            RunEvent::Command {
                asset_name,
                command,
                asset_host,
                result,
            } => state.command_finished(asset_name, command, result, asset_host),
            RunEvent::ModelReply { round, content } => state.model_replied(*round, content),
            RunEvent::Reply { reply } => state.finish(Some(reply), None),
            RunEvent::Error { detail } => state.finish(None, Some(detail)),
            RunEvent::Start { .. } => {}
        }
    }

    /// Mark the run finished and release its cancellation token.
    pub fn finish(&self, trace_id: &str, reply: Option<&str>, error: Option<&str>) {
        if let Some(entry) = self.lock().get_mut(trace_id) {
            entry.state.finish(reply, error);
            entry.cancel = None;
            entry.mark_finished();
        }
    }

    /// The observer has delivered the terminal event; start the TTL clock.
    pub fn acknowledge(&self, trace_id: &str) {
        if let Some(entry) = self.lock().get_mut(trace_id) {
            entry.acknowledged_at = Some(Instant::now());
            debug!(trace_id, "Run acknowledged");
        }
    }

    /// Drop finished runs whose TTL has run out. Returns how many.
    pub fn sweep(&self) -> usize {
        let ttl = self.finished_ttl;
        let mut runs = self.lock();
        let before = runs.len();
        runs.retain(|_, e| {
            e.state.running || e.expiry_base().is_none_or(|at| at.elapsed() < ttl)
        });
        let removed = before - runs.len();
        if removed > 0 {
            debug!(removed, "Swept finished runs");
        }
        removed
    }

    pub fn remove(&self, trace_id: &str) -> bool {
        self.lock().remove(trace_id).is_some()
    }

    /// Request cancellation. Takes effect at the run's next round boundary.
    pub fn stop(&self, trace_id: &str) -> Result<(), RegistryError> {
        let runs = self.lock();
        let token = runs
            .get(trace_id)
            .and_then(|e| e.cancel.as_ref())
            .ok_or_else(|| RegistryError::UnknownRun(trace_id.to_string()))?;
        token.cancel();
        info!(trace_id, "Stop requested");
        Ok(())
    }

    /// A copy of the run's current snapshot.
    pub fn status(&self, trace_id: &str) -> Result<RunState, RegistryError> {
        self.lock()
            .get(trace_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| RegistryError::UnknownRun(trace_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Progress sink for one registered run: mirrors into the registry, then
/// forwards to the stream when there is one.
pub struct RegistrySink {
    registry: Arc<RunRegistry>,
    trace_id: String,
    events: Option<UnboundedSender<RunEvent>>,
}

impl RegistrySink {
    pub fn new(
        registry: Arc<RunRegistry>,
        trace_id: impl Into<String>,
        events: Option<UnboundedSender<RunEvent>>,
    ) -> Self {
        Self {
            registry,
            trace_id: trace_id.into(),
            events,
        }
    }
}

impl ProgressSink for RegistrySink {
    fn emit(&self, event: RunEvent) {
        debug!(trace_id = %self.trace_id, event = event.event_type(), "Run event");
        self.registry.record(&self.trace_id, &event);
        if let Some(tx) = &self.events {
            tx.emit(event);
        }
    }
}
