//! Plain-text interaction log, one file per run.
//!
//! Turns are buffered in memory and the file is written once, when the run
//! ends. Best effort: a write failure is logged and the run carries on.

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::warn;

const SYSTEM_PREVIEW_CHARS: usize = 500;

pub struct InteractionLog {
    path: Option<PathBuf>,
    buffer: String,
}

impl InteractionLog {
    /// A log that writes nothing.
    pub fn disabled() -> Self {
        Self {
            path: None,
            buffer: String::new(),
        }
    }

    /// A log bound for `<dir>/<trace_id>_<YYYYmmdd_HHMMSS>.txt`, starting
    /// with the header.
    pub fn create(
        dir: &Path,
        trace_id: &str,
        instruction: &str,
        system_prompt: &str,
        first_user: &str,
    ) -> Self {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let system_head: String = system_prompt.chars().take(SYSTEM_PREVIEW_CHARS).collect();
        let mut log = Self {
            path: Some(dir.join(format!("{trace_id}_{stamp}.txt"))),
            buffer: String::new(),
        };
        log.append(&format!(
            "=== trace_id: {trace_id} ===\n=== 用户指令 ===\n{instruction}\n\n\
             --- system (前 {SYSTEM_PREVIEW_CHARS} 字) ---\n{system_head}\n\n\
             --- user (首条) ---\n{first_user}\n\n"
        ));
        log
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn turn(&mut self, role: &str, body: &str) {
        let body = if role == "assistant" && body.trim().is_empty() {
            "(模型返回为空)"
        } else {
            body
        };
        self.append(&format!("--- {role} ---\n{body}\n\n"));
    }

    /// Append the reply and write the whole log out.
    pub async fn final_reply(&mut self, reply: &str) {
        self.append(&format!("--- final_reply ---\n{reply}\n"));
        self.flush().await;
    }

    fn append(&mut self, text: &str) {
        if self.path.is_some() {
            self.buffer.push_str(text);
        }
    }

    async fn flush(&mut self) {
        let Some(path) = self.path.clone() else { return };
        let text = std::mem::take(&mut self.buffer);
        if let Err(e) = write_file(&path, text).await {
            warn!(path = %path.display(), error = %e, "Interaction log write failed");
            self.path = None;
        }
    }
}

async fn write_file(path: &Path, text: String) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, text).await
}
