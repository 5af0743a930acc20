//! SSH executor: run one command on one asset via the system `ssh` client.
//!
//! Key auth goes straight through `ssh -i`. Password auth wraps the call in
//! `sshpass -e` with the password in `SSHPASS`, keeping it out of the process
//! list. Every failure is folded into the returned text.

use async_trait::async_trait;
use opsclaw_config::{AssetConfig, SshConfig};
use opsclaw_core::AssetExecutor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PACKAGE_MANAGER_MARKERS: &[&str] = &["apt-get", "apt ", "apt-", "dnf ", "yum ", "zypper "];

/// Timeout for one command: package-manager invocations get the longer budget.
pub fn command_timeout(command: &str, settings: &SshConfig) -> Duration {
    let lower = command.trim().to_lowercase();
    let secs = if PACKAGE_MANAGER_MARKERS.iter().any(|m| lower.contains(m)) {
        settings
            .package_manager_timeout_secs
            .max(settings.command_timeout_secs)
    } else {
        settings.command_timeout_secs
    };
    Duration::from_secs(secs.max(1))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|_| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Executes commands on configured assets over SSH.
pub struct SshExecutor {
    assets: Vec<AssetConfig>,
    settings: SshConfig,
    ssh_program: String,
    sshpass_program: String,
}

impl SshExecutor {
    pub fn new(assets: Vec<AssetConfig>, settings: SshConfig) -> Self {
        Self {
            assets,
            settings,
            ssh_program: "ssh".into(),
            sshpass_program: "sshpass".into(),
        }
    }

    /// Replace the `ssh` binary (used by tests and unusual installs).
    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// Replace the `sshpass` binary.
    pub fn with_sshpass_program(mut self, program: impl Into<String>) -> Self {
        self.sshpass_program = program.into();
        self
    }

    fn find(&self, name: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// The text the model sees for `list_assets`.
    pub fn display(&self) -> String {
        if self.assets.is_empty() {
            return "当前没有配置任何 Linux 资产，请在配置文件的 assets 中添加。".into();
        }
        self.assets
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.address()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A usable key file, if one is configured and exists.
    fn key_path(asset: &AssetConfig) -> Option<PathBuf> {
        asset
            .private_key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
            .filter(|p| p.exists())
    }

    /// `ssh` argument list, without the program itself.
    fn ssh_args(&self, asset: &AssetConfig, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
            "-p".to_string(),
            asset.port.to_string(),
        ];
        if let Some(key) = Self::key_path(asset) {
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", asset.username, asset.host));
        args.push(command.to_string());
        args
    }

    fn uses_sshpass(asset: &AssetConfig) -> bool {
        asset.password.as_deref().is_some_and(|p| !p.is_empty()) && Self::key_path(asset).is_none()
    }

    async fn run(&self, asset: &AssetConfig, command: &str) -> String {
        let timeout = command_timeout(command, &self.settings);
        let sshpass = Self::uses_sshpass(asset);

        let mut cmd = if sshpass {
            let mut c = Command::new(&self.sshpass_program);
            c.arg("-e").arg(&self.ssh_program);
            c.env("SSHPASS", asset.password.as_deref().unwrap_or_default());
            c
        } else {
            Command::new(&self.ssh_program)
        };
        cmd.args(self.ssh_args(asset, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(asset = %asset.name, host = %asset.host, timeout_secs = timeout.as_secs(), sshpass, "Spawning ssh");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                warn!(asset = %asset.name, command, "Command timed out");
                return format!("执行超时（{} 秒）。", timeout.as_secs());
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return if sshpass {
                    "错误：未找到 sshpass。密码认证需要安装 sshpass（如 sudo apt install sshpass），或改用 private_key_path。".into()
                } else {
                    "错误：未找到 ssh 命令。请安装 OpenSSH 客户端。".into()
                };
            }
            Ok(Err(e)) => return format!("执行失败: {e}"),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let mut text = stdout;
        if !stderr.is_empty() {
            text.push_str("\n[stderr]\n");
            text.push_str(&stderr);
        }
        if !output.status.success() && text.trim().is_empty() {
            let code = output.status.code().unwrap_or(-1);
            text = format!("[exit code {code}]");
        }
        text
    }
}

#[async_trait]
impl AssetExecutor for SshExecutor {
    async fn list_assets(&self) -> String {
        self.display()
    }

    async fn execute(&self, asset: &str, command: &str) -> String {
        let Some(target) = self.find(asset) else {
            return format!("未找到资产 '{asset}'。可用资产：\n{}", self.display());
        };
        info!(asset, host = %target.host, command, "Executing on asset");
        let result = self.run(target, command).await;
        info!(asset, result_len = result.chars().count(), "Execution finished");
        result
    }

    fn asset_host(&self, asset: &str) -> Option<String> {
        self.find(asset).map(|a| a.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> AssetConfig {
        AssetConfig {
            name: name.into(),
            host: "10.0.0.1".into(),
            port: 2222,
            username: "ops".into(),
            password: None,
            private_key_path: None,
        }
    }

    fn executor() -> SshExecutor {
        SshExecutor::new(vec![asset("web-01"), asset("db-01")], SshConfig::default())
    }

    #[test]
    fn package_managers_get_longer_timeout() {
        let s = SshConfig::default();
        assert_eq!(command_timeout("uptime", &s), Duration::from_secs(s.command_timeout_secs));
        assert_eq!(
            command_timeout("sudo apt-get install -y nginx", &s),
            Duration::from_secs(s.package_manager_timeout_secs)
        );
        assert_eq!(
            command_timeout("YUM update", &s),
            Duration::from_secs(s.package_manager_timeout_secs)
        );
    }

    #[test]
    fn display_lists_assets() {
        let e = executor();
        assert_eq!(e.display(), "- web-01: ops@10.0.0.1:2222\n- db-01: ops@10.0.0.1:2222");
        let empty = SshExecutor::new(vec![], SshConfig::default());
        assert!(empty.display().contains("没有配置任何 Linux 资产"));
    }

    #[test]
    fn args_without_key() {
        let e = executor();
        let args = e.ssh_args(&asset("web-01"), "df -h");
        assert_eq!(
            args,
            vec![
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "2222",
                "ops@10.0.0.1",
                "df -h"
            ]
        );
    }

    #[test]
    fn missing_key_file_is_ignored() {
        let mut a = asset("web-01");
        a.private_key_path = Some("/definitely/not/here".into());
        a.password = Some("secret".into());
        assert!(!executor().ssh_args(&a, "ls").contains(&"-i".to_string()));
        assert!(SshExecutor::uses_sshpass(&a));
    }

    #[test]
    fn existing_key_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();
        let mut a = asset("web-01");
        a.private_key_path = Some(key.display().to_string());
        a.password = Some("secret".into());

        let args = executor().ssh_args(&a, "ls");
        let i = args.iter().position(|x| x == "-i").unwrap();
        assert_eq!(args[i + 1], key.display().to_string());
        assert!(!SshExecutor::uses_sshpass(&a));
    }

    #[test]
    fn asset_host_lookup() {
        let e = executor();
        assert_eq!(e.asset_host("web-01").as_deref(), Some("ops@10.0.0.1:2222"));
        assert!(e.asset_host("nope").is_none());
    }

    #[tokio::test]
    async fn unknown_asset_lists_available() {
        let out = executor().execute("nope", "ls").await;
        assert!(out.starts_with("未找到资产 'nope'。可用资产：\n"));
        assert!(out.contains("- web-01"));
    }

    #[tokio::test]
    async fn missing_ssh_binary_is_reported() {
        let e = executor().with_ssh_program("/nonexistent/opsclaw-ssh");
        let out = e.execute("web-01", "uptime").await;
        assert_eq!(out, "错误：未找到 ssh 命令。请安装 OpenSSH 客户端。");
    }

    #[tokio::test]
    async fn missing_sshpass_is_reported() {
        let mut a = asset("web-01");
        a.password = Some("secret".into());
        let e = SshExecutor::new(vec![a], SshConfig::default())
            .with_sshpass_program("/nonexistent/opsclaw-sshpass");
        let out = e.execute("web-01", "uptime").await;
        assert!(out.contains("未找到 sshpass"));
    }

    #[cfg(unix)]
    fn fake_ssh(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_and_stderr_are_combined() {
        let dir = tempfile::tempdir().unwrap();
        let e = executor().with_ssh_program(fake_ssh(dir.path(), "echo out; echo err >&2"));
        let out = e.execute("web-01", "anything").await;
        assert_eq!(out, "out\n\n[stderr]\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let e = executor().with_ssh_program(fake_ssh(dir.path(), "exit 3"));
        assert_eq!(e.execute("web-01", "false").await, "[exit code 3]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn last_argument_is_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let e = executor().with_ssh_program(fake_ssh(dir.path(), "for a; do last=\"$a\"; done; echo \"$last\""));
        assert_eq!(e.execute("web-01", "df -h /").await, "df -h /\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SshConfig {
            command_timeout_secs: 1,
            ..SshConfig::default()
        };
        let e = SshExecutor::new(vec![asset("web-01")], settings)
            .with_ssh_program(fake_ssh(dir.path(), "sleep 5"));
        assert_eq!(e.execute("web-01", "uptime").await, "执行超时（1 秒）。");
    }
}
