//! Command-level checks applied to `ExecuteCommand` actions.
//!
//! Every check is a pure function of the action. A rejection carries the
//! corrective text the loop feeds back to the model instead of dispatching.

use opsclaw_core::Action;
use regex_lite::Regex;
use std::sync::LazyLock;

/// Destructive command patterns, matched against the lowercased command.
const DANGEROUS_PATTERNS: &[&str] = &[
    // recursive force delete: bundled short flags in any order (-rf, -rfv, -fr)
    r"\brm\b.*\s-[a-z]*(?:r[a-z]*f|f[a-z]*r)",
    // separate recursive and force flags, long or short, either order
    r"\brm\b.*\s(?:-[a-z]*r[a-z]*|--recursive)\b.*\s(?:-[a-z]*f[a-z]*|--force)\b",
    r"\brm\b.*\s(?:-[a-z]*f[a-z]*|--force)\b.*\s(?:-[a-z]*r[a-z]*|--recursive)\b",
    // filesystem format utilities (mkfs, mkfs.ext4, ...)
    r"\bmkfs\.?\b",
    // raw disk copy
    r"\bdd\b",
    // fork bomb
    r":\s*\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    // power state changes, only where the word is the command itself
    r"(?:^|[;&|(`\n]\s*|\bsudo\s+(?:-\S+\s+)*)(?:\S*/)?(?:shutdown|reboot|halt|poweroff|(?:tel)?init\s+0)\b",
    r"\bsystemctl\s+(?:-\S+\s+)*(?:reboot|poweroff|halt)\b",
    // direct writes to block devices
    r">\s*/dev/(sd[a-z]|nvme\d|vd[a-z]|hd[a-z])",
    // truncating the root filesystem
    r"\b:\s*>\s*/\b",
];

static DANGEROUS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Literal template values the model sometimes copies out of its instructions.
const ASSET_PLACEHOLDERS: &[&str] = &["资产名称", "资产名", "实际资产名", "asset_name", "<asset>"];
const COMMAND_PLACEHOLDERS: &[&str] = &["shell 命令", "具体命令", "实际命令", "<command>"];

/// True when the command matches a destructive pattern. An empty command
/// counts as dangerous.
pub fn is_dangerous_command(command: &str) -> bool {
    let normalized = command.trim().to_lowercase();
    if normalized.is_empty() {
        return true;
    }
    DANGEROUS.iter().any(|re| re.is_match(&normalized))
}

/// True when either field is a template stand-in rather than a real value.
pub fn is_placeholder(asset: &str, command: &str) -> bool {
    let asset = asset.trim();
    let command = command.trim();
    ASSET_PLACEHOLDERS.contains(&asset) || COMMAND_PLACEHOLDERS.contains(&command)
}

/// Why an action was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// `asset` or `command` was empty.
    MissingField,
    /// A template placeholder was used as a value.
    Placeholder,
    /// The command matched the destructive blocklist.
    DangerousCommand,
}

/// Outcome of checking one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allowed,
    Rejected {
        reason: Rejection,
        /// Corrective text for the model
        message: String,
    },
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Applies the command checks to a decoded action.
///
/// Only `ExecuteCommand` can be rejected; every other action passes.
#[derive(Debug, Clone, Default)]
pub struct SafetyGuard;

impl SafetyGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, action: &Action) -> GuardVerdict {
        let Action::ExecuteCommand { asset, command } = action else {
            return GuardVerdict::Allowed;
        };

        if asset.trim().is_empty() || command.trim().is_empty() {
            return GuardVerdict::Rejected {
                reason: Rejection::MissingField,
                message: "action execute_command 缺少 asset 或 command。".into(),
            };
        }

        if is_placeholder(asset, command) {
            return GuardVerdict::Rejected {
                reason: Rejection::Placeholder,
                message: "请使用用户已选定的资产名称（如 web-01）和具体命令（如 getent passwd），\
                          不要使用占位符「资产名称」「shell 命令」。"
                    .into(),
            };
        }

        if is_dangerous_command(command) {
            tracing::warn!(asset = %asset, command = %command, "Refusing dangerous command");
            return GuardVerdict::Rejected {
                reason: Rejection::DangerousCommand,
                message: format!(
                    "为保证安全，已拒绝执行疑似危险命令：{command}\n\
                     该命令未被执行。请改用只读或非破坏性的命令继续，或输出 final 说明无法执行的原因。"
                ),
            };
        }

        GuardVerdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(asset: &str, command: &str) -> Action {
        Action::ExecuteCommand {
            asset: asset.into(),
            command: command.into(),
        }
    }

    #[test]
    fn all_patterns_compile() {
        assert_eq!(DANGEROUS.len(), DANGEROUS_PATTERNS.len());
    }

    #[test]
    fn destructive_commands_detected() {
        for cmd in [
            "rm -rf /",
            "sudo rm -rf /var/lib/mysql",
            "rm -fr /tmp/x",
            "RM -RF /",
            "mkfs.ext4 /dev/sda1",
            "mkfs -t xfs /dev/sdb",
            "dd if=/dev/zero of=/dev/sda",
            ":(){ :|:& };:",
            "shutdown -h now",
            "reboot",
            "init 0",
            "rm -rfv /",
            "rm -r -f /",
            "rm -f -r /srv/data",
            "rm --force --recursive /",
            "rm --recursive --force /",
            "rm -R -f /var",
            "sudo reboot",
            "sudo -n shutdown -r now",
            "uptime && reboot",
            "sync; /sbin/poweroff",
            "systemctl reboot",
            "echo x > /dev/sda",
            "cat img > /dev/nvme0n1",
            "",
            "   ",
        ] {
            assert!(is_dangerous_command(cmd), "expected dangerous: {cmd:?}");
        }
    }

    #[test]
    fn ordinary_read_commands_allowed() {
        for cmd in [
            "df -h",
            "systemctl status nginx",
            "free -m",
            "ps aux --sort=-%mem | head",
            "journalctl -u docker --since today",
            "getent passwd",
            "git add .",
            "ls -la /dev/sda1",
            "cat /etc/os-release",
            "last reboot",
            "last -x shutdown | head",
            "grep -i halt /var/log/syslog",
            "rm -f /tmp/app.log",
            "rm -r /tmp/empty",
        ] {
            assert!(!is_dangerous_command(cmd), "expected safe: {cmd:?}");
        }
    }

    #[test]
    fn placeholders_detected() {
        assert!(is_placeholder("资产名称", "df -h"));
        assert!(is_placeholder("web-01", "shell 命令"));
        assert!(is_placeholder(" 资产名称 ", "uptime"));
        assert!(!is_placeholder("web-01", "df -h"));
    }

    #[test]
    fn guard_rejects_dangerous() {
        let verdict = SafetyGuard::new().check(&exec("web-01", "rm -rf /"));
        match verdict {
            GuardVerdict::Rejected { reason, message } => {
                assert_eq!(reason, Rejection::DangerousCommand);
                assert!(message.contains("rm -rf /"));
            }
            GuardVerdict::Allowed => panic!("rm -rf / must be rejected"),
        }
    }

    #[test]
    fn guard_checks_missing_before_placeholder() {
        let verdict = SafetyGuard::new().check(&exec("", "shell 命令"));
        assert!(matches!(
            verdict,
            GuardVerdict::Rejected { reason: Rejection::MissingField, .. }
        ));
        let verdict = SafetyGuard::new().check(&exec("资产名称", "rm -rf /"));
        assert!(matches!(
            verdict,
            GuardVerdict::Rejected { reason: Rejection::Placeholder, .. }
        ));
    }

    #[test]
    fn non_command_actions_pass() {
        let guard = SafetyGuard::new();
        assert!(guard.check(&Action::ListAssets).is_allowed());
        assert!(guard.check(&Action::Final { message: String::new() }).is_allowed());
        assert!(guard.check(&exec("web-01", "uptime")).is_allowed());
    }
}
