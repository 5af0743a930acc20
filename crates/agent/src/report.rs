//! Table post-processing for final replies.
//!
//! Models are unreliable at transcribing long listings: rows get dropped or
//! invented. For the two listings operators ask for most (`getent passwd` and
//! `df -h`), the final message is rebuilt from the actual tool output.

use crate::codec;
use opsclaw_core::{Message, Role};
use opsclaw_security::looks_like_final_summary;

const USER_QUERY_KEYWORDS: &[&str] = &["用户", "权限", "passwd", "getent", "账号", "账户"];
const DISK_QUERY_KEYWORDS: &[&str] = &["df", "磁盘", "空间", "挂载", "容量", "使用率"];

/// Lines of `ip addr` style output that can look like passwd rows.
const NON_USER_PREFIXES: &[&str] = &["link", "inet", "valid", "brd", "scope", "altname", "state ", "group "];

const INSTRUCTION_HEAD_CHARS: usize = 500;
const LONG_REPLY_CHARS: usize = 2000;
const SHORT_MESSAGE_CHARS: usize = 500;
const LONG_REPLY_CAP: usize = 12_000;

pub const USERS_INTRO: &str = "已查询系统中的用户列表，以下是基于 getent passwd 命令输出的汇总：\n\n";
pub const DISK_INTRO: &str = "已按资产汇总磁盘使用情况（基于 df 命令输出）：\n\n";

fn head(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

pub fn is_user_query(instruction: &str) -> bool {
    let head = head(instruction, INSTRUCTION_HEAD_CHARS);
    USER_QUERY_KEYWORDS.iter().any(|k| head.contains(k))
}

pub fn is_disk_query(instruction: &str) -> bool {
    let head = head(instruction, INSTRUCTION_HEAD_CHARS);
    DISK_QUERY_KEYWORDS.iter().any(|k| head.contains(k))
}

struct PasswdRow<'a> {
    username: &'a str,
    uid: &'a str,
    gid: &'a str,
    shell: &'a str,
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn passwd_row(line: &str) -> Option<PasswdRow<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('<') {
        return None;
    }
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 7 {
        return None;
    }
    let (username, uid, gid, shell) = (parts[0].trim(), parts[2].trim(), parts[3].trim(), parts[6].trim());
    if username.is_empty() || !is_number(uid) || !is_number(gid) {
        return None;
    }
    let lower = username.to_lowercase();
    if NON_USER_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return None;
    }
    if !shell.contains('/') || username.contains(' ') {
        return None;
    }
    Some(PasswdRow {
        username,
        uid,
        gid,
        shell,
    })
}

/// Markdown table of the users in a `getent passwd` result, or `None` when
/// fewer than two strictly valid rows are present.
pub fn users_table(tool_result: &str) -> Option<String> {
    if tool_result.contains("link/ether")
        || tool_result.contains("scope global")
        || (tool_result.contains("inet ") && tool_result.contains("mtu"))
    {
        return None;
    }
    let rows: Vec<PasswdRow<'_>> = tool_result.lines().filter_map(passwd_row).collect();
    if rows.len() < 2 {
        return None;
    }
    let mut lines = vec![
        "| 用户名 | UID | GID | Shell |".to_string(),
        "|--------|-----|-----|-------|".to_string(),
    ];
    lines.extend(
        rows.iter()
            .map(|r| format!("| {} | {} | {} | {} |", r.username, r.uid, r.gid, r.shell)),
    );
    Some(lines.join("\n"))
}

/// `(size, used, avail, use%, mount)` from one `df -h` device line.
fn df_row(line: &str) -> Option<[&str; 5]> {
    let line = line.trim();
    if !line.starts_with("/dev") || !line.contains('%') {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let n = parts.len();
    if n < 5 {
        return None;
    }
    let row = [parts[n - 5], parts[n - 4], parts[n - 3], parts[n - 2], parts[n - 1]];
    row[3].contains('%').then_some(row)
}

fn tool_results(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages
        .iter()
        .filter(|m| m.role == Role::User && m.content.contains("<tool_result"))
}

/// Per-asset disk table from asset-tagged `df` results in `messages`.
/// One row per result block (its first device line); `None` under two rows.
pub fn disk_table(messages: &[Message]) -> Option<String> {
    let mut rows: Vec<(String, [String; 5])> = Vec::new();
    for message in tool_results(messages) {
        for block in codec::decode(&message.content) {
            let Some(asset) = block.asset.as_deref().map(str::trim) else {
                continue;
            };
            let body = &block.body;
            if !body.to_lowercase().contains("df")
                && !body.contains("Filesystem")
                && !body.contains("文件系统")
            {
                continue;
            }
            if let Some(row) = body.lines().find_map(df_row) {
                rows.push((asset.to_string(), row.map(str::to_string)));
            }
        }
    }
    if rows.len() < 2 {
        return None;
    }
    let mut lines = vec![
        "| 资产 | 总空间 | 已用 | 可用 | 使用率 | 挂载点 |".to_string(),
        "|------|--------|------|------|--------|--------|".to_string(),
    ];
    lines.extend(
        rows.iter()
            .map(|(asset, [size, used, avail, pct, mount])| {
                format!("| {asset} | {size} | {used} | {avail} | {pct} | {mount} |")
            }),
    );
    Some(lines.join("\n"))
}

/// Rewrite a final message from tool output where possible.
///
/// `instruction` is the operator's text as typed, before any asset prefix.
/// `run_messages` holds only the messages appended by the current run, so a
/// listing from an earlier turn of the session is never replayed.
///
/// `raw_reply` is the assistant text the final action was parsed from. When
/// it is a long, table-bearing summary but the parsed message is short, the
/// raw text wins.
pub fn post_process_final(
    instruction: &str,
    run_messages: &[Message],
    message: &str,
    raw_reply: &str,
) -> String {
    let mut final_message = message.trim().to_string();

    if is_user_query(instruction) {
        let latest = tool_results(run_messages).last();
        if let Some(table) = latest.and_then(|m| users_table(&m.content)) {
            tracing::info!(len = table.chars().count(), "Rebuilt final reply from getent passwd output");
            final_message = format!("{USERS_INTRO}{table}");
        }
    } else if is_disk_query(instruction) {
        if let Some(table) = disk_table(run_messages) {
            tracing::info!(len = table.chars().count(), "Rebuilt final reply from df output");
            final_message = format!("{DISK_INTRO}{table}");
        }
    }

    let raw_len = raw_reply.chars().count();
    if raw_len > LONG_REPLY_CHARS
        && raw_reply.matches('|').count() >= 3
        && (raw_reply.contains("用户") || raw_reply.contains("UID") || looks_like_final_summary(raw_reply))
        && final_message.chars().count() < SHORT_MESSAGE_CHARS
    {
        final_message = head(raw_reply.trim(), LONG_REPLY_CAP);
        if raw_len > LONG_REPLY_CAP {
            final_message.push_str("\n\n(以上为摘要，内容已截断。)");
        }
        tracing::info!(len = final_message.chars().count(), "Using long raw reply as final message");
    }

    final_message
}
