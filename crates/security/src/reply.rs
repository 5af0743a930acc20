//! Heuristics over free-form model text.
//!
//! These are keyword predicates tuned on real model output, not a grammar.
//! Each is pure and cheap; the agent loop decides what to do with the answer.

/// Generic compliance phrases that carry no result.
const FLUFF_PHRASES: &[&str] = &[
    "根据用户指示",
    "仅输出三种",
    "严格遵守",
    "以符合规则",
    "符合规则",
    "指定格式",
    "都将严格遵守",
    "任务已完成",
    "已执行。",
    "已执行完毕",
];

/// Words that make even a short message a real finding.
const SUBSTANCE_KEYWORDS: &[&str] = &[
    "巡检", "结果", "正常", "异常", "状态", "运行", "建议", "docker", "服务", "容器", "用户", "权限",
];

const SHORT_MESSAGE_CHARS: usize = 25;

fn has_markdown_table(s: &str) -> bool {
    s.contains('|')
        && (s.contains('\n') || s.contains("---") || s.matches('|').count() >= 3)
        && s.chars().count() > 30
}

/// True when a final message is too generic to show the operator.
///
/// A Markdown table always passes, however short the surrounding text.
pub fn is_fluff(message: &str) -> bool {
    let s = message.trim();
    if s.is_empty() {
        return true;
    }
    if has_markdown_table(s) {
        return false;
    }
    if FLUFF_PHRASES.iter().any(|p| s.contains(p)) {
        return true;
    }
    s.chars().count() < SHORT_MESSAGE_CHARS && !SUBSTANCE_KEYWORDS.iter().any(|k| s.contains(k))
}

/// True when unparsable text still reads like a finished natural-language
/// summary worth returning as the reply.
pub fn looks_like_final_summary(text: &str) -> bool {
    let c = text.trim();
    let len = c.chars().count();
    if !(50..=8000).contains(&len) {
        return false;
    }
    let head: String = c.chars().take(100).collect();
    if c.starts_with('{') || c.starts_with("<tool_call") || head.contains("\"action\"") {
        return false;
    }
    if ["我将", "我会执行", "请指定", "请告知", "? ", "？"]
        .iter()
        .any(|p| c.contains(p))
    {
        return false;
    }
    let lower = c.to_lowercase();
    if c.contains("Summarize") || lower.contains("summary") || c.contains("总结") {
        return true;
    }
    let about_service = ["Docker", "docker", "服务", "容器"].iter().any(|k| c.contains(k));
    let has_state = ["running", "active", "Up", "状态", "运行"].iter().any(|k| c.contains(k));
    if about_service && has_state {
        return true;
    }
    lower.contains("command")
        && (lower.contains("result") || lower.contains("output") || c.contains("执行"))
}

/// True when the model announced a command (or only recommended one)
/// without emitting an action.
pub fn looks_like_intent_without_dispatch(text: &str) -> bool {
    let c = text.trim();
    if c.is_empty() {
        return false;
    }
    const INTENT: &[&str] = &[
        "我将",
        "我们将",
        "请执行",
        "我会执行",
        "接下来执行",
        "将执行",
        "让我执行",
        "执行的下一步命令",
        "下一步，我们将",
        "接下来",
        "I will run",
        "I'll run",
        "Let me run",
        "please execute",
        "Please execute",
    ];
    let mentions_work = ["执行", "命令", "检查", "run", "execute", "command"]
        .iter()
        .any(|k| c.contains(k));
    if INTENT.iter().any(|p| c.contains(p)) && mentions_work {
        return true;
    }
    if c.contains("请回复") && c.contains("tool_result") {
        return true;
    }
    if c.contains("Recommended") && c.contains('`') {
        return true;
    }
    if (c.contains("Check ") || c.contains("check ")) && c.contains(" with `") {
        return true;
    }
    if c.contains("Use `") || c.contains(" use `") || (c.contains("Consider ") && c.contains('`')) {
        return true;
    }
    if c.contains("建议") && (c.contains("执行") || c.contains("命令") || c.contains('`')) {
        return true;
    }
    if ["错误更正", "违规操作", "未严格遵守"].iter().any(|p| c.contains(p))
        && (c.contains("execute_command") || c.contains("工具"))
    {
        return true;
    }
    ["正确处理流程应是", "请直接告知具体目标", "请告知具体目标"]
        .iter()
        .any(|p| c.contains(p))
}

/// True when the model asks the operator to pick the target asset again.
pub fn looks_like_asset_reselection(text: &str) -> bool {
    const PHRASES: &[&str] = &[
        "指定操作资产",
        "指定操作对象",
        "请指定要操作的资产",
        "请先指定资产",
        "没有任何指定",
        "无法继续执行操作",
        "please specify the asset",
        "which asset",
    ];
    let c = text.trim();
    !c.is_empty() && PHRASES.iter().any(|p| c.contains(p))
}
