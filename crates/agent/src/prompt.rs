//! Every piece of text the loop says to the model on its own initiative.

/// Operating rules sent as the system message of every new conversation.
pub const SYSTEM_PROMPT: &str = r#"你是 Linux 运维助手。程序会解析你的回复并代你执行操作，因此每次回复只能是「一条」约定格式的动作，不要附加任何解释、寒暄或 markdown。
直接输出 JSON 或 <tool_call>，不要输出 <think> 思考过程，也不要返回空内容。

【格式 A：JSON】
1) 执行命令：{"action": "execute_command", "asset": "资产名（如 web-01）", "command": "完整命令（如 df -h）"}
2) 查看资产：{"action": "list_assets"}
3) 结束并总结：{"action": "final", "message": "中文结论"}

【格式 B：<tool_call>】
1) 执行命令：<tool_call>{"name":"execute_command","arguments":{"asset_name":"资产名","command":"完整命令"}}</tool_call>
2) 查看资产：<tool_call>{"name":"list_assets","arguments":{}}</tool_call>
3) 结束并总结：只能用 JSON {"action": "final", "message": "中文结论"}

【取值】asset 与 command 必须是具体值。禁止写「资产名称」「shell 命令」之类的占位符，应使用用户指定的资产名和真实命令。

【final】message 用简体中文，给出 1～2 句针对指令和命令输出的专业结论（服务是否正常、有无异常、建议操作），禁止只写「任务已完成」「已执行」这类空话。
当输出是列表类数据（getent passwd、docker ps、进程列表等）时，用 Markdown 表格汇总，表格每一行都必须来自 <tool_result> 中的实际输出，不得臆造用户、容器或进程。例如：
| 用户 | UID | Shell |
|------|-----|-------|
| root | 0 | /bin/bash |

【禁止】不要输出上述三种动作以外的 JSON（如 simulated、scenario、details），不要编造多轮模拟对话。

【上下文】当下一条用户消息是 <tool_result>...</tool_result> 时，说明上一步已经执行完毕，你必须立刻输出下一个动作：继续 execute_command、list_assets，或 final 总结。不要只做文字分析。

【命令书写】command 中的换行写成 \n，不要在 JSON 字符串里写真实换行。在服务器上写多行文件时使用 heredoc（cat << 'EOF' ... EOF），不要用多条 echo 拼接。

【非交互】命令通过 SSH 非交互执行，不能使用等待键盘输入的命令，否则会超时。例如修改密码不要用 `passwd 用户名`，改用 `echo "用户名:新密码" | chpasswd`；其他需要输入的场景用管道或 heredoc 代替。"#;

/// Keywords that mean "every server" in an instruction.
const ALL_SERVERS_KEYWORDS: &[&str] = &[
    "所有服务器",
    "全部服务器",
    "检查所有",
    "所有主机",
    "每台",
    "全部主机",
    "所有资产",
];

/// The user message actually sent for `instruction`, with a scope prefix
/// when the caller fixed the assets or the instruction covers every server.
pub fn effective_instruction(instruction: &str, asset_names: &[String]) -> String {
    let names: Vec<&str> = asset_names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();

    if !names.is_empty() {
        return format!(
            "【本次指定运维对象：仅限以下资产：{}。用户已在界面选定资产，请直接对上述资产调用 \
             execute_command 执行用户指令，不要回复「请指定要操作的资产名称」，也不要仅用文字描述\
             将要执行的操作而不调用 execute_command。】\n\n{instruction}",
            names.join("、")
        );
    }

    if ALL_SERVERS_KEYWORDS.iter().any(|k| instruction.contains(k)) {
        return format!(
            "【用户要求检查/操作「所有」或「全部」服务器。请先 list_assets，然后对返回的**每一台**\
             资产依次执行相应命令，不要遗漏任何一台，再输出 final 总结。】\n\n{instruction}"
        );
    }

    instruction.to_string()
}

/// Reminder of the three legal encodings, after an unparsable reply.
pub const FORMAT_NUDGE: &str = concat!(
    "你刚才的回复不是规定的 action 格式。请只输出以下三种之一（可用 JSON 或 <tool_call>）：\n",
    r#"1) {"action": "list_assets"} 或 <tool_call>{"name":"list_assets","arguments":{}}</tool_call>"#,
    "\n",
    r#"2) {"action": "execute_command", "asset": "资产名", "command": "具体命令"} 或 <tool_call>{"name":"execute_command","arguments":{"asset_name":"资产名","command":"具体命令"}}</tool_call>"#,
    "\n",
    r#"3) {"action": "final", "message": "本次任务的一两句话中文总结"}（message 必须是真实结论，不要空话）"#,
);

/// After the model described a command instead of dispatching it.
pub const DISPATCH_NUDGE: &str = "你刚才只描述了将要执行的操作，但没有输出 execute_command。\
不要只给建议，也不要请用户告知具体目标：请在本轮直接输出 execute_command 动作执行命令，\
拿到结果后再给出结论。";

/// After the model asked which asset to use although the caller fixed them.
pub fn asset_fixed_nudge(asset_names: &[String]) -> String {
    format!(
        "本次运维对象已由用户选定：{}。无需也不能再要求用户「指定操作资产」。\
         请直接对这些资产输出 execute_command 继续执行，不要再回复「请指定资产」「无法继续执行」之类的内容。",
        asset_names.join("、")
    )
}

/// First re-ask after a low-quality final message.
pub const SUMMARY_NUDGE: &str = "请根据上述 <tool_result> 和用户指令，用 1～2 句话给出专业总结\
（如：服务/命令执行状态、是否异常、建议），不要只回复「任务已完成」或空话。\
若结果为用户列表、容器列表等可表格化的数据，请在 message 中用 Markdown 表格汇总，\
**表格中每一行必须来自 <tool_result> 中的实际输出，禁止添加未在输出中出现的用户/容器等**。\
示例：| 用户 | UID | Shell |\\n|------|-----|-------|\\n| root | 0 | /bin/bash |。\
只输出 {\"action\": \"final\", \"message\": \"你的总结\"}。";

/// Second, stricter re-ask.
pub const STRICT_SUMMARY_NUDGE: &str = "只回复一行 JSON，不要任何推理或解释：\
{\"action\": \"final\", \"message\": \"根据上方 <tool_result> 写 1～2 句总结或表格，\
表格仅包含输出中实际出现的用户/容器，禁止臆造\"}";

pub const GENERIC_COMPLETION: &str = "任务已完成。";
pub const NO_VALID_ACTION: &str = "模型未返回有效 JSON 动作。";
pub const ROUND_BUDGET_EXHAUSTED: &str = "已达到最大轮数，任务未完成。";
pub const CANCELLED: &str = "已按用户请求停止。";

pub fn unknown_asset_result(asset: &str, listing: &str) -> String {
    format!("未找到资产 '{asset}'。可用资产：\n{listing}")
}

pub fn unknown_action_result(kind: &str) -> String {
    format!("未知 action: {kind}，请输出 execute_command / list_assets / final 之一。")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_assets_prefix_wins() {
        let text = effective_instruction(
            "检查所有服务器磁盘",
            &["web-01".to_string(), " db-01 ".to_string()],
        );
        assert!(text.starts_with("【本次指定运维对象：仅限以下资产：web-01、db-01。"));
        assert!(text.ends_with("】\n\n检查所有服务器磁盘"));
        assert!(!text.contains("list_assets"));
    }

    #[test]
    fn all_servers_prefix() {
        let text = effective_instruction("每台机器看下负载", &[]);
        assert!(text.starts_with("【用户要求检查/操作「所有」或「全部」服务器。请先 list_assets"));
        assert!(text.ends_with("\n\n每台机器看下负载"));
    }

    #[test]
    fn plain_instruction_unchanged() {
        assert_eq!(effective_instruction("查看 web-01 负载", &[]), "查看 web-01 负载");
        assert_eq!(
            effective_instruction("查看负载", &["  ".to_string()]),
            "查看负载"
        );
    }

    #[test]
    fn format_nudge_lists_three_encodings() {
        assert!(FORMAT_NUDGE.contains("1) {\"action\": \"list_assets\"}"));
        assert!(FORMAT_NUDGE.contains("2) {\"action\": \"execute_command\""));
        assert!(FORMAT_NUDGE.contains("3) {\"action\": \"final\""));
        assert_eq!(FORMAT_NUDGE.lines().count(), 4);
    }

    #[test]
    fn asset_nudge_names_assets() {
        let text = asset_fixed_nudge(&["web-01".into(), "db-01".into()]);
        assert!(text.contains("web-01、db-01"));
    }

    #[test]
    fn system_prompt_covers_both_formats() {
        assert!(SYSTEM_PROMPT.contains("{\"action\": \"list_assets\"}"));
        assert!(SYSTEM_PROMPT.contains("<tool_call>{\"name\":\"execute_command\""));
        assert!(SYSTEM_PROMPT.contains("chpasswd"));
    }
}
