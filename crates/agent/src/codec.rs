//! Tool result codec: the `<tool_result>` envelope fed back to the model.

use opsclaw_core::ToolResult;
use regex_lite::Regex;
use std::sync::LazyLock;

/// Default payload ceiling, in characters.
pub const DEFAULT_MAX_CHARS: usize = 12_000;

const EMPTY_PLACEHOLDER: &str = "(no output)";

static TOOL_RESULT_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool_result(?:\s+asset="([^"]*)")?[^>]*>\n?(.*?)\n?</tool_result>"#).ok()
});

/// One `<tool_result>` block read back out of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResult {
    pub asset: Option<String>,
    pub body: String,
}

/// Wraps dispatch output, truncating anything over `max_chars`.
#[derive(Debug, Clone, Copy)]
pub struct ToolResultCodec {
    max_chars: usize,
}

impl Default for ToolResultCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl ToolResultCodec {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn wrap(&self, text: &str, asset: Option<&str>) -> ToolResult {
        let payload = if text.trim().is_empty() {
            EMPTY_PLACEHOLDER
        } else {
            text
        };
        let original_length = payload.chars().count();
        let truncated = original_length > self.max_chars;

        let body = if truncated {
            let head: String = payload.chars().take(self.max_chars).collect();
            format!(
                "{head}\n\n(以上为命令输出前 {max} 字，已截断；完整共 {original_length} 字。\
                 请根据上述信息输出下一个 action：继续执行命令或 final 总结。)",
                max = self.max_chars
            )
        } else {
            payload.to_string()
        };

        let asset = asset.map(str::trim).filter(|a| !a.is_empty());
        let text = match asset {
            Some(name) => format!("<tool_result asset=\"{name}\">\n{body}\n</tool_result>"),
            None => format!("<tool_result>\n{body}\n</tool_result>"),
        };

        ToolResult {
            text,
            asset: asset.map(str::to_string),
            truncated,
            original_length,
        }
    }
}

/// Wrap with the default ceiling.
pub fn wrap(text: &str, asset: Option<&str>) -> ToolResult {
    ToolResultCodec::default().wrap(text, asset)
}

/// Every `<tool_result>` block in `text`, in order.
pub fn decode(text: &str) -> Vec<DecodedResult> {
    let Some(re) = TOOL_RESULT_BLOCK.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|caps| DecodedResult {
            asset: caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .filter(|a| !a.is_empty()),
            body: caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
        .collect()
}
