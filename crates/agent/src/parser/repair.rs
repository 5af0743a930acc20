//! Lenient JSON loading for model output.
//!
//! Models emit JSON with raw newlines inside strings, `//` annotations and
//! trailing commas. [`load_action`] tries the text as-is and then each repair
//! in turn; nothing here ever fails loudly.

use opsclaw_core::Action;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").ok());

/// Drop `// ...` to end of line outside string literals, except where the
/// slashes follow a `:` (URLs).
pub fn strip_line_comments(text: &str) -> String {
    if !text.contains("//") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    let mut prev = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                out.push(c);
                prev = Some(c);
            }
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == '/' && chars.peek() == Some(&'/') && prev != Some(':') {
            in_comment = true;
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Escape raw CR/LF that appear inside JSON string literals.
pub fn escape_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Remove commas directly before a closing `}` or `]`.
pub fn remove_trailing_commas(text: &str) -> String {
    match TRAILING_COMMA.as_ref() {
        Some(re) => re.replace_all(text, "$1").into_owned(),
        None => text.to_string(),
    }
}

/// The brace-balanced `{...}` starting at byte `start`, ignoring braces
/// inside string literals. `None` when the object never closes.
pub fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Map a decoded `{"action": ...}` object to an [`Action`].
pub fn action_from_object(obj: &Map<String, Value>) -> Option<Action> {
    let kind = obj.get("action")?.as_str()?.trim();
    if kind.is_empty() {
        return None;
    }
    let action = match kind {
        "list_assets" => Action::ListAssets,
        "execute_command" => Action::ExecuteCommand {
            asset: str_field(obj, "asset")
                .filter(|s| !s.is_empty())
                .or_else(|| str_field(obj, "asset_name"))
                .unwrap_or_default(),
            command: str_field(obj, "command").unwrap_or_default(),
        },
        "final" => Action::Final {
            message: str_field(obj, "message").unwrap_or_default(),
        },
        other => Action::Unrecognized {
            raw: other.to_string(),
        },
    };
    Some(action)
}

/// Map a `{"name", "arguments"}` tool call to an [`Action`].
///
/// `execute_command` needs at least one of asset or command to be non-empty.
pub fn action_from_tool_call(name: &str, arguments: &Map<String, Value>) -> Option<Action> {
    match name.trim() {
        "list_assets" => Some(Action::ListAssets),
        "execute_command" => {
            let asset = str_field(arguments, "asset_name")
                .filter(|s| !s.is_empty())
                .or_else(|| str_field(arguments, "asset"))
                .unwrap_or_default();
            let command = str_field(arguments, "command").unwrap_or_default();
            if asset.is_empty() && command.is_empty() {
                None
            } else {
                Some(Action::ExecuteCommand { asset, command })
            }
        }
        _ => None,
    }
}

/// Decode one action object, trying the raw text, then with newlines
/// escaped, then with trailing commas removed. Comments are stripped each
/// time. `{"response": "..."}` is read as a final message.
pub fn load_action(text: &str) -> Option<Action> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let candidates = [
        text.to_string(),
        escape_newlines_in_strings(text),
        remove_trailing_commas(text),
    ];
    for candidate in &candidates {
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&strip_line_comments(candidate))
        else {
            continue;
        };
        if let Some(action) = action_from_object(&obj) {
            return Some(action);
        }
        match obj.get("response") {
            None | Some(Value::Null) => {}
            Some(_) => {
                return Some(Action::Final {
                    message: str_field(&obj, "response").unwrap_or_default(),
                });
            }
        }
    }
    None
}
