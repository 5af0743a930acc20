//! The individual parse strategies, in chain order.

use super::ParseStrategy;
use super::repair::{action_from_tool_call, balanced_object, load_action, strip_line_comments};
use opsclaw_core::Action;
use opsclaw_security::is_fluff;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static TOOL_CALL_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<tool_call>\s*(\{[^<]*\})\s*</tool_call>").ok());

static BARE_TOOL_CALL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)\{\s*"name"\s*:\s*"([^"]+)"\s*,\s*"arguments"\s*:\s*(\{(?:[^{}]|\{[^{}]*\})*\})\s*\}"#,
    )
    .ok()
});

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*\n?(.*?)```").ok());

static FINAL_OPENING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"\{\s*"action"\s*:\s*"final""#).ok());

static MESSAGE_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""message"\s*:\s*""#).ok());

const ACTION_KEY: &str = "\"action\"";

/// Every `{name, arguments}` pair found in tagged blocks, or failing that
/// anywhere in the text.
fn tool_calls(text: &str) -> Vec<(String, Map<String, Value>)> {
    let mut out = Vec::new();

    if let Some(re) = TOOL_CALL_BLOCK.as_ref() {
        for caps in re.captures_iter(text) {
            let Some(body) = caps.get(1) else { continue };
            let Ok(Value::Object(obj)) =
                serde_json::from_str::<Value>(&strip_line_comments(body.as_str().trim()))
            else {
                continue;
            };
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let arguments = match obj.get("arguments") {
                Some(Value::Object(map)) => map.clone(),
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    match serde_json::from_str::<Value>(s) {
                        Ok(Value::Object(map)) => map,
                        _ => Map::new(),
                    }
                }
                _ => Map::new(),
            };
            if !name.is_empty() {
                out.push((name, arguments));
            }
        }
    }
    if !out.is_empty() {
        return out;
    }

    if let Some(re) = BARE_TOOL_CALL.as_ref() {
        for caps in re.captures_iter(text) {
            let (Some(name), Some(args)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let arguments = match serde_json::from_str::<Value>(&strip_line_comments(args.as_str()))
            {
                Ok(Value::Object(map)) => map,
                Ok(_) => Map::new(),
                Err(_) => continue,
            };
            let name = name.as_str().trim();
            if !name.is_empty() {
                out.push((name.to_string(), arguments));
            }
        }
    }
    out
}

fn single_tool_call(text: &str) -> Option<Action> {
    match tool_calls(text).as_slice() {
        [(name, arguments)] => action_from_tool_call(name, arguments),
        _ => None,
    }
}

fn load_from_first_brace(text: &str) -> Option<Action> {
    if !text.contains(ACTION_KEY) {
        return None;
    }
    let start = text.find('{')?;
    load_action(&text[start..])
}

fn load_first_balanced(text: &str) -> Option<Action> {
    if !text.contains(ACTION_KEY) {
        return None;
    }
    let start = text.find('{')?;
    load_action(balanced_object(text, start)?)
}

fn load_code_fences(text: &str) -> Option<Action> {
    let re = CODE_FENCE.as_ref()?;
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|inner| load_action(inner.as_str()))
}

/// The last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let skip = count - n;
    match text.char_indices().nth(skip) {
        Some((byte, _)) => &text[byte..],
        None => text,
    }
}

/// `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`, or one bare
/// `{"name", "arguments"}` object. Exactly one call must be present.
pub struct TaggedToolCall;

impl ParseStrategy for TaggedToolCall {
    fn name(&self) -> &'static str {
        "tagged_tool_call"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        single_tool_call(text)
    }
}

/// The whole text is one action object.
pub struct WholeText;

impl ParseStrategy for WholeText {
    fn name(&self) -> &'static str {
        "whole_text"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        load_action(text)
    }
}

/// The first brace-balanced object, for replies with commentary after the JSON.
pub struct FirstBalancedObject;

impl ParseStrategy for FirstBalancedObject {
    fn name(&self) -> &'static str {
        "first_balanced_object"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        load_first_balanced(text)
    }
}

/// JSON inside a fenced code block.
pub struct CodeFence;

impl ParseStrategy for CodeFence {
    fn name(&self) -> &'static str {
        "code_fence"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        load_code_fences(text)
    }
}

/// Everything from the first `{`, for a prose preamble before the JSON.
pub struct FromFirstBrace;

impl ParseStrategy for FromFirstBrace {
    fn name(&self) -> &'static str {
        "from_first_brace"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        load_from_first_brace(text)
    }
}

/// Long replies whose action survives only at the end.
pub struct Tail {
    min_chars: usize,
    windows: &'static [usize],
}

impl Default for Tail {
    fn default() -> Self {
        Self {
            min_chars: 400,
            windows: &[2000, 1200, 800, 500],
        }
    }
}

impl ParseStrategy for Tail {
    fn name(&self) -> &'static str {
        "tail"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        if text.chars().count() <= self.min_chars {
            return None;
        }
        self.windows.iter().find_map(|&n| {
            let tail = tail_chars(text, n);
            load_from_first_brace(tail)
                .or_else(|| load_first_balanced(tail))
                .or_else(|| load_code_fences(tail))
                .or_else(|| single_tool_call(tail))
        })
    }
}

/// A complete `{"action": "final", ...}` object anywhere in the text.
pub struct EmbeddedFinal;

impl ParseStrategy for EmbeddedFinal {
    fn name(&self) -> &'static str {
        "embedded_final"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let re = FINAL_OPENING.as_ref()?;
        re.find_iter(text)
            .filter_map(|m| balanced_object(text, m.start()))
            .find_map(load_action)
    }
}

/// A final message whose string literal never closes (runaway or truncated
/// output). Reads up to the first unescaped quote or the end of the text.
pub struct UnterminatedFinal {
    min_chars: usize,
}

impl Default for UnterminatedFinal {
    fn default() -> Self {
        Self { min_chars: 5 }
    }
}

impl UnterminatedFinal {
    fn decode_until_quote(rest: &str) -> String {
        let mut out = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => break,
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

impl ParseStrategy for UnterminatedFinal {
    fn name(&self) -> &'static str {
        "unterminated_final"
    }

    fn try_parse(&self, text: &str) -> Option<Action> {
        let m = MESSAGE_FIELD.as_ref()?.find(text)?;
        let before = &text[..m.start()];
        if !before.contains("final") && !before.contains(ACTION_KEY) {
            return None;
        }
        let message = Self::decode_until_quote(&text[m.end()..]);
        let message = message.trim();
        if message.chars().count() > self.min_chars && !is_fluff(message) {
            Some(Action::Final {
                message: message.to_string(),
            })
        } else {
            None
        }
    }
}
