//! Action parser: raw model text in, at most one [`Action`] out.
//!
//! Model output arrives in many shapes: clean JSON, `<tool_call>` tags,
//! fenced blocks, JSON after a page of reasoning, or JSON cut off mid-string.
//! Each shape is handled by one [`ParseStrategy`]; [`ActionParser`] strips
//! `<think>` blocks and then runs the strategies in order, first match wins.
//!
//! Nothing in here returns an error. A strategy that cannot make sense of the
//! text returns `None` and the next one gets a turn.

pub mod repair;
pub mod strategies;

use opsclaw_core::Action;
use regex_lite::Regex;
use std::sync::LazyLock;
use strategies::{
    CodeFence, EmbeddedFinal, FirstBalancedObject, FromFirstBrace, TaggedToolCall, Tail,
    UnterminatedFinal, WholeText,
};

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").ok());

/// One way of recognising an action in model text.
pub trait ParseStrategy: Send + Sync {
    /// Short name, used in debug logs.
    fn name(&self) -> &'static str;

    fn try_parse(&self, text: &str) -> Option<Action>;
}

/// Remove `<think>...</think>` reasoning blocks.
pub fn strip_reasoning(text: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// First-match-wins chain of [`ParseStrategy`]s.
pub struct ActionParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl ActionParser {
    /// The standard chain, ordered from most to least specific.
    pub fn standard() -> Self {
        Self {
            strategies: vec![
                Box::new(TaggedToolCall),
                Box::new(WholeText),
                Box::new(FirstBalancedObject),
                Box::new(CodeFence),
                Box::new(FromFirstBrace),
                Box::new(Tail::default()),
                Box::new(EmbeddedFinal),
                Box::new(UnterminatedFinal::default()),
            ],
        }
    }

    /// A chain of exactly the given strategies.
    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Decode one assistant message.
    pub fn parse(&self, raw: &str) -> Option<Action> {
        let text = strip_reasoning(raw);
        if text.is_empty() {
            return None;
        }
        for strategy in &self.strategies {
            if let Some(action) = strategy.try_parse(&text) {
                tracing::debug!(strategy = strategy.name(), action = action.kind(), "Parsed action");
                return Some(action);
            }
        }
        None
    }
}

impl Default for ActionParser {
    fn default() -> Self {
        Self::standard()
    }
}

/// Parse with the standard chain.
pub fn parse_action(raw: &str) -> Option<Action> {
    ActionParser::standard().parse(raw)
}
