//! Structured-result recovery.
//!
//! Models are asked for one JSON object but answer with fenced blocks,
//! preambles, trailing prose or plain English. [`recover`] runs an ordered
//! list of strategies and returns the first edit-set any of them yields;
//! the last strategy (free-text extraction) always succeeds, so recovery is
//! total.

mod freetext;

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::model::{ModelEditSet, VariableRename};

pub use freetext::extract_components;

/// Which strategy produced an edit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectJson,
    FencedBlock,
    BalancedBraces,
    MarkedObject,
    NestedBraces,
    FreeText,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::DirectJson => "direct-json",
            Strategy::FencedBlock => "fenced-block",
            Strategy::BalancedBraces => "balanced-braces",
            Strategy::MarkedObject => "marked-object",
            Strategy::NestedBraces => "nested-braces",
            Strategy::FreeText => "free-text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub edit_set: ModelEditSet,
    pub strategy: Strategy,
}

type StrategyFn = fn(&str) -> Option<ModelEditSet>;

const STRATEGIES: &[(Strategy, StrategyFn)] = &[
    (Strategy::DirectJson, parse_direct),
    (Strategy::FencedBlock, parse_fenced),
    (Strategy::BalancedBraces, parse_balanced),
    (Strategy::MarkedObject, parse_marked),
    (Strategy::NestedBraces, parse_nested),
];

/// Recover an edit-set from raw model output. Never fails.
pub fn recover(raw: &str) -> ModelEditSet {
    recover_detailed(raw).edit_set
}

/// Like [`recover`], also reporting which strategy succeeded.
pub fn recover_detailed(raw: &str) -> Recovery {
    for (strategy, attempt) in STRATEGIES {
        if let Some(edit_set) = attempt(raw) {
            debug!(%strategy, "recovered edit-set");
            return Recovery { edit_set, strategy: *strategy };
        }
    }
    debug!("no JSON object recovered; extracting from free text");
    Recovery { edit_set: extract_components(raw), strategy: Strategy::FreeText }
}

/// A value that may or may not have the expected JSON type.
#[derive(Deserialize)]
#[serde(untagged)]
enum Field<T> {
    Typed(T),
    Other(Value),
}

impl<T> Field<T> {
    fn typed(self) -> Option<T> {
        match self {
            Field::Typed(v) => Some(v),
            Field::Other(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireVariable {
    Pair { original_name: String, new_name: String },
    Other(Value),
}

/// The JSON object as models send it: every field optional.
#[derive(Deserialize)]
struct WireEditSet {
    comment: Option<Field<String>>,
    function_name: Option<Field<String>>,
    variables: Option<Field<Vec<WireVariable>>>,
    security_role: Option<Field<String>>,
}

impl WireEditSet {
    fn has_any_field(&self) -> bool {
        self.comment.is_some()
            || self.function_name.is_some()
            || self.variables.is_some()
            || self.security_role.is_some()
    }

    fn into_edit_set(self) -> ModelEditSet {
        let text = |field: Option<Field<String>>| {
            field.and_then(Field::typed).map(|s| s.trim().to_string()).unwrap_or_default()
        };
        let variables = self
            .variables
            .and_then(Field::typed)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| match v {
                WireVariable::Pair { original_name, new_name } => {
                    Some(VariableRename::new(original_name.trim(), new_name.trim()))
                }
                WireVariable::Other(_) => None,
            })
            .collect();
        ModelEditSet {
            comment: text(self.comment),
            function_name: text(self.function_name),
            variables,
            security_role: text(self.security_role),
        }
    }
}

/// Parse `text` as a JSON edit-set object.
fn edit_set_from_json(text: &str) -> Option<ModelEditSet> {
    let wire: WireEditSet = serde_json::from_str(text.trim()).ok()?;
    wire.has_any_field().then(|| wire.into_edit_set())
}

fn parse_direct(raw: &str) -> Option<ModelEditSet> {
    edit_set_from_json(raw)
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("fence pattern"));

fn parse_fenced(raw: &str) -> Option<ModelEditSet> {
    FENCE_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| edit_set_from_json(body.as_str()))
}

/// End (exclusive) of the balanced `{...}` starting at `start`, honouring
/// string literals and escapes.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_balanced(raw: &str) -> Option<ModelEditSet> {
    let bytes = raw.as_bytes();
    let mut cursor = 0;
    while let Some(offset) = raw[cursor..].find('{') {
        let start = cursor + offset;
        if let Some(end) = balanced_end(bytes, start) {
            if let Some(edits) = edit_set_from_json(&raw[start..end]) {
                return Some(edits);
            }
        }
        cursor = start + 1;
    }
    None
}

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:Here's the JSON|JSON response|Response):\s*(\{[\s\S]*\})")
        .expect("marker pattern")
});

fn parse_marked(raw: &str) -> Option<ModelEditSet> {
    let caps = MARKER_RE.captures(raw)?;
    edit_set_from_json(caps.get(1)?.as_str())
}

/// Brace nesting the nested-object pattern can follow.
const NESTED_BRACE_DEPTH: usize = 6;

fn nested_brace_pattern(depth: usize) -> String {
    let mut content = r"[^{}]*".to_string();
    for _ in 0..depth {
        content = format!(r"(?:[^{{}}]|\{{{content}\}})*");
    }
    format!(r"\{{{content}\}}")
}

static NESTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&nested_brace_pattern(NESTED_BRACE_DEPTH)).expect("nested brace pattern")
});

fn parse_nested(raw: &str) -> Option<ModelEditSet> {
    NESTED_RE.find_iter(raw).find_map(|m| edit_set_from_json(m.as_str()))
}
