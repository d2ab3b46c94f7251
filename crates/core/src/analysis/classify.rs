//! Special-function detection.
//!
//! Tiny stubs (breakpoints, empty bodies, forwarding thunks, constant
//! returns) carry no useful signal for naming and are skipped during chain
//! traversal.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::model::FunctionAddress;
use crate::oracle::SymbolOracle;

/// Functions at least this many bytes long are never special.
pub const SPECIAL_SIZE_LIMIT: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpecialKind {
    Break,
    Nullsub,
    Thunk,
    ConstantReturn,
    Regular,
}

impl SpecialKind {
    pub fn is_special(self) -> bool {
        self != SpecialKind::Regular
    }

    pub fn label(self) -> &'static str {
        match self {
            SpecialKind::Break => "Break function",
            SpecialKind::Nullsub => "Nullsub function",
            SpecialKind::Thunk => "Thunk function",
            SpecialKind::ConstantReturn => "Constant return function",
            SpecialKind::Regular => "Regular function",
        }
    }
}

impl fmt::Display for SpecialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*__break\(.*\);\s*\}").expect("break pattern"));
static NULLSUB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*;\s*\}").expect("nullsub pattern"));
static THUNK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*return\s+[a-zA-Z0-9_]+\(.*\);\s*\}").expect("thunk pattern")
});
static CONSTANT_RETURN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*return\s+([0-9]+|0x[0-9a-fA-F]+)(?:LL|ULL)?;\s*\}")
        .expect("constant return pattern")
});

/// Classify a pseudocode body by shape alone. Patterns are tried in a
/// fixed order and the first match wins.
pub fn classify_pseudocode(code: &str) -> SpecialKind {
    if BREAK_RE.is_match(code) {
        SpecialKind::Break
    } else if NULLSUB_RE.is_match(code) {
        SpecialKind::Nullsub
    } else if THUNK_RE.is_match(code) {
        SpecialKind::Thunk
    } else if CONSTANT_RETURN_RE.is_match(code) {
        SpecialKind::ConstantReturn
    } else {
        SpecialKind::Regular
    }
}

/// Classify the function at `func`.
///
/// Missing functions, large functions and functions that fail to decompile
/// are all regular.
pub fn classify_function(oracle: &dyn SymbolOracle, func: FunctionAddress) -> SpecialKind {
    let Some(info) = oracle.function(func.0) else {
        return SpecialKind::Regular;
    };
    if info.size() >= SPECIAL_SIZE_LIMIT {
        return SpecialKind::Regular;
    }
    match oracle.decompile(func) {
        Ok(code) => {
            let kind = classify_pseudocode(&code);
            if kind.is_special() {
                debug!(function = %func, kind = %kind, "special function");
            }
            kind
        }
        Err(_) => SpecialKind::Regular,
    }
}
