//! Program analysis over a [`crate::oracle::SymbolOracle`].
//!
//! - `context`: call-graph context digest for one function.
//! - `classify`: special-function (stub) detection.
//! - `chain`: call-chain traversal producing an ordered work-list.
//! - `prompt`: prompt composition from a digest and decompiled code.

pub mod chain;
pub mod classify;
pub mod context;
pub mod prompt;

pub use chain::{build_chain, visible_functions, ChainOptions, MAX_CHAIN_DEPTH};
pub use classify::{classify_function, classify_pseudocode, SpecialKind, SPECIAL_SIZE_LIMIT};
pub use context::{
    build_context, discover_callees, discover_callers, Callee, ContextDigest, ContextOptions,
    ContextProfile, EffectiveSettings, Neighbor,
};
pub use prompt::{compose_prompt, reformat_prompt, LARGE_FUNCTION_THRESHOLD, SYSTEM_PROMPT};
