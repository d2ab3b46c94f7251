//! namesmith-core
//!
//! Core library for model-assisted naming of functions in analyzed binaries.
//!
//! A loaded program is reached through the [`oracle::SymbolOracle`] trait.
//! For one function the crate gathers a call-graph digest, composes a prompt,
//! queries a chat-completions model, recovers a structured edit-set from
//! whatever text comes back and applies the edits through the oracle.
//!
//! All substantive logic lives here so it can be tested without a network or
//! a host disassembler and reused from the CLI.

pub mod model;
pub mod oracle;
pub mod db;
pub mod import;
pub mod analysis;
pub mod llm;
pub mod recovery;
pub mod apply;
pub mod pipeline;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
