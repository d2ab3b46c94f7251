//! The symbol oracle: the query/mutation surface over a loaded program.
//!
//! Every analysis stage reads the program through [`SymbolOracle`] and every
//! edit goes back through it. Two implementations ship with the crate:
//! [`InMemoryOracle`] (fixtures, tests) and the SQLite-backed
//! [`crate::db::ProjectDb`].

pub mod memory;
pub mod snapshot;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BinaryInfo, FunctionAddress};

pub use memory::InMemoryOracle;
pub use snapshot::{
    DataName, DataType, ProgramSnapshot, SegmentRecord, SnapshotBinary, SnapshotFunction,
    StringLiteral,
};

/// Errors surfaced by oracle queries and mutations.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no function at 0x{0:x}")]
    NoFunction(u64),

    #[error("decompilation unavailable for function at 0x{0:x}")]
    DecompilationUnavailable(u64),

    #[error("name '{0}' is already in use")]
    NameInUse(String),

    #[error("'{0}' is not a valid identifier")]
    InvalidName(String),

    #[error("function at 0x{function:x} has no local variable '{name}'")]
    NoSuchVariable { function: u64, name: String },

    /// Backing store failure (SQLite, serialization).
    #[error("oracle storage error: {0}")]
    Storage(String),
}

pub type OracleResult<T> = Result<T, OracleError>;

/// A function as known to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub address: FunctionAddress,
    /// Exclusive end address.
    pub end: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl FunctionInfo {
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.address.0)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address.0 && addr < self.end
    }
}

/// Decoded instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    /// Near code reference (direct call/jump target).
    Near(u64),
    /// Far code reference.
    Far(u64),
    /// Memory operand with a resolved absolute address.
    Mem(u64),
    Imm(u64),
    Reg(String),
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    pub size: u32,
    pub disasm: String,
    #[serde(default)]
    pub is_call: bool,
    #[serde(default)]
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub successors: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XrefKind {
    CallNear,
    CallFar,
    JumpNear,
    JumpFar,
    Flow,
    DataOffset,
    DataRead,
    DataWrite,
}

impl XrefKind {
    pub fn is_call(self) -> bool {
        matches!(self, XrefKind::CallNear | XrefKind::CallFar)
    }

    pub fn is_code(self) -> bool {
        matches!(
            self,
            XrefKind::CallNear
                | XrefKind::CallFar
                | XrefKind::JumpNear
                | XrefKind::JumpFar
                | XrefKind::Flow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            XrefKind::CallNear => "call_near",
            XrefKind::CallFar => "call_far",
            XrefKind::JumpNear => "jump_near",
            XrefKind::JumpFar => "jump_far",
            XrefKind::Flow => "flow",
            XrefKind::DataOffset => "data_offset",
            XrefKind::DataRead => "data_read",
            XrefKind::DataWrite => "data_write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "call_near" => XrefKind::CallNear,
            "call_far" => XrefKind::CallFar,
            "jump_near" => XrefKind::JumpNear,
            "jump_far" => XrefKind::JumpFar,
            "flow" => XrefKind::Flow,
            "data_offset" => XrefKind::DataOffset,
            "data_read" => XrefKind::DataRead,
            "data_write" => XrefKind::DataWrite,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xref {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
}

/// Query and mutation surface over a loaded program.
///
/// Queries take `&self`; mutations take `&mut self` so the borrow checker
/// keeps them on whichever thread owns the oracle.
pub trait SymbolOracle {
    fn binary_info(&self) -> BinaryInfo;

    /// Function whose entry is exactly `addr`.
    fn function(&self, addr: u64) -> Option<FunctionInfo>;
    /// Function whose range contains `addr`.
    fn function_containing(&self, addr: u64) -> Option<FunctionInfo>;
    /// All functions ordered by entry address.
    fn functions(&self) -> Vec<FunctionInfo>;
    fn function_by_name(&self, name: &str) -> Option<FunctionInfo> {
        self.functions().into_iter().find(|f| f.name == name)
    }

    fn instructions(&self, func: FunctionAddress) -> OracleResult<Vec<Instruction>>;
    fn instruction_at(&self, addr: u64) -> Option<Instruction>;
    fn basic_blocks(&self, func: FunctionAddress) -> OracleResult<Vec<BasicBlock>>;

    fn xrefs_from(&self, addr: u64) -> Vec<Xref>;
    fn xrefs_to(&self, addr: u64) -> Vec<Xref>;

    /// Name attached to `addr` (function entry or named data), if any.
    fn name_at(&self, addr: u64) -> Option<String>;
    fn type_at(&self, addr: u64) -> Option<String>;
    /// String literal starting at `addr`.
    fn string_at(&self, addr: u64) -> Option<String>;
    fn is_code(&self, addr: u64) -> bool;
    /// Names of the program's segments (used for platform detection).
    fn segment_names(&self) -> Vec<String>;

    fn decompile(&self, func: FunctionAddress) -> OracleResult<String>;
    fn local_variables(&self, func: FunctionAddress) -> OracleResult<Vec<String>>;

    fn set_function_comment(&mut self, func: FunctionAddress, comment: &str) -> OracleResult<()>;
    fn set_function_name(&mut self, func: FunctionAddress, name: &str) -> OracleResult<()>;
    fn rename_local(&mut self, func: FunctionAddress, old: &str, new: &str) -> OracleResult<()>;
    /// Invalidate cached views of `func` after edits.
    fn refresh(&mut self, _func: FunctionAddress) {}
}

const MAX_IDENTIFIER_LEN: usize = 255;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Reject names the program database could not store as a symbol.
pub fn validate_identifier(name: &str) -> OracleResult<()> {
    if name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(OracleError::InvalidName(name.to_string()))
    }
}

/// Replace whole-word occurrences of `old` with `new` in pseudocode text.
pub(crate) fn rename_in_pseudocode(text: &str, old: &str, new: &str) -> String {
    match Regex::new(&format!(r"\b{}\b", regex::escape(old))) {
        Ok(re) => re.replace_all(text, new).into_owned(),
        Err(_) => text.to_string(),
    }
}
