//! Serializable program snapshot.
//!
//! A snapshot is the interchange format between importers and oracles: an
//! exporter script (or the capstone importer) writes one, `ProjectDb` loads it,
//! and `InMemoryOracle` is built straight from it in tests.

use serde::{Deserialize, Serialize};

use crate::model::FunctionAddress;
use crate::oracle::{BasicBlock, Instruction, Xref};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    pub binary: SnapshotBinary,
    #[serde(default)]
    pub segments: Vec<SegmentRecord>,
    #[serde(default)]
    pub functions: Vec<SnapshotFunction>,
    #[serde(default)]
    pub xrefs: Vec<Xref>,
    #[serde(default)]
    pub strings: Vec<StringLiteral>,
    #[serde(default)]
    pub data_names: Vec<DataName>,
    #[serde(default)]
    pub data_types: Vec<DataType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBinary {
    pub filename: String,
    pub processor: String,
    #[serde(default)]
    pub is_64bit: bool,
    /// Hex-encoded SHA-256 of the source binary, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// RFC 3339 timestamp of the import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFunction {
    pub address: FunctionAddress,
    pub end: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Decompiled pseudocode; `None` when the decompiler failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudocode: Option<String>,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
}

impl SnapshotFunction {
    pub fn new(address: u64, end: u64, name: impl Into<String>) -> Self {
        Self {
            address: FunctionAddress(address),
            end,
            name: name.into(),
            comment: None,
            pseudocode: None,
            locals: Vec::new(),
            instructions: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringLiteral {
    pub address: u64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataName {
    pub address: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    pub address: u64,
    pub type_name: String,
}
