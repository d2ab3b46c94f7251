use std::collections::BTreeMap;

use crate::model::{BinaryInfo, FunctionAddress};
use crate::oracle::{
    rename_in_pseudocode, validate_identifier, BasicBlock, DataName, DataType, FunctionInfo,
    Instruction, OracleError, OracleResult, ProgramSnapshot, SegmentRecord, SnapshotBinary,
    SnapshotFunction, StringLiteral, SymbolOracle, Xref,
};

#[derive(Debug, Clone)]
struct FunctionEntry {
    info: FunctionInfo,
    pseudocode: Option<String>,
    locals: Vec<String>,
    instructions: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

/// Oracle backed by plain maps, built from a [`ProgramSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryOracle {
    binary: SnapshotBinary,
    segments: Vec<SegmentRecord>,
    functions: BTreeMap<u64, FunctionEntry>,
    /// Instruction address -> owning function entry.
    instruction_owner: BTreeMap<u64, u64>,
    xrefs: Vec<Xref>,
    strings: BTreeMap<u64, String>,
    data_names: BTreeMap<u64, String>,
    data_types: BTreeMap<u64, String>,
    refreshes: BTreeMap<u64, u32>,
}

impl InMemoryOracle {
    pub fn from_snapshot(snapshot: ProgramSnapshot) -> Self {
        let mut oracle = InMemoryOracle {
            binary: snapshot.binary,
            segments: snapshot.segments,
            xrefs: snapshot.xrefs,
            ..Default::default()
        };
        for func in snapshot.functions {
            let entry = func.address.0;
            for insn in &func.instructions {
                oracle.instruction_owner.insert(insn.address, entry);
            }
            oracle.functions.insert(
                entry,
                FunctionEntry {
                    info: FunctionInfo {
                        address: func.address,
                        end: func.end,
                        name: func.name,
                        comment: func.comment,
                    },
                    pseudocode: func.pseudocode,
                    locals: func.locals,
                    instructions: func.instructions,
                    blocks: func.blocks,
                },
            );
        }
        oracle.strings = snapshot.strings.into_iter().map(|s| (s.address, s.content)).collect();
        oracle.data_names = snapshot.data_names.into_iter().map(|d| (d.address, d.name)).collect();
        oracle.data_types =
            snapshot.data_types.into_iter().map(|d| (d.address, d.type_name)).collect();
        oracle
    }

    /// Export the current state (including applied edits) as a snapshot.
    pub fn to_snapshot(&self) -> ProgramSnapshot {
        ProgramSnapshot {
            binary: self.binary.clone(),
            segments: self.segments.clone(),
            functions: self
                .functions
                .values()
                .map(|entry| SnapshotFunction {
                    address: entry.info.address,
                    end: entry.info.end,
                    name: entry.info.name.clone(),
                    comment: entry.info.comment.clone(),
                    pseudocode: entry.pseudocode.clone(),
                    locals: entry.locals.clone(),
                    instructions: entry.instructions.clone(),
                    blocks: entry.blocks.clone(),
                })
                .collect(),
            xrefs: self.xrefs.clone(),
            strings: self
                .strings
                .iter()
                .map(|(address, content)| StringLiteral { address: *address, content: content.clone() })
                .collect(),
            data_names: self
                .data_names
                .iter()
                .map(|(address, name)| DataName { address: *address, name: name.clone() })
                .collect(),
            data_types: self
                .data_types
                .iter()
                .map(|(address, type_name)| DataType {
                    address: *address,
                    type_name: type_name.clone(),
                })
                .collect(),
        }
    }

    /// How many times `refresh` was called for `func`.
    pub fn refresh_count(&self, func: FunctionAddress) -> u32 {
        self.refreshes.get(&func.0).copied().unwrap_or(0)
    }

    fn entry(&self, func: FunctionAddress) -> OracleResult<&FunctionEntry> {
        self.functions.get(&func.0).ok_or(OracleError::NoFunction(func.0))
    }

    fn entry_mut(&mut self, func: FunctionAddress) -> OracleResult<&mut FunctionEntry> {
        self.functions.get_mut(&func.0).ok_or(OracleError::NoFunction(func.0))
    }
}

impl SymbolOracle for InMemoryOracle {
    fn binary_info(&self) -> BinaryInfo {
        BinaryInfo::detect(
            self.binary.filename.clone(),
            self.binary.processor.clone(),
            self.binary.is_64bit,
            self.segments.iter().map(|s| s.name.as_str()),
        )
    }

    fn function(&self, addr: u64) -> Option<FunctionInfo> {
        self.functions.get(&addr).map(|entry| entry.info.clone())
    }

    fn function_containing(&self, addr: u64) -> Option<FunctionInfo> {
        self.functions
            .range(..=addr)
            .next_back()
            .map(|(_, entry)| &entry.info)
            .filter(|info| info.contains(addr))
            .cloned()
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        self.functions.values().map(|entry| entry.info.clone()).collect()
    }

    fn instructions(&self, func: FunctionAddress) -> OracleResult<Vec<Instruction>> {
        Ok(self.entry(func)?.instructions.clone())
    }

    fn instruction_at(&self, addr: u64) -> Option<Instruction> {
        let owner = self.instruction_owner.get(&addr)?;
        self.functions.get(owner)?.instructions.iter().find(|insn| insn.address == addr).cloned()
    }

    fn basic_blocks(&self, func: FunctionAddress) -> OracleResult<Vec<BasicBlock>> {
        Ok(self.entry(func)?.blocks.clone())
    }

    fn xrefs_from(&self, addr: u64) -> Vec<Xref> {
        self.xrefs.iter().filter(|x| x.from == addr).copied().collect()
    }

    fn xrefs_to(&self, addr: u64) -> Vec<Xref> {
        self.xrefs.iter().filter(|x| x.to == addr).copied().collect()
    }

    fn name_at(&self, addr: u64) -> Option<String> {
        self.functions
            .get(&addr)
            .map(|entry| entry.info.name.clone())
            .or_else(|| self.data_names.get(&addr).cloned())
    }

    fn type_at(&self, addr: u64) -> Option<String> {
        self.data_types.get(&addr).cloned()
    }

    fn string_at(&self, addr: u64) -> Option<String> {
        self.strings.get(&addr).cloned()
    }

    fn is_code(&self, addr: u64) -> bool {
        self.instruction_owner.contains_key(&addr) || self.function_containing(addr).is_some()
    }

    fn segment_names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.name.clone()).collect()
    }

    fn decompile(&self, func: FunctionAddress) -> OracleResult<String> {
        self.entry(func)?.pseudocode.clone().ok_or(OracleError::DecompilationUnavailable(func.0))
    }

    fn local_variables(&self, func: FunctionAddress) -> OracleResult<Vec<String>> {
        Ok(self.entry(func)?.locals.clone())
    }

    fn set_function_comment(&mut self, func: FunctionAddress, comment: &str) -> OracleResult<()> {
        self.entry_mut(func)?.info.comment = Some(comment.to_string());
        Ok(())
    }

    fn set_function_name(&mut self, func: FunctionAddress, name: &str) -> OracleResult<()> {
        validate_identifier(name)?;
        let clash = self
            .functions
            .values()
            .any(|entry| entry.info.address != func && entry.info.name == name)
            || self.data_names.values().any(|n| n == name);
        if clash {
            return Err(OracleError::NameInUse(name.to_string()));
        }
        self.entry_mut(func)?.info.name = name.to_string();
        Ok(())
    }

    fn rename_local(&mut self, func: FunctionAddress, old: &str, new: &str) -> OracleResult<()> {
        validate_identifier(new)?;
        let entry = self.entry_mut(func)?;
        if entry.locals.iter().any(|l| l == new) {
            return Err(OracleError::NameInUse(new.to_string()));
        }
        let slot = entry.locals.iter_mut().find(|l| l.as_str() == old).ok_or_else(|| {
            OracleError::NoSuchVariable { function: func.0, name: old.to_string() }
        })?;
        *slot = new.to_string();
        if let Some(code) = entry.pseudocode.as_mut() {
            *code = rename_in_pseudocode(code, old, new);
        }
        Ok(())
    }

    fn refresh(&mut self, func: FunctionAddress) {
        *self.refreshes.entry(func.0).or_insert(0) += 1;
    }
}
