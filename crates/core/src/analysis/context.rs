//! Call-graph context builder.
//!
//! Collects everything the model sees about a function besides its own
//! pseudocode: callers, callees (with call counts), referenced strings and
//! data, outgoing references, optional assembly, Objective-C class
//! references and neighbour pseudocode. Collection produces a structured
//! [`ContextDigest`]; [`ContextDigest::render`] turns it into prompt text.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::FunctionAddress;
use crate::oracle::{FunctionInfo, Operand, OracleError, OracleResult, SymbolOracle};

/// Config filenames whose string references are flagged in the digest.
pub const DEFAULT_IMPORTANT_FILES: &[&str] = &["li.txt", "bi.txt", "config-encrypt.txt"];

const IMPORTANT_FILE_PREFIX: &str = "[IMPORTANT CONFIG FILE] ";
const STRING_LIMIT: usize = 20;
const STRING_CHARS: usize = 100;
const DATA_REF_LIMIT: usize = 15;
const OUTGOING_REF_LIMIT: usize = 10;
const OUTGOING_STRING_CHARS: usize = 50;
/// Character budget for each neighbour's pseudocode.
pub const NEIGHBOR_CODE_BUDGET: usize = 2000;
const CODE_TOO_LONG: &str = "...(code too long)...";
const DEFAULT_DATA_PREFIXES: &[&str] = &["loc_", "byte_", "word_", "dword_", "qword_", "unk_"];
const OBJC_CLASS_MARKERS: &[&str] = &["_OBJC_CLASS_$_", "_OBJC_METACLASS_$_"];

/// How much context to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextProfile {
    /// Everything the options allow.
    Full,
    /// Strings, data and outgoing references, no neighbour pseudocode.
    #[default]
    LiteAware,
    /// Call graph only, one neighbour each way.
    Lite,
}

impl ContextProfile {
    /// Resolve command-line profile flags. `full` wins over `lite_aware`,
    /// which wins over `lite`; no flag selects lite-aware.
    pub fn from_flags(full: bool, lite_aware: bool, lite: bool) -> Self {
        if full {
            ContextProfile::Full
        } else if lite_aware {
            ContextProfile::LiteAware
        } else if lite {
            ContextProfile::Lite
        } else {
            ContextProfile::LiteAware
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextProfile::Full => "full",
            ContextProfile::LiteAware => "lite-aware",
            ContextProfile::Lite => "lite",
        }
    }
}

impl fmt::Display for ContextProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(ContextProfile::Full),
            "lite-aware" | "lite_aware" | "liteaware" => Ok(ContextProfile::LiteAware),
            "lite" => Ok(ContextProfile::Lite),
            other => Err(format!("unknown profile '{other}' (expected full, lite-aware or lite)")),
        }
    }
}

/// Caller-supplied context options. The profile is applied on top of these
/// by [`ContextOptions::effective`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub profile: ContextProfile,
    pub include_callers: bool,
    pub max_callers: usize,
    pub include_callees: bool,
    pub max_callees: usize,
    pub include_strings: bool,
    pub include_data_refs: bool,
    pub include_outgoing_refs: bool,
    pub decompile_neighbors: bool,
    pub include_assembly: bool,
    pub include_class_refs: bool,
    /// Slow fallback: look for callers through strings mentioning the name.
    pub search_string_callers: bool,
    pub important_files: Vec<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            profile: ContextProfile::default(),
            include_callers: true,
            max_callers: 5,
            include_callees: true,
            max_callees: 5,
            include_strings: true,
            include_data_refs: true,
            include_outgoing_refs: true,
            decompile_neighbors: true,
            include_assembly: false,
            include_class_refs: true,
            search_string_callers: false,
            important_files: DEFAULT_IMPORTANT_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Options after the profile has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveSettings {
    pub profile: ContextProfile,
    pub include_callers: bool,
    pub include_callees: bool,
    pub caller_limit: usize,
    pub callee_limit: usize,
    pub include_strings: bool,
    pub include_data_refs: bool,
    pub include_outgoing_refs: bool,
    pub decompile_neighbors: bool,
    pub include_assembly: bool,
    pub include_class_refs: bool,
    pub search_string_callers: bool,
}

impl ContextOptions {
    pub fn effective(&self) -> EffectiveSettings {
        let base = EffectiveSettings {
            profile: self.profile,
            include_callers: self.include_callers,
            include_callees: self.include_callees,
            caller_limit: self.max_callers,
            callee_limit: self.max_callees,
            include_strings: self.include_strings,
            include_data_refs: self.include_data_refs,
            include_outgoing_refs: self.include_outgoing_refs,
            decompile_neighbors: self.decompile_neighbors,
            include_assembly: self.include_assembly,
            include_class_refs: self.include_class_refs,
            search_string_callers: self.search_string_callers,
        };
        match self.profile {
            ContextProfile::Full => base,
            ContextProfile::LiteAware => EffectiveSettings {
                caller_limit: self.max_callers.min(5),
                callee_limit: self.max_callees.min(5),
                include_strings: true,
                include_data_refs: true,
                include_outgoing_refs: true,
                decompile_neighbors: false,
                include_assembly: false,
                include_class_refs: true,
                ..base
            },
            ContextProfile::Lite => EffectiveSettings {
                caller_limit: self.max_callers.min(1),
                callee_limit: self.max_callees.min(1),
                include_strings: false,
                include_data_refs: false,
                include_outgoing_refs: false,
                decompile_neighbors: false,
                include_assembly: false,
                include_class_refs: true,
                ..base
            },
        }
    }
}

/// A function referenced from the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub address: FunctionAddress,
    pub name: String,
}

/// A called function and how often it was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Callee {
    pub address: FunctionAddress,
    pub name: String,
    pub call_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataRef {
    pub address: u64,
    /// Meaningful (non auto-generated) name, if any.
    pub name: Option<String>,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefClass {
    Code,
    Data,
}

/// A distinct target referenced from inside the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingRef {
    pub target: u64,
    pub name: Option<String>,
    pub class: RefClass,
    pub string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyListing {
    pub owner: Neighbor,
    pub is_target: bool,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRefGroup {
    pub owner: Neighbor,
    pub is_target: bool,
    /// (class name, referencing instruction address)
    pub classes: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborCode {
    pub function: Neighbor,
    pub call_count: Option<u32>,
    /// `None` when decompilation failed.
    pub code: Option<String>,
}

/// Everything collected about one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextDigest {
    pub function: Neighbor,
    pub size: u64,
    pub settings: EffectiveSettings,
    pub callers: Vec<Neighbor>,
    /// Whether the slow string search ran (and found nothing).
    pub string_search_empty: bool,
    /// Most frequently discovered first.
    pub callees: Vec<Callee>,
    pub strings: Vec<String>,
    pub data_refs: Vec<DataRef>,
    pub outgoing: Vec<OutgoingRef>,
    pub assembly: Vec<AssemblyListing>,
    pub class_refs: Vec<ClassRefGroup>,
    pub caller_code: Vec<NeighborCode>,
    pub callee_code: Vec<NeighborCode>,
}

fn soft<T: Default>(result: OracleResult<T>, what: &str, func: FunctionAddress) -> T {
    result.unwrap_or_else(|err| {
        warn!(function = %func, error = %err, "context collection skipped {what}");
        T::default()
    })
}

fn display_name(oracle: &dyn SymbolOracle, info: &FunctionInfo) -> String {
    if info.name.is_empty() {
        oracle.name_at(info.address.0).unwrap_or_else(|| info.address.default_name())
    } else {
        info.name.clone()
    }
}

fn neighbor(oracle: &dyn SymbolOracle, info: &FunctionInfo) -> Neighbor {
    Neighbor { address: info.address, name: display_name(oracle, info) }
}

/// Collects distinct callees in first-discovery order with hit counts.
#[derive(Default)]
struct CalleeTally {
    order: Vec<FunctionAddress>,
    counts: HashMap<FunctionAddress, u32>,
    names: HashMap<FunctionAddress, String>,
}

impl CalleeTally {
    fn hit(&mut self, oracle: &dyn SymbolOracle, info: &FunctionInfo) {
        let count = self.counts.entry(info.address).or_insert(0);
        if *count == 0 {
            self.order.push(info.address);
            self.names.insert(info.address, display_name(oracle, info));
        }
        *count += 1;
    }

    fn into_callees(mut self) -> Vec<Callee> {
        self.order
            .into_iter()
            .map(|address| Callee {
                address,
                name: self.names.remove(&address).unwrap_or_else(|| address.default_name()),
                call_count: self.counts.get(&address).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// Find the functions `func` calls, in discovery order.
///
/// Three passes feed one tally: operands of call instructions, control-flow
/// successors leaving the function, and code references from any
/// instruction. The first pass may record the function itself (recursion);
/// the other two skip it.
pub fn discover_callees(oracle: &dyn SymbolOracle, func: &FunctionInfo) -> Vec<Callee> {
    let mut tally = CalleeTally::default();
    let instructions = soft(oracle.instructions(func.address), "instructions", func.address);

    for insn in instructions.iter().filter(|insn| insn.is_call) {
        for operand in &insn.operands {
            let target = match operand {
                Operand::Near(target) | Operand::Far(target) => oracle.function_containing(*target),
                Operand::Mem(target) if *target != 0 => oracle.function(*target),
                _ => continue,
            };
            if let Some(target) = target {
                tally.hit(oracle, &target);
                break;
            }
        }
    }

    for block in soft(oracle.basic_blocks(func.address), "basic blocks", func.address) {
        for succ in block.successors {
            if func.contains(succ) {
                continue;
            }
            if let Some(target) = oracle.function_containing(succ) {
                if target.address != func.address {
                    tally.hit(oracle, &target);
                }
            }
        }
    }

    for insn in &instructions {
        for xref in oracle.xrefs_from(insn.address) {
            if !xref.kind.is_code() {
                continue;
            }
            if let Some(target) = oracle.function_containing(xref.to) {
                if target.address != func.address {
                    tally.hit(oracle, &target);
                }
            }
        }
    }

    tally.into_callees()
}

/// Functions with a call instruction that directly targets `entry`.
pub fn discover_callers(oracle: &dyn SymbolOracle, entry: FunctionAddress) -> Vec<Neighbor> {
    let mut seen = HashSet::new();
    let mut callers = Vec::new();
    for xref in oracle.xrefs_to(entry.0) {
        if !xref.kind.is_call() {
            continue;
        }
        let Some(insn) = oracle.instruction_at(xref.from) else { continue };
        if !insn.is_call {
            continue;
        }
        if let Some(caller) = oracle.function_containing(xref.from) {
            if seen.insert(caller.address) {
                callers.push(neighbor(oracle, &caller));
            }
        }
    }
    callers
}

/// Slow caller search: functions referencing a string that mentions `name`.
fn string_callers(oracle: &dyn SymbolOracle, func: &FunctionInfo, name: &str) -> Vec<Neighbor> {
    let mut callers = Vec::new();
    for other in oracle.functions() {
        if other.address == func.address {
            continue;
        }
        let instructions = soft(oracle.instructions(other.address), "instructions", other.address);
        let mentions = instructions.iter().any(|insn| {
            oracle
                .xrefs_from(insn.address)
                .iter()
                .any(|x| oracle.string_at(x.to).map_or(false, |s| s.contains(name)))
        });
        if mentions {
            callers.push(neighbor(oracle, &other));
        }
    }
    callers
}

fn sort_by_frequency(mut callees: Vec<Callee>) -> Vec<Callee> {
    // Stable: ties keep discovery order.
    callees.sort_by(|a, b| b.call_count.cmp(&a.call_count));
    callees
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

/// Shorten neighbour pseudocode to `budget` characters, keeping head and tail.
fn shorten_code(code: &str, budget: usize) -> String {
    let total = code.chars().count();
    if total <= budget {
        return code.to_string();
    }
    let keep = budget.saturating_sub(CODE_TOO_LONG.len()) / 2;
    let head: String = code.chars().take(keep).collect();
    let tail: String = code.chars().skip(total - keep).collect();
    format!("{head}\n{CODE_TOO_LONG}\n{tail}")
}

fn collect_strings(
    oracle: &dyn SymbolOracle,
    instructions: &[crate::oracle::Instruction],
    important_files: &[String],
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for insn in instructions {
        for xref in oracle.xrefs_from(insn.address) {
            let Some(content) = oracle.string_at(xref.to) else { continue };
            if !seen.insert(xref.to) {
                continue;
            }
            let important = important_files.iter().any(|f| content.contains(f.as_str()));
            if important {
                out.push(format!("{IMPORTANT_FILE_PREFIX}{content}"));
            } else {
                out.push(content);
            }
        }
    }
    out
}

fn meaningful_name(name: Option<String>) -> Option<String> {
    name.filter(|n| !n.is_empty() && !DEFAULT_DATA_PREFIXES.iter().any(|p| n.starts_with(p)))
}

fn collect_data_refs(
    oracle: &dyn SymbolOracle,
    instructions: &[crate::oracle::Instruction],
) -> Vec<DataRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for insn in instructions {
        for xref in oracle.xrefs_from(insn.address) {
            let target = xref.to;
            if oracle.string_at(target).is_some() || oracle.is_code(target) {
                continue;
            }
            if !seen.insert(target) {
                continue;
            }
            let name = meaningful_name(oracle.name_at(target));
            let type_name = oracle
                .type_at(target)
                .filter(|t| !t.is_empty() && t != "void" && t != "unknown");
            if name.is_some() || type_name.is_some() {
                out.push(DataRef { address: target, name, type_name });
            }
        }
    }
    out
}

fn collect_outgoing(
    oracle: &dyn SymbolOracle,
    func: &FunctionInfo,
    instructions: &[crate::oracle::Instruction],
) -> Vec<OutgoingRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for insn in instructions {
        for xref in oracle.xrefs_from(insn.address) {
            if func.contains(xref.to) || !seen.insert(xref.to) {
                continue;
            }
            let class = if xref.kind.is_code() { RefClass::Code } else { RefClass::Data };
            let string = match class {
                RefClass::Data => oracle.string_at(xref.to),
                RefClass::Code => None,
            };
            out.push(OutgoingRef { target: xref.to, name: oracle.name_at(xref.to), class, string });
        }
    }
    out
}

fn assembly_lines(oracle: &dyn SymbolOracle, func: FunctionAddress) -> Vec<String> {
    soft(oracle.instructions(func), "assembly", func)
        .into_iter()
        .map(|insn| format!("0x{:x}: {}", insn.address, insn.disasm))
        .collect()
}

fn class_refs(oracle: &dyn SymbolOracle, func: FunctionAddress) -> Vec<(String, u64)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for insn in soft(oracle.instructions(func), "class references", func) {
        for xref in oracle.xrefs_from(insn.address) {
            let Some(name) = oracle.name_at(xref.to) else { continue };
            let Some(class) = OBJC_CLASS_MARKERS
                .iter()
                .find_map(|marker| name.find(marker).map(|i| name[i + marker.len()..].to_string()))
            else {
                continue;
            };
            if !class.is_empty() && seen.insert(class.clone()) {
                out.push((class, insn.address));
            }
        }
    }
    out
}

fn neighbor_code(
    oracle: &dyn SymbolOracle,
    function: Neighbor,
    call_count: Option<u32>,
) -> NeighborCode {
    let code = match oracle.decompile(function.address) {
        Ok(code) => Some(shorten_code(&code, NEIGHBOR_CODE_BUDGET)),
        Err(err) => {
            debug!(function = %function.address, error = %err, "neighbour decompilation failed");
            None
        }
    };
    NeighborCode { function, call_count, code }
}

/// Build the context digest for the function at (or containing) `address`.
///
/// Fails only when no function can be resolved; every other oracle failure
/// empties the affected section and is logged.
pub fn build_context(
    oracle: &dyn SymbolOracle,
    address: FunctionAddress,
    options: &ContextOptions,
) -> OracleResult<ContextDigest> {
    let func = oracle
        .function(address.0)
        .or_else(|| oracle.function_containing(address.0))
        .ok_or(OracleError::NoFunction(address.0))?;
    let settings = options.effective();
    let target = neighbor(oracle, &func);
    let instructions = soft(oracle.instructions(func.address), "instructions", func.address);

    let mut callers = Vec::new();
    let mut string_search_empty = false;
    if settings.include_callers {
        callers = discover_callers(oracle, func.address);
        if callers.is_empty() && settings.search_string_callers {
            callers = string_callers(oracle, &func, &target.name);
            string_search_empty = callers.is_empty();
        }
    }

    let callees = if settings.include_callees {
        sort_by_frequency(discover_callees(oracle, &func))
    } else {
        Vec::new()
    };

    let strings = if settings.include_strings {
        collect_strings(oracle, &instructions, &options.important_files)
    } else {
        Vec::new()
    };
    let data_refs =
        if settings.include_data_refs { collect_data_refs(oracle, &instructions) } else { Vec::new() };
    let outgoing = if settings.include_outgoing_refs {
        collect_outgoing(oracle, &func, &instructions)
    } else {
        Vec::new()
    };

    let listed_callers: Vec<Neighbor> =
        callers.iter().take(settings.caller_limit).cloned().collect();

    let mut assembly = Vec::new();
    if settings.include_assembly {
        assembly.push(AssemblyListing {
            owner: target.clone(),
            is_target: true,
            lines: assembly_lines(oracle, func.address),
        });
        for caller in &listed_callers {
            assembly.push(AssemblyListing {
                owner: caller.clone(),
                is_target: false,
                lines: assembly_lines(oracle, caller.address),
            });
        }
    }

    let mut class_groups = Vec::new();
    if settings.include_class_refs {
        let own = class_refs(oracle, func.address);
        if !own.is_empty() {
            class_groups.push(ClassRefGroup { owner: target.clone(), is_target: true, classes: own });
        }
        for caller in &listed_callers {
            let classes = class_refs(oracle, caller.address);
            if !classes.is_empty() {
                class_groups.push(ClassRefGroup { owner: caller.clone(), is_target: false, classes });
            }
        }
    }

    let mut caller_code = Vec::new();
    let mut callee_code = Vec::new();
    if settings.decompile_neighbors {
        caller_code = listed_callers.iter().map(|c| neighbor_code(oracle, c.clone(), None)).collect();
        callee_code = callees
            .iter()
            .take(settings.callee_limit)
            .map(|c| {
                neighbor_code(
                    oracle,
                    Neighbor { address: c.address, name: c.name.clone() },
                    Some(c.call_count),
                )
            })
            .collect();
    }

    debug!(
        function = %func.address,
        callers = callers.len(),
        callees = callees.len(),
        strings = strings.len(),
        data_refs = data_refs.len(),
        outgoing = outgoing.len(),
        "collected context"
    );

    Ok(ContextDigest {
        function: target,
        size: func.size(),
        settings,
        callers,
        string_search_empty,
        callees,
        strings,
        data_refs,
        outgoing,
        assembly,
        class_refs: class_groups,
        caller_code,
        callee_code,
    })
}

fn times(count: u32) -> String {
    if count == 1 {
        "once".to_string()
    } else {
        format!("{count} times")
    }
}

impl ContextDigest {
    /// Render the digest as the text block embedded in prompts.
    pub fn render(&self) -> String {
        let s = &self.settings;
        let mut out = format!(
            "Function: {} at {}\nSize: {} bytes\n\n",
            self.function.name, self.function.address, self.size
        );

        if s.include_callers {
            if self.callers.is_empty() {
                out.push_str("This function has no callers found by standard xrefs.\n");
                if self.string_search_empty {
                    out.push_str("(Enhanced string search for callers also yielded no results).\n");
                }
            } else {
                out.push_str("Called by:\n");
                for caller in self.callers.iter().take(s.caller_limit) {
                    out.push_str(&format!("- {} ({})\n", caller.name, caller.address));
                }
                if self.callers.len() > s.caller_limit {
                    out.push_str(&format!(
                        "  ... and {} more caller functions\n",
                        self.callers.len() - s.caller_limit
                    ));
                }
            }
            out.push('\n');
        }

        if s.include_callees {
            if self.callees.is_empty() {
                out.push_str("This function doesn't call any other functions.\n");
            } else {
                out.push_str("Calls:\n");
                for callee in self.callees.iter().take(s.callee_limit) {
                    out.push_str(&format!(
                        "- {} ({}) - called {}\n",
                        callee.name,
                        callee.address,
                        times(callee.call_count)
                    ));
                }
                if self.callees.len() > s.callee_limit {
                    out.push_str(&format!(
                        "  ... and {} more called functions\n",
                        self.callees.len() - s.callee_limit
                    ));
                }
            }
            out.push('\n');
        }

        if !self.strings.is_empty() {
            out.push_str("String references:\n");
            for string in self.strings.iter().take(STRING_LIMIT) {
                out.push_str(&format!("- \"{}\"\n", truncate_chars(string, STRING_CHARS)));
            }
            if self.strings.len() > STRING_LIMIT {
                out.push_str(&format!(
                    "  ... and {} more string references\n",
                    self.strings.len() - STRING_LIMIT
                ));
            }
            out.push('\n');
        }

        if !self.data_refs.is_empty() {
            out.push_str("Data references:\n");
            for data in self.data_refs.iter().take(DATA_REF_LIMIT) {
                let line = match (&data.name, &data.type_name) {
                    (Some(name), Some(ty)) => format!("{name} (Type: {ty}) @ 0x{:x}", data.address),
                    (Some(name), None) => format!("{name} @ 0x{:x}", data.address),
                    (None, Some(ty)) => format!("Unnamed_data_0x{:x} (Type: {ty})", data.address),
                    (None, None) => format!("Unnamed_data_0x{:x}", data.address),
                };
                out.push_str(&format!("- {line}\n"));
            }
            if self.data_refs.len() > DATA_REF_LIMIT {
                out.push_str(&format!(
                    "  ... and {} more data references\n",
                    self.data_refs.len() - DATA_REF_LIMIT
                ));
            }
            out.push('\n');
        }

        let code_refs: Vec<&OutgoingRef> =
            self.outgoing.iter().filter(|r| r.class == RefClass::Code).collect();
        let data_out: Vec<&OutgoingRef> =
            self.outgoing.iter().filter(|r| r.class == RefClass::Data).collect();
        if !code_refs.is_empty() {
            out.push_str(&format!("Code references FROM this function (first {OUTGOING_REF_LIMIT}):\n"));
            for r in code_refs.iter().take(OUTGOING_REF_LIMIT) {
                out.push_str(&format!("- {} (0x{:x})\n", outgoing_name(r), r.target));
            }
            if code_refs.len() > OUTGOING_REF_LIMIT {
                out.push_str(&format!(
                    "  ... and {} more code references FROM this function\n",
                    code_refs.len() - OUTGOING_REF_LIMIT
                ));
            }
            out.push('\n');
        }
        if !data_out.is_empty() {
            out.push_str(&format!(
                "Data/String references FROM this function (first {OUTGOING_REF_LIMIT}):\n"
            ));
            for r in data_out.iter().take(OUTGOING_REF_LIMIT) {
                match &r.string {
                    Some(content) => out.push_str(&format!(
                        "- {} (0x{:x}): \"{}\"\n",
                        outgoing_name(r),
                        r.target,
                        truncate_chars(content, OUTGOING_STRING_CHARS)
                    )),
                    None => out.push_str(&format!("- {} (0x{:x})\n", outgoing_name(r), r.target)),
                }
            }
            if data_out.len() > OUTGOING_REF_LIMIT {
                out.push_str(&format!(
                    "  ... and {} more data/string references FROM this function\n",
                    data_out.len() - OUTGOING_REF_LIMIT
                ));
            }
            out.push('\n');
        }

        for listing in &self.assembly {
            if listing.is_target {
                out.push_str("Assembly code for this function:\n");
            } else {
                out.push_str(&format!(
                    "Assembly for caller {} ({}):\n",
                    listing.owner.name, listing.owner.address
                ));
            }
            for line in &listing.lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }

        for group in &self.class_refs {
            if group.is_target {
                out.push_str("Objective-C Class References in this function:\n");
            } else {
                out.push_str(&format!(
                    "Objective-C Class References in caller {} ({}):\n",
                    group.owner.name, group.owner.address
                ));
            }
            for (class, at) in &group.classes {
                out.push_str(&format!("- {class} (0x{at:x})\n"));
            }
            out.push('\n');
        }

        if !self.caller_code.is_empty() {
            out.push_str("\nDecompiled code of functions that call this function:\n");
            for entry in &self.caller_code {
                render_neighbor_code(&mut out, "Caller", entry);
            }
        }

        if !self.callee_code.is_empty() {
            out.push_str("\nDecompiled code of called functions (most frequent first):\n");
            for entry in &self.callee_code {
                render_neighbor_code(&mut out, "Callee", entry);
            }
            if self.callees.len() > self.callee_code.len() {
                out.push_str(&format!(
                    "\n(Showing decompilation for {} out of {} called functions)\n",
                    self.callee_code.len(),
                    self.callees.len()
                ));
            }
        }

        if !s.decompile_neighbors && s.profile != ContextProfile::Full {
            out.push_str(
                "\n(Decompilation of neighboring functions was skipped for speed based on current mode).\n",
            );
        }

        out
    }
}

fn outgoing_name(r: &OutgoingRef) -> String {
    r.name.clone().unwrap_or_else(|| format!("unnamed_0x{:x}", r.target))
}

fn render_neighbor_code(out: &mut String, role: &str, entry: &NeighborCode) {
    let f = &entry.function;
    let count = match entry.call_count {
        Some(n) => format!(" (called {})", times(n)),
        None => String::new(),
    };
    match &entry.code {
        Some(code) => out.push_str(&format!(
            "\n--- {role}: {} ({}){count} ---\n{code}\n--- End of {} ---\n",
            f.name, f.address, f.name
        )),
        None => out.push_str(&format!(
            "\n--- {role}: {} ({}){count} (decompilation failed) ---\n",
            f.name, f.address
        )),
    }
}

impl fmt::Display for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
