//! Binary importer built on goblin (container parsing) and capstone
//! (disassembly). Produces everything a snapshot carries except pseudocode.

use std::collections::{BTreeSet, HashSet};

use capstone::arch::{self, ArchOperand};
use capstone::{prelude::*, Capstone, InsnGroupId, InsnGroupType};
use goblin::{elf, mach, pe, Object};
use tracing::{debug, info};

use super::{read_input, sha256_hex, ImportError, ImportRequest, ProgramImporter};
use crate::model::FunctionAddress;
use crate::oracle::{
    BasicBlock, DataName, Instruction, Operand, ProgramSnapshot, SegmentRecord, SnapshotBinary,
    SnapshotFunction, StringLiteral, Xref, XrefKind,
};

const DEFAULT_MAX_INSTRUCTIONS: usize = 4096;
const MIN_STRING_LEN: usize = 4;
const MAX_STRINGS: usize = 4096;

pub struct CapstoneImporter;

#[derive(Debug, Clone)]
struct SymbolInfo {
    name: String,
    address: u64,
    size: Option<u64>,
    section: Option<usize>,
}

#[derive(Debug, Clone)]
struct SectionRange {
    name: String,
    start: u64,
    end: u64,
    file_offset: Option<usize>,
    executable: bool,
}

impl SectionRange {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// File slice for `[addr, addr + len)`, clipped to the section and file.
    fn file_slice<'a>(&self, bytes: &'a [u8], addr: u64, len: Option<u64>) -> Option<&'a [u8]> {
        if !self.contains(addr) {
            return None;
        }
        let offset = self.file_offset?;
        let available = self.end - addr;
        let len = len.unwrap_or(available).min(available);
        let start = offset.checked_add(usize::try_from(addr - self.start).ok()?)?;
        let end = start.saturating_add(usize::try_from(len).ok()?).min(bytes.len());
        (start < end).then(|| &bytes[start..end])
    }
}

struct Container {
    arch: Option<String>,
    is_64bit: bool,
    sections: Vec<SectionRange>,
    symbols: Vec<SymbolInfo>,
    data_names: Vec<DataName>,
}

fn arch_from_elf(machine: u16) -> Option<String> {
    match machine {
        elf::header::EM_X86_64 => Some("x86_64".into()),
        elf::header::EM_386 => Some("x86".into()),
        elf::header::EM_AARCH64 => Some("arm64".into()),
        elf::header::EM_ARM => Some("arm".into()),
        _ => None,
    }
}

fn arch_from_pe(machine: u16) -> Option<String> {
    match machine {
        pe::header::COFF_MACHINE_X86 => Some("x86".into()),
        pe::header::COFF_MACHINE_X86_64 => Some("x86_64".into()),
        pe::header::COFF_MACHINE_ARM => Some("arm".into()),
        pe::header::COFF_MACHINE_ARM64 => Some("arm64".into()),
        _ => None,
    }
}

fn arch_from_mach(cputype: u32) -> Option<String> {
    match cputype {
        mach::cputype::CPU_TYPE_X86 => Some("x86".into()),
        mach::cputype::CPU_TYPE_X86_64 => Some("x86_64".into()),
        mach::cputype::CPU_TYPE_ARM => Some("arm".into()),
        mach::cputype::CPU_TYPE_ARM64 => Some("arm64".into()),
        _ => None,
    }
}

fn is_64bit_arch(arch: &str) -> bool {
    matches!(arch, "x86_64" | "amd64" | "arm64" | "aarch64")
}

fn make_cs(arch: &str) -> Result<Capstone, ImportError> {
    let built = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        "x86" | "i386" => Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build(),
        "arm" | "armv7" => Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build(),
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
        other => return Err(ImportError::Backend(format!("unsupported architecture: {other}"))),
    };
    built.map_err(|e| ImportError::Backend(format!("capstone init failed for {arch}: {e}")))
}

fn elf_container(elf: &elf::Elf) -> Container {
    let sections: Vec<SectionRange> = elf
        .section_headers
        .iter()
        .map(|sh| SectionRange {
            name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
            start: sh.sh_addr,
            end: sh.sh_addr.saturating_add(sh.sh_size),
            file_offset: (sh.sh_type != elf::section_header::SHT_NOBITS)
                .then_some(sh.sh_offset as usize),
            executable: sh.is_executable(),
        })
        .collect();

    let mut symbols = Vec::new();
    let mut data_names = Vec::new();
    for sym in &elf.syms {
        if sym.st_shndx == elf::section_header::SHN_UNDEF as usize {
            continue;
        }
        let name = elf.strtab.get_at(sym.st_name).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        if sym.is_function() {
            symbols.push(SymbolInfo {
                name: name.to_string(),
                address: sym.st_value,
                size: (sym.st_size > 0).then_some(sym.st_size),
                section: Some(sym.st_shndx),
            });
        } else if sym.st_type() == elf::sym::STT_OBJECT {
            data_names.push(DataName { address: sym.st_value, name: name.to_string() });
        }
    }

    Container {
        arch: arch_from_elf(elf.header.e_machine),
        is_64bit: elf.is_64,
        sections,
        symbols,
        data_names,
    }
}

fn pe_container(pe: &pe::PE) -> Container {
    let sections: Vec<SectionRange> = pe
        .sections
        .iter()
        .map(|sec| {
            let size = if sec.virtual_size == 0 { sec.size_of_raw_data } else { sec.virtual_size };
            SectionRange {
                name: sec.name().unwrap_or_default().to_string(),
                start: u64::from(sec.virtual_address),
                end: u64::from(sec.virtual_address) + u64::from(size),
                file_offset: (sec.size_of_raw_data > 0)
                    .then_some(sec.pointer_to_raw_data as usize),
                executable: sec.characteristics & pe::section_table::IMAGE_SCN_MEM_EXECUTE != 0,
            }
        })
        .collect();

    let symbols = pe
        .exports
        .iter()
        .filter(|exp| exp.rva != 0)
        .filter_map(|exp| {
            let name = exp.name.unwrap_or_default();
            (!name.is_empty()).then(|| SymbolInfo {
                name: name.to_string(),
                address: exp.rva as u64,
                size: None,
                section: None,
            })
        })
        .collect();

    Container {
        arch: arch_from_pe(pe.header.coff_header.machine),
        is_64bit: pe.is_64,
        sections,
        symbols,
        data_names: Vec::new(),
    }
}

fn mach_container(bin: &mach::MachO) -> Container {
    let sections: Vec<SectionRange> = bin
        .segments
        .sections()
        .flatten()
        .filter_map(Result::ok)
        .map(|(sec, _)| {
            let segment = sec.segname().unwrap_or("");
            let name = sec.name().unwrap_or("");
            SectionRange {
                name: format!("{segment},{name}"),
                start: sec.addr,
                end: sec.addr.saturating_add(sec.size),
                file_offset: (sec.offset > 0).then_some(sec.offset as usize),
                executable: matches!(name, "__text" | "__stubs" | "__stub_helper"),
            }
        })
        .collect();

    let mut symbols = Vec::new();
    for sym in bin.symbols() {
        let Ok((name, nlist)) = sym else { continue };
        if nlist.is_undefined() || nlist.n_sect == 0 {
            continue;
        }
        let name = name.trim_start_matches('_');
        if name.is_empty() {
            continue;
        }
        let address = nlist.n_value;
        if sections.iter().any(|s| s.executable && s.contains(address)) {
            symbols.push(SymbolInfo { name: name.to_string(), address, size: None, section: None });
        }
    }

    Container {
        arch: arch_from_mach(bin.header.cputype()),
        is_64bit: bin.is_64,
        sections,
        symbols,
        data_names: Vec::new(),
    }
}

fn parse_container(bytes: &[u8]) -> Option<Container> {
    match Object::parse(bytes) {
        Ok(Object::Elf(elf)) => Some(elf_container(&elf)),
        Ok(Object::PE(pe)) => Some(pe_container(&pe)),
        Ok(Object::Mach(mach::Mach::Binary(bin))) => Some(mach_container(&bin)),
        _ => None,
    }
}

/// One decoded instruction plus the control-flow facts block building needs.
struct Decoded {
    insn: Instruction,
    is_jump: bool,
    is_ret: bool,
    conditional: bool,
    target: Option<u64>,
}

fn has_group(detail: &capstone::InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

fn map_operands(cs: &Capstone, detail: &capstone::InsnDetail, next: u64, flow: bool) -> Vec<Operand> {
    let mut operands = Vec::new();
    for op in detail.arch_detail().operands() {
        let mapped = match op {
            ArchOperand::X86Operand(op) => match op.op_type {
                arch::x86::X86OperandType::Imm(imm) if flow => Some(Operand::Near(imm as u64)),
                arch::x86::X86OperandType::Imm(imm) => Some(Operand::Imm(imm as u64)),
                arch::x86::X86OperandType::Reg(reg) => cs.reg_name(reg).map(Operand::Reg),
                arch::x86::X86OperandType::Mem(mem) => {
                    let base = cs.reg_name(mem.base());
                    if base.as_deref() == Some("rip") {
                        Some(Operand::Mem(next.wrapping_add(mem.disp() as u64)))
                    } else if mem.base().0 == 0 && mem.index().0 == 0 {
                        Some(Operand::Mem(mem.disp() as u64))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            ArchOperand::ArmOperand(op) => match op.op_type {
                arch::arm::ArmOperandType::Imm(imm) if flow => Some(Operand::Near(imm as u32 as u64)),
                arch::arm::ArmOperandType::Imm(imm) => Some(Operand::Imm(imm as u32 as u64)),
                arch::arm::ArmOperandType::Reg(reg) => cs.reg_name(reg).map(Operand::Reg),
                _ => None,
            },
            ArchOperand::Arm64Operand(op) => match op.op_type {
                arch::arm64::Arm64OperandType::Imm(imm) if flow => Some(Operand::Near(imm as u64)),
                arch::arm64::Arm64OperandType::Imm(imm) => Some(Operand::Imm(imm as u64)),
                arch::arm64::Arm64OperandType::Reg(reg) => cs.reg_name(reg).map(Operand::Reg),
                _ => None,
            },
            _ => None,
        };
        if let Some(mapped) = mapped {
            operands.push(mapped);
        }
    }
    operands
}

fn is_unconditional(mnemonic: &str) -> bool {
    matches!(mnemonic, "jmp" | "b" | "br" | "bx" | "jr")
}

fn disassemble(cs: &Capstone, code: &[u8], address: u64, max: usize) -> Vec<Decoded> {
    let Ok(insns) = cs.disasm_count(code, address, max.max(1)) else {
        return Vec::new();
    };
    let mut decoded = Vec::with_capacity(insns.len());
    for i in insns.iter() {
        let size = i.bytes().len() as u32;
        let next = i.address().wrapping_add(u64::from(size));
        let mnemonic = i.mnemonic().unwrap_or("").to_lowercase();
        let disasm = format!("{} {}", mnemonic, i.op_str().unwrap_or("")).trim().to_string();

        let (is_call, is_jump, is_ret, operands) = match cs.insn_detail(i) {
            Ok(detail) => {
                let is_call = has_group(&detail, InsnGroupType::CS_GRP_CALL as u8);
                let is_jump = has_group(&detail, InsnGroupType::CS_GRP_JUMP as u8);
                let is_ret = has_group(&detail, InsnGroupType::CS_GRP_RET as u8);
                let operands = map_operands(cs, &detail, next, is_call || is_jump);
                (is_call, is_jump, is_ret, operands)
            }
            Err(_) => (false, false, false, Vec::new()),
        };
        let target = if is_call || is_jump {
            operands.iter().find_map(|op| match op {
                Operand::Near(t) => Some(*t),
                _ => None,
            })
        } else {
            None
        };

        decoded.push(Decoded {
            insn: Instruction { address: i.address(), size, disasm, is_call, operands },
            is_jump,
            is_ret,
            conditional: is_jump && !is_unconditional(&mnemonic),
            target,
        });
    }
    decoded
}

/// Split a function's instructions into basic blocks at jump targets and
/// after every jump or return.
fn build_blocks(decoded: &[Decoded], start: u64, end: u64) -> Vec<BasicBlock> {
    let Some(first) = decoded.first() else {
        return Vec::new();
    };
    let mut leaders = BTreeSet::from([first.insn.address]);
    for (idx, d) in decoded.iter().enumerate() {
        if d.is_jump {
            if let Some(t) = d.target.filter(|t| *t >= start && *t < end) {
                leaders.insert(t);
            }
        }
        if d.is_jump || d.is_ret {
            if let Some(next) = decoded.get(idx + 1) {
                leaders.insert(next.insn.address);
            }
        }
    }

    let mut blocks = Vec::new();
    let mut block_start = first.insn.address;
    for (idx, d) in decoded.iter().enumerate() {
        let next = decoded.get(idx + 1);
        let closes = next.map_or(true, |n| leaders.contains(&n.insn.address));
        if !closes {
            continue;
        }
        let mut successors = Vec::new();
        if d.is_jump {
            if let Some(t) = d.target.filter(|t| *t >= start && *t < end) {
                successors.push(t);
            }
        }
        if !d.is_ret && (!d.is_jump || d.conditional) {
            if let Some(n) = next {
                if !successors.contains(&n.insn.address) {
                    successors.push(n.insn.address);
                }
            }
        }
        let block_end = d.insn.address + u64::from(d.insn.size);
        blocks.push(BasicBlock { start: block_start, end: block_end, successors });
        if let Some(n) = next {
            block_start = n.insn.address;
        }
    }
    blocks
}

fn code_xrefs(decoded: &[Decoded]) -> Vec<Xref> {
    decoded
        .iter()
        .filter_map(|d| {
            let to = d.target?;
            let kind = if d.insn.is_call { XrefKind::CallNear } else { XrefKind::JumpNear };
            Some(Xref { from: d.insn.address, to, kind })
        })
        .collect()
}

fn data_xrefs(decoded: &[Decoded], sections: &[SectionRange]) -> Vec<Xref> {
    let in_data = |addr: u64| sections.iter().any(|s| !s.executable && s.start > 0 && s.contains(addr));
    let mut xrefs = Vec::new();
    for d in decoded {
        for op in &d.insn.operands {
            let (to, kind) = match op {
                Operand::Imm(a) => (*a, XrefKind::DataOffset),
                Operand::Mem(a) => (*a, XrefKind::DataRead),
                _ => continue,
            };
            if in_data(to) {
                xrefs.push(Xref { from: d.insn.address, to, kind });
            }
        }
    }
    xrefs
}

fn is_string_section(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["rodata", "cstring", "rdata", ".data", "__const"].iter().any(|needle| lower.contains(needle))
}

/// NUL-terminated printable runs of at least [`MIN_STRING_LEN`] bytes.
fn collect_strings(bytes: &[u8], sections: &[SectionRange]) -> Vec<StringLiteral> {
    let mut strings = Vec::new();
    for sec in sections.iter().filter(|s| !s.executable && is_string_section(&s.name)) {
        let Some(data) = sec.file_slice(bytes, sec.start, None) else { continue };
        let mut run_start = None;
        for (idx, &b) in data.iter().enumerate() {
            let printable = (0x20..0x7f).contains(&b) || b == b'\t' || b == b'\n';
            match (printable, run_start) {
                (true, None) => run_start = Some(idx),
                (true, Some(_)) => {}
                (false, Some(start)) => {
                    if b == 0 && idx - start >= MIN_STRING_LEN {
                        let content = String::from_utf8_lossy(&data[start..idx]).into_owned();
                        strings.push(StringLiteral { address: sec.start + start as u64, content });
                        if strings.len() >= MAX_STRINGS {
                            return strings;
                        }
                    }
                    run_start = None;
                }
                (false, None) => {}
            }
        }
    }
    strings
}

/// Fill in missing symbol sizes from the next symbol or the section end and
/// drop duplicate addresses.
fn normalize_symbols(mut symbols: Vec<SymbolInfo>, sections: &[SectionRange]) -> Vec<SymbolInfo> {
    symbols.sort_by_key(|s| s.address);
    let mut seen = HashSet::new();
    symbols.retain(|s| seen.insert(s.address));
    let starts: Vec<u64> = symbols.iter().map(|s| s.address).collect();
    for (idx, sym) in symbols.iter_mut().enumerate() {
        if sym.size.is_some() {
            continue;
        }
        let section_end = section_for(sym, sections).map(|s| s.end);
        let next = starts.get(idx + 1).copied();
        let end = match (next, section_end) {
            (Some(n), Some(e)) => Some(n.min(e)),
            (n, e) => n.or(e),
        };
        sym.size = end.map(|e| e.saturating_sub(sym.address)).filter(|s| *s > 0);
    }
    symbols
}

fn section_for<'a>(sym: &SymbolInfo, sections: &'a [SectionRange]) -> Option<&'a SectionRange> {
    match sym.section {
        Some(index) => sections.get(index),
        None => sections.iter().find(|s| s.executable && s.contains(sym.address)),
    }
}

impl ProgramImporter for CapstoneImporter {
    fn name(&self) -> &'static str {
        "capstone"
    }

    fn import(&self, request: &ImportRequest) -> Result<ProgramSnapshot, ImportError> {
        let bytes = read_input(&request.path)?;
        let container = parse_container(&bytes);
        let arch = request
            .arch
            .as_deref()
            .map(str::to_lowercase)
            .or_else(|| container.as_ref().and_then(|c| c.arch.clone()))
            .unwrap_or_else(|| "x86_64".to_string());
        let cs = make_cs(&arch)?;
        let (major, minor) = Capstone::lib_version();
        debug!(arch = %arch, capstone = %format!("{major}.{minor}"), "disassembler ready");

        let max = request.max_instructions.unwrap_or(DEFAULT_MAX_INSTRUCTIONS);
        let Container { is_64bit, sections, symbols, data_names, .. } =
            container.unwrap_or_else(|| Container {
                arch: None,
                is_64bit: is_64bit_arch(&arch),
                sections: Vec::new(),
                symbols: Vec::new(),
                data_names: Vec::new(),
            });

        let mut functions = Vec::new();
        let mut xrefs = Vec::new();
        for sym in normalize_symbols(symbols, &sections) {
            let Some(code) = section_for(&sym, &sections)
                .and_then(|sec| sec.file_slice(&bytes, sym.address, sym.size))
            else {
                debug!(symbol = %sym.name, "no file bytes for symbol");
                continue;
            };
            functions.push(lift_function(&cs, code, sym.address, sym.name, max, &sections, &mut xrefs));
        }

        if functions.is_empty() {
            // No usable symbols: treat the first executable section (or the
            // whole file) as one function.
            let fallback = sections
                .iter()
                .find(|s| s.executable)
                .and_then(|s| s.file_slice(&bytes, s.start, None).map(|code| (s.start, code)))
                .unwrap_or((0, &bytes[..]));
            let (address, code) = fallback;
            if !code.is_empty() {
                let name = FunctionAddress(address).default_name();
                functions.push(lift_function(&cs, code, address, name, max, &sections, &mut xrefs));
            }
        }

        let strings = collect_strings(&bytes, &sections);
        let filename = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(
            path = %request.path.display(),
            functions = functions.len(),
            xrefs = xrefs.len(),
            strings = strings.len(),
            "imported binary"
        );

        Ok(ProgramSnapshot {
            binary: SnapshotBinary {
                filename,
                processor: arch,
                is_64bit,
                sha256: Some(sha256_hex(&bytes)),
                imported_at: Some(chrono::Utc::now().to_rfc3339()),
            },
            segments: sections
                .iter()
                .filter(|s| !s.name.is_empty() && s.end > s.start)
                .map(|s| SegmentRecord { name: s.name.clone(), start: s.start, end: s.end })
                .collect(),
            functions,
            xrefs,
            strings,
            data_names,
            data_types: Vec::new(),
        })
    }
}

fn lift_function(
    cs: &Capstone,
    code: &[u8],
    address: u64,
    name: String,
    max: usize,
    sections: &[SectionRange],
    xrefs: &mut Vec<Xref>,
) -> SnapshotFunction {
    let decoded = disassemble(cs, code, address, max);
    let end = decoded
        .last()
        .map(|d| d.insn.address + u64::from(d.insn.size))
        .unwrap_or(address + code.len() as u64);
    xrefs.extend(code_xrefs(&decoded));
    xrefs.extend(data_xrefs(&decoded, sections));

    let mut func = SnapshotFunction::new(address, end, name);
    func.blocks = build_blocks(&decoded, address, end);
    func.instructions = decoded.into_iter().map(|d| d.insn).collect();
    func
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(address: u64, size: u32, kind: &str, target: Option<u64>) -> Decoded {
        Decoded {
            insn: Instruction {
                address,
                size,
                disasm: kind.to_string(),
                is_call: kind == "call",
                operands: Vec::new(),
            },
            is_jump: kind == "jmp" || kind == "je",
            is_ret: kind == "ret",
            conditional: kind == "je",
            target,
        }
    }

    #[test]
    fn blocks_split_at_branches_and_targets() {
        // 0: je 6 / 2: nop / 3: jmp 7 / 5: nop / 6: nop / 7: ret
        let insns = vec![
            decoded(0, 2, "je", Some(6)),
            decoded(2, 1, "nop", None),
            decoded(3, 2, "jmp", Some(7)),
            decoded(5, 1, "nop", None),
            decoded(6, 1, "nop", None),
            decoded(7, 1, "ret", None),
        ];
        let blocks = build_blocks(&insns, 0, 8);
        let starts: Vec<u64> = blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 2, 5, 6, 7]);
        assert_eq!(blocks[0].successors, vec![6, 2]);
        assert_eq!(blocks[1].successors, vec![7]);
        assert_eq!(blocks[2].successors, vec![6]);
        assert!(blocks[4].successors.is_empty());
    }

    #[test]
    fn strings_need_terminator_and_length() {
        let bytes = b"\0abc\0config.json\0tail".to_vec();
        let sections = vec![SectionRange {
            name: ".rodata".into(),
            start: 0x100,
            end: 0x100 + bytes.len() as u64,
            file_offset: Some(0),
            executable: false,
        }];
        let strings = collect_strings(&bytes, &sections);
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].content, "config.json");
        assert_eq!(strings[0].address, 0x105);
    }

    #[test]
    fn symbol_sizes_fill_from_neighbours() {
        let sections = vec![SectionRange {
            name: ".text".into(),
            start: 0x10,
            end: 0x40,
            file_offset: Some(0),
            executable: true,
        }];
        let sym = |name: &str, address| SymbolInfo {
            name: name.into(),
            address,
            size: None,
            section: None,
        };
        let symbols = normalize_symbols(vec![sym("b", 0x20), sym("a", 0x10), sym("dup", 0x20)], &sections);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].size, Some(0x10));
        assert_eq!(symbols[1].size, Some(0x20));
    }
}
