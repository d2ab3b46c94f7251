#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use namesmith_core::llm::{ChatRequest, ChatTransport, ModelClient, ModelConfig, TransportError};
use namesmith_core::oracle::{
    BasicBlock, DataName, DataType, InMemoryOracle, Instruction, Operand, ProgramSnapshot,
    SegmentRecord, SnapshotBinary, SnapshotFunction, StringLiteral, Xref, XrefKind,
};
use serde_json::{json, Value};

pub const ENTRY: u64 = 0x6000;
pub const MAIN: u64 = 0x1000;
pub const HELPER: u64 = 0x2000;
pub const NULLSUB: u64 = 0x3000;
pub const WORKER: u64 = 0x4000;
pub const CONFIG_STRING: u64 = 0x5000;
pub const SETTINGS: u64 = 0x7000;

fn insn(address: u64, size: u32, disasm: &str) -> Instruction {
    Instruction { address, size, disasm: disasm.to_string(), is_call: false, operands: Vec::new() }
}

fn call(address: u64, target: u64) -> Instruction {
    Instruction {
        address,
        size: 5,
        disasm: format!("call 0x{target:x}"),
        is_call: true,
        operands: vec![Operand::Near(target)],
    }
}

fn xref(from: u64, to: u64, kind: XrefKind) -> Xref {
    Xref { from, to, kind }
}

/// entry_point -> main -> {sub_2000 (twice), nullsub_1}; sub_2000 -> deep_worker.
/// main also references "assets/bi.txt" and the `g_settings` global.
pub fn sample_snapshot() -> ProgramSnapshot {
    let mut entry = SnapshotFunction::new(ENTRY, ENTRY + 0x40, "entry_point");
    entry.instructions = vec![call(ENTRY, MAIN), insn(ENTRY + 5, 1, "ret")];
    entry.blocks = vec![BasicBlock { start: ENTRY, end: ENTRY + 6, successors: vec![] }];
    entry.pseudocode = Some("void entry_point() { main(); }".to_string());

    let mut main = SnapshotFunction::new(MAIN, MAIN + 0x40, "main");
    main.instructions = vec![
        call(MAIN, HELPER),
        call(MAIN + 0x5, HELPER),
        call(MAIN + 0xa, NULLSUB),
        insn(MAIN + 0xf, 7, "lea rdi, [0x5000]"),
        insn(MAIN + 0x16, 6, "mov eax, [0x7000]"),
        insn(MAIN + 0x1c, 1, "ret"),
    ];
    main.blocks = vec![BasicBlock { start: MAIN, end: MAIN + 0x1d, successors: vec![] }];
    main.locals = vec!["v1".to_string(), "v2".to_string()];
    main.pseudocode = Some(
        "int main(int v1) {\n  int v2 = sub_2000(v1);\n  v2 += sub_2000(v2);\n  nullsub_1();\n  return load(\"assets/bi.txt\", v2);\n}"
            .to_string(),
    );

    let mut helper = SnapshotFunction::new(HELPER, HELPER + 0x80, "sub_2000");
    helper.instructions = vec![insn(HELPER, 4, "mov eax, edi"), call(HELPER + 4, WORKER), insn(HELPER + 9, 1, "ret")];
    helper.blocks = vec![BasicBlock { start: HELPER, end: HELPER + 10, successors: vec![] }];
    helper.locals = vec!["a1".to_string(), "v3".to_string()];
    helper.pseudocode =
        Some("int sub_2000(int a1) {\n  int v3 = a1 * 2;\n  deep_worker(v3);\n  return v3;\n}".to_string());

    let mut nullsub = SnapshotFunction::new(NULLSUB, NULLSUB + 0x8, "nullsub_1");
    nullsub.instructions = vec![insn(NULLSUB, 1, "ret")];
    nullsub.pseudocode = Some("void nullsub_1() { ; }".to_string());

    // No pseudocode: decompilation fails for this one.
    let mut worker = SnapshotFunction::new(WORKER, WORKER + 0x100, "deep_worker");
    worker.instructions = vec![insn(WORKER, 1, "ret")];

    ProgramSnapshot {
        binary: SnapshotBinary {
            filename: "sample.elf".to_string(),
            processor: "metapc".to_string(),
            is_64bit: true,
            sha256: None,
            imported_at: None,
        },
        segments: vec![
            SegmentRecord { name: ".text".to_string(), start: 0x1000, end: 0x4100 },
            SegmentRecord { name: ".rodata".to_string(), start: 0x5000, end: 0x5100 },
            SegmentRecord { name: ".data".to_string(), start: 0x7000, end: 0x7100 },
        ],
        functions: vec![entry, main, helper, nullsub, worker],
        xrefs: vec![
            xref(ENTRY, MAIN, XrefKind::CallNear),
            xref(MAIN, HELPER, XrefKind::CallNear),
            xref(MAIN + 0x5, HELPER, XrefKind::CallNear),
            xref(MAIN + 0xa, NULLSUB, XrefKind::CallNear),
            xref(MAIN + 0xf, CONFIG_STRING, XrefKind::DataOffset),
            xref(MAIN + 0x16, SETTINGS, XrefKind::DataRead),
            xref(HELPER + 4, WORKER, XrefKind::CallNear),
        ],
        strings: vec![StringLiteral { address: CONFIG_STRING, content: "assets/bi.txt".to_string() }],
        data_names: vec![DataName { address: SETTINGS, name: "g_settings".to_string() }],
        data_types: vec![DataType { address: SETTINGS, type_name: "Settings".to_string() }],
    }
}

pub fn sample_oracle() -> InMemoryOracle {
    InMemoryOracle::from_snapshot(sample_snapshot())
}

/// Transport that replays canned results and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_tokens(&self) -> Vec<u32> {
        self.requests.lock().unwrap().iter().map(|r| r.max_tokens).collect()
    }
}

impl ChatTransport for ScriptedTransport {
    fn send(&self, request: &ChatRequest) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
    }
}

/// A successful chat-completions body carrying `content`.
pub fn completion(content: &str) -> Result<Value, TransportError> {
    Ok(json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] }))
}

pub fn client_with(transport: Arc<ScriptedTransport>) -> ModelClient {
    ModelClient::new(&ModelConfig::default(), transport)
}
