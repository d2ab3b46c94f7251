mod common;

use common::*;
use namesmith_core::analysis::context::NEIGHBOR_CODE_BUDGET;
use namesmith_core::analysis::{
    build_context, discover_callees, ContextOptions, ContextProfile,
};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::{
    DataName, InMemoryOracle, Instruction, Operand, OracleError, ProgramSnapshot,
    SnapshotFunction, StringLiteral, SymbolOracle, Xref, XrefKind,
};

fn options(profile: ContextProfile) -> ContextOptions {
    ContextOptions { profile, ..ContextOptions::default() }
}

#[test]
fn callees_are_counted_and_sorted_by_frequency() {
    let oracle = sample_oracle();
    let digest = build_context(&oracle, FunctionAddress(MAIN), &options(ContextProfile::Full))
        .expect("digest");
    let callees: Vec<(u64, u32)> = digest.callees.iter().map(|c| (c.address.0, c.call_count)).collect();
    // Two call instructions plus two code xrefs to sub_2000; one of each to nullsub_1.
    assert_eq!(callees, vec![(HELPER, 4), (NULLSUB, 2)]);
    assert!(callees.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn discovery_order_is_preserved_before_sorting() {
    let oracle = sample_oracle();
    let main = oracle.function(MAIN).expect("main");
    let names: Vec<String> = discover_callees(&oracle, &main).into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["sub_2000".to_string(), "nullsub_1".to_string()]);
}

#[test]
fn callers_come_from_call_xrefs() {
    let oracle = sample_oracle();
    let digest =
        build_context(&oracle, FunctionAddress(HELPER), &options(ContextProfile::LiteAware))
            .expect("digest");
    assert_eq!(digest.callers.len(), 1);
    assert_eq!(digest.callers[0].address, FunctionAddress(MAIN));

    let root = build_context(&oracle, FunctionAddress(ENTRY), &options(ContextProfile::LiteAware))
        .expect("digest");
    assert!(root.callers.is_empty());
    assert!(root.render().contains("This function has no callers found by standard xrefs."));
}

#[test]
fn full_digest_renders_every_section() {
    let oracle = sample_oracle();
    let digest = build_context(&oracle, FunctionAddress(MAIN), &options(ContextProfile::Full))
        .expect("digest");
    let text = digest.render();

    assert!(text.starts_with("Function: main at 0x1000\nSize: 64 bytes\n"));
    assert!(text.contains("Called by:\n- entry_point (0x6000)\n"));
    assert!(text.contains(
        "Calls:\n- sub_2000 (0x2000) - called 4 times\n- nullsub_1 (0x3000) - called 2 times\n"
    ));
    assert!(text.contains("- \"[IMPORTANT CONFIG FILE] assets/bi.txt\""));
    assert!(text.contains("- g_settings (Type: Settings) @ 0x7000"));
    assert!(text.contains("Code references FROM this function"));
    assert!(text.contains("Data/String references FROM this function"));
    assert!(text.contains("\"assets/bi.txt\""));

    assert!(text.contains("Decompiled code of functions that call this function:"));
    assert!(text.contains("--- Caller: entry_point (0x6000) ---"));
    assert!(text.contains("--- Callee: sub_2000 (0x2000) (called 4 times) ---"));
    assert!(!text.contains("skipped for speed"));
    assert_eq!(digest.to_string(), text);
}

#[test]
fn failed_neighbour_decompilation_is_marked() {
    let oracle = sample_oracle();
    let digest = build_context(&oracle, FunctionAddress(HELPER), &options(ContextProfile::Full))
        .expect("digest");
    let text = digest.render();
    assert!(text.contains("--- Callee: deep_worker (0x4000) (called"));
    assert!(text.contains("(decompilation failed) ---"));
}

#[test]
fn lite_profile_trims_the_digest() {
    let oracle = sample_oracle();
    let digest = build_context(&oracle, FunctionAddress(MAIN), &options(ContextProfile::Lite))
        .expect("digest");
    let text = digest.render();
    assert!(digest.strings.is_empty());
    assert!(digest.data_refs.is_empty());
    assert!(digest.caller_code.is_empty() && digest.callee_code.is_empty());
    assert!(text.contains("  ... and 1 more called functions"));
    assert!(text.contains("skipped for speed based on current mode"));
}

#[test]
fn lite_aware_keeps_references_without_neighbour_code() {
    let oracle = sample_oracle();
    let digest =
        build_context(&oracle, FunctionAddress(MAIN), &options(ContextProfile::LiteAware))
            .expect("digest");
    assert_eq!(digest.strings.len(), 1);
    assert!(digest.callee_code.is_empty());
}

#[test]
fn address_inside_a_function_resolves_to_its_entry() {
    let oracle = sample_oracle();
    let digest = build_context(&oracle, FunctionAddress(MAIN + 0x10), &ContextOptions::default())
        .expect("digest");
    assert_eq!(digest.function.address, FunctionAddress(MAIN));
}

#[test]
fn unknown_address_is_the_only_error() {
    let oracle = sample_oracle();
    let err = build_context(&oracle, FunctionAddress(0xdead_0000), &ContextOptions::default())
        .unwrap_err();
    assert!(matches!(err, OracleError::NoFunction(0xdead_0000)));
}

#[test]
fn string_caller_search_is_opt_in() {
    let oracle = sample_oracle();
    let default = build_context(&oracle, FunctionAddress(ENTRY), &ContextOptions::default())
        .expect("digest");
    assert!(!default.string_search_empty);

    let slow = ContextOptions { search_string_callers: true, ..ContextOptions::default() };
    let digest = build_context(&oracle, FunctionAddress(ENTRY), &slow).expect("digest");
    assert!(digest.callers.is_empty());
    assert!(digest.string_search_empty);
    assert!(digest.render().contains("(Enhanced string search for callers also yielded no results)."));
}

fn insn(address: u64, disasm: &str) -> Instruction {
    Instruction { address, size: 4, disasm: disasm.to_string(), is_call: false, operands: Vec::new() }
}

/// One function referencing more strings, data and code than the digest lists.
fn busy_oracle() -> InMemoryOracle {
    let mut snapshot = ProgramSnapshot::default();
    let mut dispatcher = SnapshotFunction::new(0x10000, 0x11000, "dispatcher");
    for i in 0..25u64 {
        let at = 0x10000 + i * 8;
        let target = 0x20000 + i * 0x10;
        dispatcher.instructions.push(insn(at, "lea rsi, [rip+msg]"));
        snapshot.xrefs.push(Xref { from: at, to: target, kind: XrefKind::DataOffset });
        snapshot.strings.push(StringLiteral { address: target, content: format!("message_{i:02}") });
    }
    for i in 0..18u64 {
        let at = 0x10200 + i * 8;
        let target = 0x30000 + i * 8;
        dispatcher.instructions.push(insn(at, "mov rax, [rip+slot]"));
        snapshot.xrefs.push(Xref { from: at, to: target, kind: XrefKind::DataRead });
        snapshot.data_names.push(DataName { address: target, name: format!("g_slot_{i}") });
    }
    for i in 0..12u64 {
        let at = 0x10400 + i * 8;
        dispatcher.instructions.push(insn(at, "jmp handler"));
        snapshot.xrefs.push(Xref { from: at, to: 0x40000 + i * 0x10, kind: XrefKind::JumpNear });
    }
    dispatcher.pseudocode = Some("void dispatcher() {}".to_string());
    snapshot.functions.push(dispatcher);
    InMemoryOracle::from_snapshot(snapshot)
}

#[test]
fn capped_lists_report_what_was_left_out() {
    let oracle = busy_oracle();
    let digest =
        build_context(&oracle, FunctionAddress(0x10000), &options(ContextProfile::LiteAware))
            .expect("digest");
    assert_eq!(digest.strings.len(), 25);
    assert_eq!(digest.data_refs.len(), 18);

    let text = digest.render();
    assert!(text.contains("- \"message_19\"\n"));
    assert!(!text.contains("message_20"));
    assert!(text.contains("  ... and 5 more string references\n"));

    assert!(text.contains("- g_slot_14 @ 0x30070\n"));
    assert!(!text.contains("g_slot_15 @"));
    assert!(text.contains("  ... and 3 more data references\n"));

    assert!(text.contains("Code references FROM this function (first 10):\n"));
    assert!(text.contains("- unnamed_0x40090 (0x40090)\n"));
    assert!(!text.contains("unnamed_0x400a0"));
    assert!(text.contains("  ... and 2 more code references FROM this function\n"));

    // 25 strings plus 18 named slots, ten of them listed.
    assert!(text.contains("  ... and 33 more data/string references FROM this function\n"));
}

#[test]
fn lists_at_their_cap_have_no_trailer() {
    let oracle = sample_oracle();
    let text = build_context(&oracle, FunctionAddress(MAIN), &options(ContextProfile::LiteAware))
        .expect("digest")
        .render();
    assert!(!text.contains("more string references"));
    assert!(!text.contains("more data references"));
    assert!(!text.contains("more code references"));
    assert!(!text.contains("more data/string references"));
}

const LAUNCHER: u64 = 0x60000;
const FETCHER: u64 = 0x61000;

/// `launcher` calls `fetcher`; both touch Objective-C class symbols.
fn objc_oracle() -> InMemoryOracle {
    let mut snapshot = ProgramSnapshot::default();

    let mut launcher = SnapshotFunction::new(LAUNCHER, LAUNCHER + 0x40, "launcher");
    launcher.instructions = vec![
        Instruction {
            address: LAUNCHER,
            size: 4,
            disasm: "bl 0x61000".to_string(),
            is_call: true,
            operands: vec![Operand::Near(FETCHER)],
        },
        insn(LAUNCHER + 5, "adrp x1, _OBJC_CLASS_$_AppDelegate"),
    ];
    launcher.pseudocode = Some(format!("void launcher() {{\n{}}}\n", "  step();\n".repeat(600)));

    let mut fetcher = SnapshotFunction::new(FETCHER, FETCHER + 0x40, "fetcher");
    fetcher.instructions = vec![
        insn(FETCHER, "adrp x8, _OBJC_METACLASS_$_NSURLSession"),
        insn(FETCHER + 4, "add x8, x8, #0x10"),
        insn(FETCHER + 8, "ldr x0, [x8]"),
    ];
    fetcher.pseudocode = Some("id fetcher() { return session; }".to_string());
    snapshot.functions = vec![launcher, fetcher];

    snapshot.xrefs = vec![
        Xref { from: LAUNCHER, to: FETCHER, kind: XrefKind::CallNear },
        Xref { from: LAUNCHER + 5, to: 0x62000, kind: XrefKind::DataOffset },
        Xref { from: FETCHER, to: 0x62010, kind: XrefKind::DataOffset },
        Xref { from: FETCHER + 8, to: 0x62010, kind: XrefKind::DataRead },
    ];
    snapshot.data_names = vec![
        DataName { address: 0x62000, name: "_OBJC_CLASS_$_AppDelegate".to_string() },
        DataName { address: 0x62010, name: "_OBJC_METACLASS_$_NSURLSession".to_string() },
    ];
    InMemoryOracle::from_snapshot(snapshot)
}

fn with_assembly(profile: ContextProfile) -> ContextOptions {
    ContextOptions { profile, include_assembly: true, ..ContextOptions::default() }
}

#[test]
fn class_references_are_grouped_per_function() {
    let oracle = objc_oracle();
    let digest = build_context(&oracle, FunctionAddress(FETCHER), &options(ContextProfile::Full))
        .expect("digest");

    assert_eq!(digest.class_refs.len(), 2);
    assert!(digest.class_refs[0].is_target);
    // The second read of the same class is not listed again.
    assert_eq!(digest.class_refs[0].classes, vec![("NSURLSession".to_string(), FETCHER)]);
    assert_eq!(digest.class_refs[1].owner.name, "launcher");
    assert_eq!(digest.class_refs[1].classes, vec![("AppDelegate".to_string(), LAUNCHER + 5)]);

    let text = digest.render();
    assert!(text.contains(
        "Objective-C Class References in this function:\n- NSURLSession (0x61000)\n"
    ));
    assert!(text.contains(
        "Objective-C Class References in caller launcher (0x60000):\n- AppDelegate (0x60005)\n"
    ));

    let lite = build_context(&oracle, FunctionAddress(FETCHER), &options(ContextProfile::Lite))
        .expect("digest");
    assert_eq!(lite.class_refs.len(), 2);
}

#[test]
fn assembly_covers_the_function_and_its_callers() {
    let oracle = objc_oracle();
    let digest =
        build_context(&oracle, FunctionAddress(FETCHER), &with_assembly(ContextProfile::Full))
            .expect("digest");
    assert_eq!(digest.assembly.len(), 2);
    assert_eq!(digest.assembly[0].lines.len(), 3);

    let text = digest.render();
    assert!(text.contains(
        "Assembly code for this function:\n0x61000: adrp x8, _OBJC_METACLASS_$_NSURLSession\n"
    ));
    assert!(text.contains("0x61008: ldr x0, [x8]\n"));
    assert!(text.contains("Assembly for caller launcher (0x60000):\n0x60000: bl 0x61000\n"));
    let listing = text.find("Assembly code for this function:").expect("listing");
    let classes = text.find("Objective-C Class References").expect("classes");
    assert!(listing < classes);
}

#[test]
fn assembly_needs_the_flag_and_the_full_profile() {
    let oracle = objc_oracle();
    for options in [options(ContextProfile::Full), with_assembly(ContextProfile::LiteAware)] {
        let digest = build_context(&oracle, FunctionAddress(FETCHER), &options).expect("digest");
        assert!(digest.assembly.is_empty());
        assert!(!digest.render().contains("Assembly"));
    }
}

#[test]
fn long_neighbour_code_keeps_head_and_tail() {
    let oracle = objc_oracle();
    let digest = build_context(&oracle, FunctionAddress(FETCHER), &options(ContextProfile::Full))
        .expect("digest");
    let code = digest.caller_code[0].code.as_deref().expect("caller code");
    assert!(code.starts_with("void launcher() {\n"));
    assert!(code.ends_with("}\n"));
    assert!(code.contains("\n...(code too long)...\n"));
    assert!(code.chars().count() <= NEIGHBOR_CODE_BUDGET + 2);

    let text = digest.render();
    assert!(text.contains("--- Caller: launcher (0x60000) ---\nvoid launcher() {\n"));
    assert!(text.contains("...(code too long)..."));
    assert!(text.contains("--- End of launcher ---"));
}
