use anyhow::{Context, Result};
use namesmith_core::analysis::{build_chain, build_context, classify_function, ContextProfile};
use namesmith_core::model::FunctionAddress;
use namesmith_core::pipeline::{prepare, AnalysisSettings};
use serde::Serialize;

use crate::commands::load_program;
use crate::resolve_function;

#[derive(Serialize)]
pub struct ChainEntry {
    pub address: FunctionAddress,
    pub name: String,
    pub special: bool,
}

/// Print the context digest for one function.
pub fn context_command(
    root: &str,
    snapshot: Option<&str>,
    function: &str,
    profile: Option<ContextProfile>,
    json: bool,
) -> Result<()> {
    let program = load_program(root, snapshot)?;
    let oracle = program.oracle();
    let address = resolve_function(oracle, function)?;
    let options = program.config.context.to_options(profile);
    let digest = build_context(oracle, address, &options)
        .with_context(|| format!("Failed to collect context for {address}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&digest)?);
    } else {
        print!("{}", digest.render());
    }
    Ok(())
}

/// Report whether a function is trivial enough to skip.
pub fn classify_command(root: &str, snapshot: Option<&str>, function: &str) -> Result<()> {
    let program = load_program(root, snapshot)?;
    let oracle = program.oracle();
    let address = resolve_function(oracle, function)?;
    let name = oracle.function(address.0).map(|f| f.name).unwrap_or_else(|| address.default_name());
    let kind = classify_function(oracle, address);

    println!("{name} ({address}): {}", kind.label());
    if kind.is_special() {
        println!("Analysis would add little here.");
    }
    Ok(())
}

/// Print the work-list `analyze-chain` would process.
pub fn chain_command(
    root: &str,
    snapshot: Option<&str>,
    function: &str,
    depth: Option<u32>,
    include_callees: bool,
    json: bool,
) -> Result<Vec<FunctionAddress>> {
    let program = load_program(root, snapshot)?;
    let oracle = program.oracle();
    let seed = resolve_function(oracle, function)?;
    let options = program.config.chain.to_options(depth, include_callees);
    let chain = build_chain(oracle, seed, &options);

    let entries: Vec<ChainEntry> = chain
        .iter()
        .map(|address| ChainEntry {
            address: *address,
            name: oracle.function(address.0).map(|f| f.name).unwrap_or_else(|| address.default_name()),
            special: classify_function(oracle, *address).is_special(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(chain);
    }

    println!(
        "Chain from {} (depth {}, {}):",
        seed,
        options.max_depth,
        if options.include_callees { "callers and callees" } else { "callers only" }
    );
    for (index, entry) in entries.iter().enumerate() {
        let marker = if entry.special { " [special]" } else { "" };
        println!("  {:>3}. {} {}{marker}", index + 1, entry.address, entry.name);
    }
    Ok(chain)
}

/// Print the prompt `analyze` would send, without contacting the model.
pub fn prompt_command(
    root: &str,
    snapshot: Option<&str>,
    function: &str,
    profile: Option<ContextProfile>,
) -> Result<()> {
    let program = load_program(root, snapshot)?;
    let oracle = program.oracle();
    let address = resolve_function(oracle, function)?;
    let settings =
        AnalysisSettings::new(program.config.context.to_options(profile), &program.config.model);
    let prepared = prepare(oracle, address, &settings)?;

    if prepared.special.is_special() {
        eprintln!("note: {} is a {}", prepared.name, prepared.special.label().to_lowercase());
    }
    if prepared.large {
        eprintln!("note: {} uses the large-function prompt", prepared.name);
    }
    println!("{}", prepared.prompt);
    Ok(())
}
