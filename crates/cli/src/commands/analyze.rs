use anyhow::{Context, Result};
use namesmith_core::analysis::{build_chain, visible_functions, ContextProfile};
use namesmith_core::apply::{ApplyReport, EditOutcome};
use namesmith_core::db::{ProjectConfig, ProjectDb};
use namesmith_core::llm::{MainQueue, ModelClient};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::SymbolOracle;
use namesmith_core::pipeline::{
    analyze_batch, analyze_interactive, prepare, AnalysisSettings, BatchSummary, CancelToken,
    FunctionOutcome,
};
use tracing::info;

use crate::commands::{confirm, open_project, ProgressObserver};
use crate::{canonicalize_or_current, resolve_function};

fn describe(outcome: &EditOutcome) -> String {
    match outcome {
        EditOutcome::Applied(value) => format!("set ({})", value.lines().next().unwrap_or("")),
        EditOutcome::Unchanged => "unchanged".to_string(),
        EditOutcome::Skipped => "nothing proposed".to_string(),
        EditOutcome::Failed(reason) => format!("failed: {reason}"),
    }
}

fn print_report(report: &ApplyReport) {
    println!("  Comment: {}", describe(&report.comment));
    println!("  Function name: {}", describe(&report.function_name));
    for var in &report.variables {
        println!(
            "  Variable {} -> {}: {}",
            var.original_name,
            var.new_name,
            describe(&var.outcome)
        );
    }
}

/// Print one outcome in the human-readable form.
pub fn print_outcome(outcome: &FunctionOutcome) {
    match outcome {
        FunctionOutcome::Applied { report, strategy, fallback } => {
            println!("Analyzed {} (recovered via {strategy}):", report.function);
            if *fallback {
                println!("  Model request failed; the reason was written as the comment.");
            }
            print_report(report);
        }
        FunctionOutcome::Skipped { address, reason } => {
            println!("Skipped {address}: {reason}");
        }
    }
}

fn settings_for(config: &ProjectConfig, profile: Option<ContextProfile>) -> AnalysisSettings {
    AnalysisSettings::new(config.context.to_options(profile), &config.model)
}

fn model_client(config: &ProjectConfig) -> Result<ModelClient> {
    ModelClient::from_config(&config.model).context("Cannot contact the model")
}

/// Analyze one function and apply the model's edits.
pub fn analyze_command(
    root: &str,
    function: &str,
    profile: Option<ContextProfile>,
    yes: bool,
    dry_run: bool,
) -> Result<Option<FunctionOutcome>> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = open_project(&root_path)?;
    let config = ctx.config;
    let mut db = ctx.db;

    let address = resolve_function(&db, function)?;
    let settings = settings_for(&config, profile);
    let prepared = prepare(&db, address, &settings)?;

    if prepared.special.is_special() {
        let question = format!(
            "{} looks like a {}; analyze it anyway?",
            prepared.name,
            prepared.special.label().to_lowercase()
        );
        if !confirm(&question, yes)? {
            println!("Skipped {} ({}).", prepared.name, prepared.address);
            return Ok(None);
        }
    }

    if dry_run {
        println!("{}", prepared.prompt);
        return Ok(None);
    }

    let client = model_client(&config)?;
    let queue = MainQueue::new();
    info!(function = %prepared.address, name = %prepared.name, "requesting analysis");
    let outcome = analyze_interactive(&mut db, &client, &queue, prepared.address, &settings)?;
    print_outcome(&outcome);
    Ok(Some(outcome))
}

fn function_label(oracle: &dyn SymbolOracle, address: FunctionAddress) -> String {
    oracle.function(address.0).map(|f| f.name).unwrap_or_else(|| address.default_name())
}

fn run_batch(
    db: &mut ProjectDb,
    config: &ProjectConfig,
    addresses: &[FunctionAddress],
    profile: Option<ContextProfile>,
    yes: bool,
    dry_run: bool,
) -> Result<Option<BatchSummary>> {
    println!("Functions to analyze ({}):", addresses.len());
    for (index, address) in addresses.iter().enumerate() {
        println!("  {:>3}. {} {}", index + 1, address, function_label(&*db, *address));
    }
    if dry_run {
        return Ok(None);
    }
    if !confirm(&format!("Analyze {} functions?", addresses.len()), yes)? {
        println!("Cancelled.");
        return Ok(None);
    }

    let client = model_client(config)?;
    let settings = settings_for(config, profile);
    let mut observer = ProgressObserver::new(&*db, addresses);
    let (outcomes, summary) =
        analyze_batch(db, &client, addresses, &settings, &CancelToken::new(), &mut observer);

    for outcome in &outcomes {
        print_outcome(outcome);
    }
    println!(
        "Done: {} of {} analyzed, {} skipped, {} failed requests{}",
        summary.applied,
        summary.total,
        summary.skipped,
        summary.fallbacks,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(Some(summary))
}

/// Analyze the callers (and optionally callees) around a function.
pub fn analyze_chain_command(
    root: &str,
    function: &str,
    depth: Option<u32>,
    include_callees: bool,
    profile: Option<ContextProfile>,
    yes: bool,
    dry_run: bool,
) -> Result<Option<BatchSummary>> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = open_project(&root_path)?;
    let config = ctx.config;
    let mut db = ctx.db;

    let seed = resolve_function(&db, function)?;
    let chain = build_chain(&db, seed, &config.chain.to_options(depth, include_callees));
    run_batch(&mut db, &config, &chain, profile, yes, dry_run)
}

/// Analyze a function and everything it calls directly.
pub fn analyze_visible_command(
    root: &str,
    function: &str,
    profile: Option<ContextProfile>,
    yes: bool,
    dry_run: bool,
) -> Result<Option<BatchSummary>> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = open_project(&root_path)?;
    let config = ctx.config;
    let mut db = ctx.db;

    let seed = resolve_function(&db, function)?;
    let visible = visible_functions(&db, seed);
    run_batch(&mut db, &config, &visible, profile, yes, dry_run)
}
