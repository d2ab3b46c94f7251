use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use namesmith_core::db::{ImportSummary, ProjectContext, ProjectLayout};
use namesmith_core::import::{default_importer_registry, ImportRequest};
use namesmith_core::oracle::ProgramSnapshot;

use crate::canonicalize_or_current;
use crate::commands::{load_program, open_project, resolve_input_path};

fn import_with(
    root: &str,
    importer: &str,
    path: &str,
    arch: Option<String>,
    max_instructions: Option<usize>,
) -> Result<ImportSummary> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let request =
        ImportRequest { path: resolve_input_path(&root_path, path), arch, max_instructions };

    let snapshot = default_importer_registry()
        .import_with(importer, &request)
        .with_context(|| format!("Failed to import {}", request.path.display()))?;
    let summary = ctx.db.import_snapshot(&snapshot).context("Failed to store imported program")?;

    println!("Imported {}:", request.path.display());
    println!("  Importer: {importer}");
    println!("  Program: {} ({})", snapshot.binary.filename, snapshot.binary.processor);
    println!("  Functions: {}", summary.functions);
    println!("  Instructions: {}", summary.instructions);
    println!("  Xrefs: {}", summary.xrefs);
    println!("  Strings: {}", summary.strings);
    println!("  DB: {}", ctx.db_path.display());
    Ok(summary)
}

/// Replace the project's program with a snapshot exported by a host disassembler.
pub fn import_snapshot_command(root: &str, path: &str) -> Result<ImportSummary> {
    import_with(root, "snapshot", path, None, None)
}

/// Disassemble a binary and store the result as the project's program.
pub fn import_binary_command(
    root: &str,
    path: &str,
    arch: Option<String>,
    max_instructions: Option<usize>,
) -> Result<ImportSummary> {
    import_with(root, "capstone", path, arch, max_instructions)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    )
}

fn write_snapshot(path: &Path, snapshot: &ProgramSnapshot) -> Result<()> {
    let text = if is_yaml(path) {
        serde_yaml::to_string(snapshot).context("Failed to serialize snapshot to YAML")?
    } else {
        serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot to JSON")?
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("Failed to write snapshot {}", path.display()))
}

/// Write the project's program, including applied edits, to a snapshot file.
///
/// Without `out` the file lands in `snapshots/<program>.json`.
pub fn export_snapshot_command(root: &str, out: Option<&str>) -> Result<PathBuf> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = open_project(&root_path)?;
    let snapshot = ctx.db.export_snapshot().context("Failed to read program from database")?;

    let out_path = match out {
        Some(out) => resolve_input_path(&root_path, out),
        None => {
            let layout = ProjectLayout::new(&root_path);
            let stem = if snapshot.binary.filename.is_empty() {
                "program"
            } else {
                snapshot.binary.filename.as_str()
            };
            layout.snapshot_path(stem)
        }
    };
    write_snapshot(&out_path, &snapshot)?;

    println!("Exported {} functions to {}", snapshot.functions.len(), out_path.display());
    Ok(out_path)
}

/// List every function of the project (or of a snapshot file).
pub fn list_functions_command(root: &str, snapshot: Option<&str>, json: bool) -> Result<()> {
    let program = load_program(root, snapshot)?;
    let functions = program.oracle().functions();

    if json {
        let serialized = serde_json::to_string_pretty(&functions)
            .context("Failed to serialize functions to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Functions ({}):", functions.len());
    if functions.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for func in functions {
        let size = func.size();
        match func.comment.as_deref().and_then(|c| c.lines().next()) {
            Some(first) => println!("  - {} {} [{size} bytes] - {first}", func.address, func.name),
            None => println!("  - {} {} [{size} bytes]", func.address, func.name),
        }
    }
    Ok(())
}
