use std::fs;

use anyhow::{Context, Result};
use namesmith_core::db::{ProjectConfig, ProjectDb, ProjectLayout};
use namesmith_core::oracle::SymbolOracle;
use serde::Serialize;

use crate::commands::{open_project_db, print_dir_status};
use crate::{canonicalize_or_current, infer_project_name};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub model: String,
    pub base_url: String,
    pub profile: String,
    pub program: Option<ProgramInfo>,
}

#[derive(Serialize)]
pub struct ProgramInfo {
    pub filename: String,
    pub processor: String,
    pub is_64bit: bool,
    pub is_ios: bool,
    pub functions: usize,
    pub sha256: Option<String>,
    pub imported_at: Option<String>,
}

/// Initialize a new project at `root`.
pub fn init_project_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;
    fs::create_dir_all(&layout.snapshots_dir).with_context(|| {
        format!("Failed to create snapshots dir: {}", layout.snapshots_dir.display())
    })?;

    let config = ProjectConfig::new(&project_name, layout.db_path_relative_string());
    namesmith_core::db::save_project_config(&layout, &config)?;

    // Create the database up front so later commands find a valid schema.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize project database at {}", layout.db_path.display())
    })?;

    println!("Initialized namesmith project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Snapshots dir: {}", layout.snapshots_dir.display());

    Ok(())
}

fn program_info(db: &ProjectDb) -> Result<Option<ProgramInfo>> {
    if !db.has_program().context("Failed to inspect project database")? {
        return Ok(None);
    }
    let record = db.binary_record().context("Failed to read program metadata")?;
    let info = db.binary_info();
    Ok(Some(ProgramInfo {
        filename: info.filename,
        processor: info.processor,
        is_64bit: info.is_64bit,
        is_ios: info.is_ios,
        functions: db.function_count().context("Failed to count functions")?,
        sha256: record.sha256,
        imported_at: record.imported_at,
    }))
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (config, _db_path, db) = open_project_db(&layout)?;
    let program = program_info(&db)?;

    if json {
        let snapshot = ProjectInfoSnapshot {
            name: config.name.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            model: config.model.model.clone(),
            base_url: config.model.base_url.clone(),
            profile: config.context.profile.to_string(),
            program,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("namesmith Project Info");
    println!("======================");
    println!("Name: {}", config.name);
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    println!("Model: {} via {}", config.model.model, config.model.base_url);
    println!("Context profile: {}", config.context.profile);
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.namesmith)", &layout.meta_dir);
    print_dir_status("Snapshots dir", &layout.snapshots_dir);
    println!();

    match program {
        Some(p) => {
            println!("Program: {} ({}, {}-bit)", p.filename, p.processor, if p.is_64bit { 64 } else { 32 });
            if p.is_ios {
                println!("Platform: iOS");
            }
            println!("Functions: {}", p.functions);
            if let Some(hash) = &p.sha256 {
                println!("SHA-256: {hash}");
            }
            if let Some(at) = &p.imported_at {
                println!("Imported at: {at}");
            }
        }
        None => println!("Program: (none imported)"),
    }

    Ok(())
}
