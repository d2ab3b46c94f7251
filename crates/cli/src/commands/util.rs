use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use namesmith_core::analysis::ContextProfile;
use namesmith_core::db::{ProjectConfig, ProjectContext, ProjectDb, ProjectLayout};
use namesmith_core::import::{default_importer_registry, ImportRequest};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::{InMemoryOracle, SymbolOracle};
use namesmith_core::pipeline::{BatchObserver, BatchSummary, FunctionOutcome};

use crate::canonicalize_or_current;

/// Load the project config JSON from disk (delegates to core helper).
pub fn load_project_config(layout: &ProjectLayout) -> Result<ProjectConfig> {
    namesmith_core::db::load_project_config(layout)
}

/// Resolve the DB path (respecting relative/absolute config) and open a ProjectDb (delegates to core helper).
pub fn open_project_db(layout: &ProjectLayout) -> Result<(ProjectConfig, PathBuf, ProjectDb)> {
    namesmith_core::db::open_project_db(layout)
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Resolve `path` against the project root unless it is already absolute.
pub fn resolve_input_path(root: &Path, path: &str) -> PathBuf {
    let input = Path::new(path);
    if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    }
}

/// An oracle to inspect plus the settings that apply to it.
pub struct LoadedProgram {
    pub config: ProjectConfig,
    pub oracle: Box<dyn SymbolOracle>,
}

impl LoadedProgram {
    pub fn oracle(&self) -> &dyn SymbolOracle {
        self.oracle.as_ref()
    }
}

/// Open the project's program database, or a snapshot file when `snapshot`
/// is given. A snapshot borrows the project's settings if `root` holds a
/// project and uses defaults otherwise.
pub fn load_program(root: &str, snapshot: Option<&str>) -> Result<LoadedProgram> {
    let root_path = canonicalize_or_current(root)?;
    match snapshot {
        Some(path) => {
            let layout = ProjectLayout::new(&root_path);
            let config = if layout.project_config_path.is_file() {
                load_project_config(&layout)?
            } else {
                ProjectConfig::new("snapshot", layout.db_path_relative_string())
            };
            let path = resolve_input_path(&root_path, path);
            let snapshot = default_importer_registry()
                .import_with("snapshot", &ImportRequest::new(&path))
                .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
            Ok(LoadedProgram {
                config,
                oracle: Box::new(InMemoryOracle::from_snapshot(snapshot)),
            })
        }
        None => {
            let ctx = open_project(&root_path)?;
            Ok(LoadedProgram { config: ctx.config, oracle: Box::new(ctx.db) })
        }
    }
}

/// Open a project that already has a program imported.
pub fn open_project(root_path: &Path) -> Result<ProjectContext> {
    let ctx = ProjectContext::from_root(root_path)?;
    if !ctx.db.has_program().context("Failed to inspect project database")? {
        return Err(anyhow!(
            "No program imported into {}; run import-snapshot or import-binary first",
            ctx.db_path.display()
        ));
    }
    Ok(ctx)
}

/// Parse a profile name as written in configs and on the command line.
pub fn parse_profile(value: &str) -> Result<ContextProfile> {
    value.trim().parse::<ContextProfile>().map_err(|err| anyhow!("Invalid profile: {err}"))
}

/// Ask a yes/no question on stdin. `assume_yes` answers without asking; a
/// closed or non-interactive stdin counts as "no".
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        eprintln!("{question} [y/N] (not a terminal; pass --yes to proceed)");
        return Ok(false);
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer).context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Modal progress bar for batch analysis.
pub struct ProgressObserver {
    bar: ProgressBar,
    names: Vec<String>,
}

impl ProgressObserver {
    pub fn new(oracle: &dyn SymbolOracle, addresses: &[FunctionAddress]) -> Self {
        let names = addresses
            .iter()
            .map(|a| oracle.function(a.0).map(|f| f.name).unwrap_or_else(|| a.default_name()))
            .collect();
        let bar = ProgressBar::new(addresses.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar, names }
    }
}

impl BatchObserver for ProgressObserver {
    fn on_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_function(&mut self, index: usize, address: FunctionAddress) {
        let name = self.names.get(index).cloned().unwrap_or_else(|| address.default_name());
        self.bar.set_message(format!("{name} ({address})"));
    }

    fn on_outcome(&mut self, _index: usize, outcome: &FunctionOutcome) {
        if let FunctionOutcome::Skipped { address, reason } = outcome {
            self.bar.println(format!("skipped {address}: {reason}"));
        }
        self.bar.inc(1);
    }

    fn on_finish(&mut self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}
