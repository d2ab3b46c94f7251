pub mod commands;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::SymbolOracle;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "namesmith=info,namesmith_core=info";

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // Paths that do not exist yet are joined onto the current dir.
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Infer a project name from the root path.
///
/// If the root has no final component (e.g., `/`), fallback to `unnamed-project`.
pub fn infer_project_name(root: &Path) -> String {
    root.file_name().and_then(|os_str| os_str.to_str()).unwrap_or("unnamed-project").to_string()
}

/// Log filter from `NAMESMITH_LOG`, then `RUST_LOG`, then the built-in default.
pub fn log_filter() -> EnvFilter {
    for var in ["NAMESMITH_LOG", "RUST_LOG"] {
        if let Ok(value) = env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(&value) {
                return filter;
            }
        }
    }
    EnvFilter::new(DEFAULT_LOG_FILTER)
}

/// Install the stderr subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Resolve a command-line function argument.
///
/// Hex (`0x401000`) or decimal input is treated as an address and may point
/// anywhere inside the function; anything else is looked up by name.
pub fn resolve_function(oracle: &dyn SymbolOracle, query: &str) -> Result<FunctionAddress> {
    match query.parse::<FunctionAddress>() {
        Ok(address) => oracle
            .function(address.0)
            .or_else(|| oracle.function_containing(address.0))
            .map(|info| info.address)
            .ok_or_else(|| anyhow!("No function at {address}")),
        Err(_) => oracle
            .function_by_name(query.trim())
            .map(|info| info.address)
            .ok_or_else(|| anyhow!("No function named '{}'", query.trim())),
    }
}
