use serde::{Deserialize, Serialize};

use crate::analysis::chain::ChainOptions;
use crate::analysis::context::{ContextOptions, ContextProfile, DEFAULT_IMPORTANT_FILES};
use crate::llm::ModelConfig;

/// Database location, typically relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the project database file (typically relative to project root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Defaults for context collection, overridable per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDefaults {
    #[serde(default)]
    pub profile: ContextProfile,
    #[serde(default = "default_neighbor_cap")]
    pub max_callers: usize,
    #[serde(default = "default_neighbor_cap")]
    pub max_callees: usize,
    /// Filenames whose string references get flagged as important config.
    #[serde(default = "default_important_files")]
    pub important_files: Vec<String>,
    #[serde(default)]
    pub search_string_callers: bool,
    /// Disassembly of the function and its listed callers. Only the full
    /// profile keeps it.
    #[serde(default)]
    pub include_assembly: bool,
}

fn default_neighbor_cap() -> usize {
    5
}

fn default_important_files() -> Vec<String> {
    DEFAULT_IMPORTANT_FILES.iter().map(|s| s.to_string()).collect()
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            profile: ContextProfile::default(),
            max_callers: default_neighbor_cap(),
            max_callees: default_neighbor_cap(),
            important_files: default_important_files(),
            search_string_callers: false,
            include_assembly: false,
        }
    }
}

impl ContextDefaults {
    /// Context options seeded from these defaults, with an optional profile override.
    pub fn to_options(&self, profile: Option<ContextProfile>) -> ContextOptions {
        ContextOptions {
            profile: profile.unwrap_or(self.profile),
            max_callers: self.max_callers,
            max_callees: self.max_callees,
            important_files: self.important_files.clone(),
            search_string_callers: self.search_string_callers,
            include_assembly: self.include_assembly,
            ..ContextOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefaults {
    #[serde(default = "default_chain_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub include_callees: bool,
    #[serde(default)]
    pub keep_special_leaves: bool,
}

fn default_chain_depth() -> u32 {
    3
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self { max_depth: default_chain_depth(), include_callees: false, keep_special_leaves: false }
    }
}

impl ChainDefaults {
    pub fn to_options(&self, depth: Option<u32>, include_callees: bool) -> ChainOptions {
        ChainOptions {
            max_depth: ChainOptions::clamp_depth(depth.unwrap_or(self.max_depth)),
            include_callees: include_callees || self.include_callees,
            keep_special_leaves: self.keep_special_leaves,
        }
    }
}

/// Serializable configuration describing a namesmith project.
///
/// This lives at `.namesmith/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    /// Optional description / notes.
    pub description: Option<String>,
    /// Schema/config version. This is about the config format, not binary version.
    pub config_version: String,
    /// Database configuration (path is typically relative to project root).
    pub db: DbConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub context: ContextDefaults,
    #[serde(default)]
    pub chain: ChainDefaults,
}

impl ProjectConfig {
    /// Create a new project configuration using the given name and db path.
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            model: ModelConfig::default(),
            context: ContextDefaults::default(),
            chain: ChainDefaults::default(),
        }
    }
}
