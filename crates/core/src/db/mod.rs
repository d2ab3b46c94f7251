//! Project database integration and project layout definitions.
//!
//! The project database is the persistent program store: one imported
//! program (functions, instructions, cross-references, strings, data names)
//! plus every edit applied to it. `ProjectDb` implements
//! [`crate::oracle::SymbolOracle`], so the analysis pipeline runs directly
//! against it.
//!
//! - `ProjectConfig`: serializable project metadata and analysis defaults.
//! - `ProjectLayout`: computed paths for project directories/files.
//! - `ProjectDb`: SQLite wrapper with versioned schema migrations.
//! - `ProjectContext`: layout + config + open database bundle.

pub mod config;
pub mod context;
pub mod layout;
pub mod project_db;
pub mod util;

pub use config::{ChainDefaults, ContextDefaults, DbConfig, ProjectConfig};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use project_db::{DbError, DbResult, ImportSummary, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, save_project_config};
