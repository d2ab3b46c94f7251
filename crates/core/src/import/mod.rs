//! Importers that turn an external artifact into a [`ProgramSnapshot`].

#[cfg(feature = "capstone-backend")]
pub mod capstone;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::oracle::ProgramSnapshot;

#[cfg(feature = "capstone-backend")]
pub use self::capstone::CapstoneImporter;

/// Request handed to an importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
    /// Optional architecture hint (e.g., x86_64, arm64, armv7).
    pub arch: Option<String>,
    /// Per-function instruction budget for importers that disassemble.
    pub max_instructions: Option<usize>,
}

impl ImportRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), arch: None, max_instructions: None }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("input not found at {0}")]
    MissingInput(PathBuf),
    #[error("importer not found: {0}")]
    MissingImporter(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot {path}: {message}")]
    Format { path: PathBuf, message: String },
    #[error("importer error: {0}")]
    Backend(String),
}

/// Implemented by every program importer.
pub trait ProgramImporter: Send + Sync {
    fn name(&self) -> &'static str;
    fn import(&self, request: &ImportRequest) -> Result<ProgramSnapshot, ImportError>;
}

/// Importers selectable by name.
#[derive(Default)]
pub struct ImporterRegistry {
    importers: HashMap<String, Box<dyn ProgramImporter>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I: ProgramImporter + 'static>(&mut self, importer: I) -> &mut Self {
        self.importers.insert(importer.name().to_string(), Box::new(importer));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn ProgramImporter> {
        self.importers.get(name).map(|i| &**i)
    }

    /// Sorted importer names for help and error output.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.importers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn import_with(
        &self,
        name: &str,
        request: &ImportRequest,
    ) -> Result<ProgramSnapshot, ImportError> {
        let importer =
            self.get(name).ok_or_else(|| ImportError::MissingImporter(name.to_string()))?;
        importer.import(request)
    }
}

/// Registry with the snapshot importer and, when enabled, the capstone one.
pub fn default_importer_registry() -> ImporterRegistry {
    let mut registry = ImporterRegistry::new();
    registry.register(SnapshotImporter);
    #[cfg(feature = "capstone-backend")]
    {
        registry.register(CapstoneImporter);
    }
    registry
}

/// Reads a snapshot exported by a host disassembler. YAML is accepted for
/// `.yaml`/`.yml` files, everything else is parsed as JSON.
pub struct SnapshotImporter;

impl ProgramImporter for SnapshotImporter {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn import(&self, request: &ImportRequest) -> Result<ProgramSnapshot, ImportError> {
        let path = &request.path;
        let text = read_input(path).and_then(|bytes| {
            String::from_utf8(bytes).map_err(|e| ImportError::Format {
                path: path.clone(),
                message: e.to_string(),
            })
        })?;
        let snapshot = if is_yaml(path) {
            serde_yaml::from_str::<ProgramSnapshot>(&text)
                .map_err(|e| ImportError::Format { path: path.clone(), message: e.to_string() })?
        } else {
            serde_json::from_str::<ProgramSnapshot>(&text)
                .map_err(|e| ImportError::Format { path: path.clone(), message: e.to_string() })?
        };
        debug!(
            path = %path.display(),
            functions = snapshot.functions.len(),
            xrefs = snapshot.xrefs.len(),
            "parsed snapshot"
        );
        Ok(snapshot)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    )
}

pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>, ImportError> {
    if !path.exists() {
        return Err(ImportError::MissingInput(path.to_path_buf()));
    }
    fs::read(path).map_err(|source| ImportError::Io { path: path.to_path_buf(), source })
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn yaml_detection_is_case_insensitive() {
        assert!(is_yaml(Path::new("a/b.YML")));
        assert!(is_yaml(Path::new("prog.yaml")));
        assert!(!is_yaml(Path::new("prog.json")));
        assert!(!is_yaml(Path::new("prog")));
    }

    #[test]
    fn registry_lists_names_sorted() {
        let registry = default_importer_registry();
        let names = registry.names();
        assert!(names.contains(&"snapshot".to_string()));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(matches!(
            registry.import_with("nope", &ImportRequest::new("x")),
            Err(ImportError::MissingImporter(name)) if name == "nope"
        ));
    }
}
