use std::fs;
use std::path::Path;

use namesmith::{canonicalize_or_current, infer_project_name, resolve_function};
use namesmith_core::oracle::{InMemoryOracle, ProgramSnapshot};
use tempfile::tempdir;

fn fixture_oracle() -> InMemoryOracle {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_snapshot.json");
    let snapshot: ProgramSnapshot =
        serde_json::from_str(&fs::read_to_string(path).expect("read fixture")).expect("parse fixture");
    InMemoryOracle::from_snapshot(snapshot)
}

#[test]
fn canonicalize_or_current_resolves_existing_and_missing_paths() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result = canonicalize_or_current(subdir.to_str().unwrap()).expect("canonicalize nested");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));

    let missing = canonicalize_or_current("does-not-exist-yet").expect("relative missing path");
    assert!(missing.is_absolute());
    assert!(missing.ends_with("does-not-exist-yet"));
}

#[test]
fn infer_project_name_uses_last_path_component() {
    assert_eq!(infer_project_name(Path::new("/tmp/project-root")), "project-root");
    assert_eq!(infer_project_name(Path::new("/")), "unnamed-project");
}

#[test]
fn functions_resolve_by_address_or_name() {
    let oracle = fixture_oracle();

    assert_eq!(resolve_function(&oracle, "0x1000").unwrap().0, 0x1000);
    assert_eq!(resolve_function(&oracle, "4096").unwrap().0, 0x1000);
    // Addresses inside a function resolve to its entry.
    assert_eq!(resolve_function(&oracle, "0x2004").unwrap().0, 0x2000);
    assert_eq!(resolve_function(&oracle, "nullsub_1").unwrap().0, 0x3000);
}

#[test]
fn unresolvable_functions_are_errors() {
    let oracle = fixture_oracle();

    let err = resolve_function(&oracle, "0x9999").unwrap_err();
    assert!(err.to_string().contains("No function at 0x9999"), "{err}");

    let err = resolve_function(&oracle, "does_not_exist").unwrap_err();
    assert!(err.to_string().contains("No function named 'does_not_exist'"), "{err}");
}
