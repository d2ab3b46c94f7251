mod common;

use common::*;
use namesmith_core::analysis::discover_callers;
use namesmith_core::db::{DbError, ProjectDb, CURRENT_SCHEMA_VERSION};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::{OracleError, SymbolOracle, XrefKind};
use tempfile::tempdir;

#[test]
fn database_initializes_schema_and_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("project.db");

    {
        let db = ProjectDb::open(&db_path).expect("open db");
        let version: i32 = db
            .connection()
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        assert!(!db.has_program().expect("has program"));

        let summary = db.import_snapshot(&sample_snapshot()).expect("import");
        assert_eq!(summary.functions, 5);
        assert_eq!(summary.xrefs, 7);
        assert_eq!(summary.strings, 1);
    }

    {
        let db = ProjectDb::open(&db_path).expect("re-open db");
        assert!(db.has_program().expect("has program"));
        assert_eq!(db.function_count().expect("count"), 5);
        let names: Vec<String> =
            db.list_functions().expect("list").into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["main", "sub_2000", "nullsub_1", "deep_worker", "entry_point"]);
    }
}

#[test]
fn export_reproduces_the_imported_program() {
    let db = ProjectDb::open_in_memory().expect("db");
    let mut expected = sample_snapshot();
    db.import_snapshot(&expected).expect("import");

    let exported = db.export_snapshot().expect("export");
    expected.functions.sort_by_key(|f| f.address.0);
    assert_eq!(exported, expected);
}

#[test]
fn import_replaces_the_previous_program() {
    let db = ProjectDb::open_in_memory().expect("db");
    db.import_snapshot(&sample_snapshot()).expect("first import");

    let mut smaller = sample_snapshot();
    smaller.functions.truncate(1);
    smaller.xrefs.clear();
    db.import_snapshot(&smaller).expect("second import");
    assert_eq!(db.function_count().expect("count"), 1);
    assert!(db.xrefs_to(MAIN).is_empty());
}

#[test]
fn queries_match_the_in_memory_oracle() {
    let db = ProjectDb::open_in_memory().expect("db");
    db.import_snapshot(&sample_snapshot()).expect("import");
    let memory = sample_oracle();

    for addr in [MAIN, MAIN + 0x10, HELPER + 4, 0x9999] {
        assert_eq!(db.function_containing(addr), memory.function_containing(addr), "{addr:#x}");
    }
    assert_eq!(db.instruction_at(MAIN + 5), memory.instruction_at(MAIN + 5));
    assert_eq!(db.xrefs_from(MAIN + 0xf), memory.xrefs_from(MAIN + 0xf));
    assert_eq!(db.xrefs_from(MAIN + 0xf)[0].kind, XrefKind::DataOffset);
    assert_eq!(db.string_at(CONFIG_STRING), memory.string_at(CONFIG_STRING));
    assert_eq!(db.name_at(SETTINGS).as_deref(), Some("g_settings"));
    assert_eq!(db.type_at(SETTINGS).as_deref(), Some("Settings"));
    assert!(db.is_code(MAIN + 5));
    assert!(!db.is_code(SETTINGS));
    assert_eq!(db.binary_info(), memory.binary_info());
    assert_eq!(
        discover_callers(&db, FunctionAddress(HELPER)),
        discover_callers(&memory, FunctionAddress(HELPER))
    );
    assert!(matches!(
        db.decompile(FunctionAddress(WORKER)),
        Err(OracleError::DecompilationUnavailable(WORKER))
    ));
}

#[test]
fn renames_are_validated_and_logged() {
    let mut db = ProjectDb::open_in_memory().expect("db");
    db.import_snapshot(&sample_snapshot()).expect("import");
    let main = FunctionAddress(MAIN);

    assert!(matches!(db.set_function_name(main, "bad name"), Err(OracleError::InvalidName(_))));
    assert!(matches!(db.set_function_name(main, "sub_2000"), Err(OracleError::NameInUse(_))));
    assert!(matches!(db.set_function_name(main, "g_settings"), Err(OracleError::NameInUse(_))));
    db.set_function_name(main, "main").expect("same name is a no-op");
    db.set_function_name(main, "run_main").expect("rename");
    assert_eq!(db.function(MAIN).expect("main").name, "run_main");

    assert!(matches!(
        db.rename_local(main, "v7", "count"),
        Err(OracleError::NoSuchVariable { .. })
    ));
    assert!(matches!(db.rename_local(main, "v1", "v2"), Err(OracleError::NameInUse(_))));
    db.rename_local(main, "v2", "total").expect("rename local");
    assert_eq!(db.local_variables(main).expect("locals"), vec!["v1", "total"]);
    assert!(db.decompile(main).expect("code").contains("total += sub_2000(total)"));

    db.set_function_comment(main, "entry logic").expect("comment");
    let log = db.edit_log(main).expect("log");
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].field, "function_name");
    assert_eq!(log[0].old_value.as_deref(), Some("main"));
    assert_eq!(log[0].new_value, "run_main");
    assert_eq!(log[2].field, "comment");
    assert_eq!(log[2].old_value, None);
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("project.db");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("raw open");
        conn.execute_batch(&format!("PRAGMA user_version = {};", CURRENT_SCHEMA_VERSION + 1))
            .expect("bump version");
    }
    match ProjectDb::open(&db_path) {
        Err(DbError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("newer schema must be rejected"),
    }
}
