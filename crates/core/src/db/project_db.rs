use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{BinaryInfo, FunctionAddress};
use crate::oracle::{
    rename_in_pseudocode, validate_identifier, BasicBlock, DataName, DataType, FunctionInfo,
    Instruction, OracleError, OracleResult, ProgramSnapshot, SegmentRecord, SnapshotBinary,
    SnapshotFunction, StringLiteral, SymbolOracle, Xref, XrefKind,
};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for project database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Operand or successor lists stored as JSON failed to (de)serialize.
    #[error("Column codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    /// A stored cross-reference kind this build does not recognise.
    #[error("Unknown xref kind '{0}'")]
    UnknownXrefKind(String),
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for OracleError {
    fn from(err: DbError) -> Self {
        OracleError::Storage(err.to_string())
    }
}

/// Row counts written by [`ProjectDb::import_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub functions: usize,
    pub instructions: usize,
    pub xrefs: usize,
    pub strings: usize,
}

/// One edit recorded in the `edit_log` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditLogEntry {
    pub function: FunctionAddress,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

/// SQLite-backed program database.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible for:
/// - Opening/creating the DB file.
/// - Applying schema migrations.
/// - Serving oracle queries and persisting edits.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

fn addr(v: u64) -> i64 {
    v as i64
}

fn from_addr(v: i64) -> u64 {
    v as u64
}

fn map_function(row: &Row<'_>) -> rusqlite::Result<FunctionInfo> {
    Ok(FunctionInfo {
        address: FunctionAddress(from_addr(row.get(0)?)),
        end: from_addr(row.get(1)?),
        name: row.get(2)?,
        comment: row.get(3)?,
    })
}

impl ProjectDb {
    /// Open (or create) a project database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory database with the current schema.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether a program has been imported.
    pub fn has_program(&self) -> DbResult<bool> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM binary_info", [], |r| r.get(0))?;
        Ok(count > 0)
    }

    pub fn function_count(&self) -> DbResult<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM functions", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Replace the stored program with `snapshot` in a single transaction.
    pub fn import_snapshot(&self, snapshot: &ProgramSnapshot) -> DbResult<ImportSummary> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM binary_info;
            DELETE FROM segments;
            DELETE FROM functions;
            DELETE FROM local_variables;
            DELETE FROM instructions;
            DELETE FROM basic_blocks;
            DELETE FROM xrefs;
            DELETE FROM strings;
            DELETE FROM data_names;
            DELETE FROM data_types;
            DELETE FROM edit_log;
            "#,
        )?;

        let mut summary = ImportSummary::default();
        tx.execute(
            r#"
            INSERT INTO binary_info (id, filename, processor, is_64bit, sha256, imported_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.binary.filename,
                snapshot.binary.processor,
                snapshot.binary.is_64bit,
                snapshot.binary.sha256,
                snapshot.binary.imported_at
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO segments (name, start_addr, end_addr) VALUES (?1, ?2, ?3)",
            )?;
            for seg in &snapshot.segments {
                stmt.execute(params![seg.name, addr(seg.start), addr(seg.end)])?;
            }
        }

        {
            let mut stmt_fn = tx.prepare(
                r#"
                INSERT OR REPLACE INTO functions (address, end_addr, name, comment, pseudocode)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            let mut stmt_local = tx.prepare(
                "INSERT OR REPLACE INTO local_variables (function, position, name) VALUES (?1, ?2, ?3)",
            )?;
            let mut stmt_insn = tx.prepare(
                r#"
                INSERT OR REPLACE INTO instructions (address, function, size, disasm, is_call, operands)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            let mut stmt_block = tx.prepare(
                r#"
                INSERT OR REPLACE INTO basic_blocks (function, start_addr, end_addr, successors)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for func in &snapshot.functions {
                let entry = addr(func.address.0);
                stmt_fn.execute(params![
                    entry,
                    addr(func.end),
                    func.name,
                    func.comment,
                    func.pseudocode
                ])?;
                for (position, name) in func.locals.iter().enumerate() {
                    stmt_local.execute(params![entry, position as i64, name])?;
                }
                for insn in &func.instructions {
                    stmt_insn.execute(params![
                        addr(insn.address),
                        entry,
                        insn.size,
                        insn.disasm,
                        insn.is_call,
                        serde_json::to_string(&insn.operands)?
                    ])?;
                    summary.instructions += 1;
                }
                for block in &func.blocks {
                    stmt_block.execute(params![
                        entry,
                        addr(block.start),
                        addr(block.end),
                        serde_json::to_string(&block.successors)?
                    ])?;
                }
                summary.functions += 1;
            }
        }

        {
            let mut stmt = tx
                .prepare("INSERT INTO xrefs (from_addr, to_addr, kind) VALUES (?1, ?2, ?3)")?;
            for x in &snapshot.xrefs {
                stmt.execute(params![addr(x.from), addr(x.to), x.kind.as_str()])?;
                summary.xrefs += 1;
            }
        }

        {
            let mut stmt_str =
                tx.prepare("INSERT OR REPLACE INTO strings (address, content) VALUES (?1, ?2)")?;
            for s in &snapshot.strings {
                stmt_str.execute(params![addr(s.address), s.content])?;
                summary.strings += 1;
            }
            let mut stmt_name =
                tx.prepare("INSERT OR REPLACE INTO data_names (address, name) VALUES (?1, ?2)")?;
            for d in &snapshot.data_names {
                stmt_name.execute(params![addr(d.address), d.name])?;
            }
            let mut stmt_type = tx.prepare(
                "INSERT OR REPLACE INTO data_types (address, type_name) VALUES (?1, ?2)",
            )?;
            for d in &snapshot.data_types {
                stmt_type.execute(params![addr(d.address), d.type_name])?;
            }
        }

        tx.commit()?;
        debug!(
            functions = summary.functions,
            instructions = summary.instructions,
            xrefs = summary.xrefs,
            "imported program snapshot"
        );
        Ok(summary)
    }

    /// Stored binary metadata; empty when nothing has been imported.
    pub fn binary_record(&self) -> DbResult<SnapshotBinary> {
        let binary = self
            .conn
            .query_row(
                "SELECT filename, processor, is_64bit, sha256, imported_at FROM binary_info WHERE id = 1",
                [],
                |row| {
                    Ok(SnapshotBinary {
                        filename: row.get(0)?,
                        processor: row.get(1)?,
                        is_64bit: row.get(2)?,
                        sha256: row.get(3)?,
                        imported_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .unwrap_or_default();
        Ok(binary)
    }

    /// Read the stored program (including applied edits) back as a snapshot.
    pub fn export_snapshot(&self) -> DbResult<ProgramSnapshot> {
        let binary = self.binary_record()?;

        let segments = self.segments()?;

        let mut functions = Vec::new();
        for info in self.list_functions()? {
            let func = info.address;
            functions.push(SnapshotFunction {
                pseudocode: self.pseudocode(func)?,
                locals: self.locals(func)?,
                instructions: self.function_instructions(func)?,
                blocks: self.function_blocks(func)?,
                address: info.address,
                end: info.end,
                name: info.name,
                comment: info.comment,
            });
        }

        let xrefs = self.query_xrefs("SELECT from_addr, to_addr, kind FROM xrefs ORDER BY id", None)?;

        let mut stmt = self.conn.prepare("SELECT address, content FROM strings ORDER BY address")?;
        let strings = stmt
            .query_map([], |row| {
                Ok(StringLiteral { address: from_addr(row.get(0)?), content: row.get(1)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare("SELECT address, name FROM data_names ORDER BY address")?;
        let data_names = stmt
            .query_map([], |row| Ok(DataName { address: from_addr(row.get(0)?), name: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt =
            self.conn.prepare("SELECT address, type_name FROM data_types ORDER BY address")?;
        let data_types = stmt
            .query_map([], |row| {
                Ok(DataType { address: from_addr(row.get(0)?), type_name: row.get(1)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProgramSnapshot { binary, segments, functions, xrefs, strings, data_names, data_types })
    }

    /// List all functions (ordered by entry address).
    pub fn list_functions(&self) -> DbResult<Vec<FunctionInfo>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT address, end_addr, name, comment
            FROM functions
            ORDER BY address
            "#,
        )?;
        let rows = stmt.query_map([], map_function)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Edits recorded for `func`, oldest first.
    pub fn edit_log(&self, func: FunctionAddress) -> DbResult<Vec<EditLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT function, field, old_value, new_value
            FROM edit_log
            WHERE function = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![addr(func.0)], |row| {
            Ok(EditLogEntry {
                function: FunctionAddress(from_addr(row.get(0)?)),
                field: row.get(1)?,
                old_value: row.get(2)?,
                new_value: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn record_edit(
        &self,
        func: FunctionAddress,
        field: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO edit_log (function, field, old_value, new_value, applied_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![addr(func.0), field, old_value, new_value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn segments(&self) -> DbResult<Vec<SegmentRecord>> {
        let mut stmt =
            self.conn.prepare("SELECT name, start_addr, end_addr FROM segments ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(SegmentRecord {
                name: row.get(0)?,
                start: from_addr(row.get(1)?),
                end: from_addr(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn lookup_function(&self, address: u64) -> DbResult<Option<FunctionInfo>> {
        Ok(self
            .conn
            .query_row(
                "SELECT address, end_addr, name, comment FROM functions WHERE address = ?1",
                params![addr(address)],
                map_function,
            )
            .optional()?)
    }

    fn lookup_containing(&self, address: u64) -> DbResult<Option<FunctionInfo>> {
        let candidate = self
            .conn
            .query_row(
                r#"
                SELECT address, end_addr, name, comment
                FROM functions
                WHERE address <= ?1
                ORDER BY address DESC
                LIMIT 1
                "#,
                params![addr(address)],
                map_function,
            )
            .optional()?;
        Ok(candidate.filter(|f| f.contains(address)))
    }

    fn require_function(&self, func: FunctionAddress) -> OracleResult<FunctionInfo> {
        self.lookup_function(func.0)?.ok_or(OracleError::NoFunction(func.0))
    }

    fn pseudocode(&self, func: FunctionAddress) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT pseudocode FROM functions WHERE address = ?1",
                params![addr(func.0)],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    fn locals(&self, func: FunctionAddress) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM local_variables WHERE function = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![addr(func.0)], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn function_instructions(&self, func: FunctionAddress) -> DbResult<Vec<Instruction>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT address, size, disasm, is_call, operands
            FROM instructions
            WHERE function = ?1
            ORDER BY address
            "#,
        )?;
        let rows = stmt.query_map(params![addr(func.0)], |row| {
            Ok((
                from_addr(row.get(0)?),
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (address, size, disasm, is_call, operands) = row?;
            out.push(Instruction {
                address,
                size,
                disasm,
                is_call,
                operands: serde_json::from_str(&operands)?,
            });
        }
        Ok(out)
    }

    fn function_blocks(&self, func: FunctionAddress) -> DbResult<Vec<BasicBlock>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT start_addr, end_addr, successors
            FROM basic_blocks
            WHERE function = ?1
            ORDER BY start_addr
            "#,
        )?;
        let rows = stmt.query_map(params![addr(func.0)], |row| {
            Ok((from_addr(row.get(0)?), from_addr(row.get(1)?), row.get::<_, String>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (start, end, successors) = row?;
            out.push(BasicBlock { start, end, successors: serde_json::from_str(&successors)? });
        }
        Ok(out)
    }

    fn query_xrefs(&self, sql: &str, address: Option<u64>) -> DbResult<Vec<Xref>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &Row<'_>| {
            Ok((from_addr(row.get(0)?), from_addr(row.get(1)?), row.get::<_, String>(2)?))
        };
        let rows = match address {
            Some(a) => stmt.query_map(params![addr(a)], map)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter()
            .map(|(from, to, kind)| {
                let kind = XrefKind::parse(&kind).ok_or(DbError::UnknownXrefKind(kind))?;
                Ok(Xref { from, to, kind })
            })
            .collect()
    }

    fn single_text(&self, sql: &str, address: u64) -> DbResult<Option<String>> {
        Ok(self.conn.query_row(sql, params![addr(address)], |row| row.get(0)).optional()?)
    }
}

/// Log and discard a storage failure on a query that cannot report errors.
fn soft<T>(result: DbResult<T>, what: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(error = %err, "program database query failed: {what}");
            None
        }
    }
}

impl SymbolOracle for ProjectDb {
    fn binary_info(&self) -> BinaryInfo {
        let binary = soft(
            self.conn
                .query_row(
                    "SELECT filename, processor, is_64bit FROM binary_info WHERE id = 1",
                    [],
                    |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
                    },
                )
                .optional()
                .map_err(DbError::from),
            "binary_info",
        )
        .flatten()
        .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string(), false));
        let segments = self.segment_names();
        BinaryInfo::detect(binary.0, binary.1, binary.2, segments.iter().map(String::as_str))
    }

    fn function(&self, addr: u64) -> Option<FunctionInfo> {
        soft(self.lookup_function(addr), "function").flatten()
    }

    fn function_containing(&self, addr: u64) -> Option<FunctionInfo> {
        soft(self.lookup_containing(addr), "function_containing").flatten()
    }

    fn functions(&self) -> Vec<FunctionInfo> {
        soft(self.list_functions(), "functions").unwrap_or_default()
    }

    fn function_by_name(&self, name: &str) -> Option<FunctionInfo> {
        soft(
            self.conn
                .query_row(
                    "SELECT address, end_addr, name, comment FROM functions WHERE name = ?1",
                    params![name],
                    map_function,
                )
                .optional()
                .map_err(DbError::from),
            "function_by_name",
        )
        .flatten()
    }

    fn instructions(&self, func: FunctionAddress) -> OracleResult<Vec<Instruction>> {
        self.require_function(func)?;
        Ok(self.function_instructions(func)?)
    }

    fn instruction_at(&self, address: u64) -> Option<Instruction> {
        let row = soft(
            self.conn
                .query_row(
                    "SELECT size, disasm, is_call, operands FROM instructions WHERE address = ?1",
                    params![addr(address)],
                    |row| {
                        Ok((
                            row.get::<_, u32>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, bool>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(DbError::from),
            "instruction_at",
        )
        .flatten()?;
        let (size, disasm, is_call, operands) = row;
        let operands = soft(serde_json::from_str(&operands).map_err(DbError::from), "operands")?;
        Some(Instruction { address, size, disasm, is_call, operands })
    }

    fn basic_blocks(&self, func: FunctionAddress) -> OracleResult<Vec<BasicBlock>> {
        self.require_function(func)?;
        Ok(self.function_blocks(func)?)
    }

    fn xrefs_from(&self, address: u64) -> Vec<Xref> {
        soft(
            self.query_xrefs(
                "SELECT from_addr, to_addr, kind FROM xrefs WHERE from_addr = ?1 ORDER BY id",
                Some(address),
            ),
            "xrefs_from",
        )
        .unwrap_or_default()
    }

    fn xrefs_to(&self, address: u64) -> Vec<Xref> {
        soft(
            self.query_xrefs(
                "SELECT from_addr, to_addr, kind FROM xrefs WHERE to_addr = ?1 ORDER BY id",
                Some(address),
            ),
            "xrefs_to",
        )
        .unwrap_or_default()
    }

    fn name_at(&self, address: u64) -> Option<String> {
        self.function(address).map(|f| f.name).or_else(|| {
            soft(self.single_text("SELECT name FROM data_names WHERE address = ?1", address), "name_at")
                .flatten()
        })
    }

    fn type_at(&self, address: u64) -> Option<String> {
        soft(
            self.single_text("SELECT type_name FROM data_types WHERE address = ?1", address),
            "type_at",
        )
        .flatten()
    }

    fn string_at(&self, address: u64) -> Option<String> {
        soft(self.single_text("SELECT content FROM strings WHERE address = ?1", address), "string_at")
            .flatten()
    }

    fn is_code(&self, address: u64) -> bool {
        let hit: Option<i64> = soft(
            self.conn
                .query_row(
                    "SELECT 1 FROM instructions WHERE address = ?1",
                    params![addr(address)],
                    |row| row.get(0),
                )
                .optional()
                .map_err(DbError::from),
            "is_code",
        )
        .flatten();
        hit.is_some() || self.function_containing(address).is_some()
    }

    fn segment_names(&self) -> Vec<String> {
        soft(self.segments(), "segments")
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    fn decompile(&self, func: FunctionAddress) -> OracleResult<String> {
        self.require_function(func)?;
        self.pseudocode(func)?.ok_or(OracleError::DecompilationUnavailable(func.0))
    }

    fn local_variables(&self, func: FunctionAddress) -> OracleResult<Vec<String>> {
        self.require_function(func)?;
        Ok(self.locals(func)?)
    }

    fn set_function_comment(&mut self, func: FunctionAddress, comment: &str) -> OracleResult<()> {
        let current = self.require_function(func)?;
        self.conn
            .execute(
                "UPDATE functions SET comment = ?2 WHERE address = ?1",
                params![addr(func.0), comment],
            )
            .map_err(DbError::from)?;
        self.record_edit(func, "comment", current.comment.as_deref(), comment)?;
        Ok(())
    }

    fn set_function_name(&mut self, func: FunctionAddress, name: &str) -> OracleResult<()> {
        validate_identifier(name)?;
        let current = self.require_function(func)?;
        if current.name == name {
            return Ok(());
        }
        let taken: Option<i64> = self
            .conn
            .query_row(
                r#"
                SELECT 1 FROM functions WHERE name = ?1 AND address != ?2
                UNION ALL
                SELECT 1 FROM data_names WHERE name = ?1
                LIMIT 1
                "#,
                params![name, addr(func.0)],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)?;
        if taken.is_some() {
            return Err(OracleError::NameInUse(name.to_string()));
        }
        self.conn
            .execute("UPDATE functions SET name = ?2 WHERE address = ?1", params![addr(func.0), name])
            .map_err(DbError::from)?;
        self.record_edit(func, "function_name", Some(&current.name), name)?;
        Ok(())
    }

    fn rename_local(&mut self, func: FunctionAddress, old: &str, new: &str) -> OracleResult<()> {
        validate_identifier(new)?;
        self.require_function(func)?;
        let locals = self.locals(func)?;
        if locals.iter().any(|l| l == new) {
            return Err(OracleError::NameInUse(new.to_string()));
        }
        if !locals.iter().any(|l| l == old) {
            return Err(OracleError::NoSuchVariable { function: func.0, name: old.to_string() });
        }

        let tx = self.conn.unchecked_transaction().map_err(DbError::from)?;
        tx.execute(
            "UPDATE local_variables SET name = ?3 WHERE function = ?1 AND name = ?2",
            params![addr(func.0), old, new],
        )
        .map_err(DbError::from)?;
        if let Some(code) = self.pseudocode(func)? {
            tx.execute(
                "UPDATE functions SET pseudocode = ?2 WHERE address = ?1",
                params![addr(func.0), rename_in_pseudocode(&code, old, new)],
            )
            .map_err(DbError::from)?;
        }
        tx.commit().map_err(DbError::from)?;
        self.record_edit(func, "variable", Some(old), new)?;
        Ok(())
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: program tables (binary_info, segments, functions, local_variables,
///   instructions, basic_blocks, xrefs, strings, data_names, data_types)
/// - 2: add edit_log table
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS binary_info (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                filename    TEXT NOT NULL,
                processor   TEXT NOT NULL,
                is_64bit    INTEGER NOT NULL,
                sha256      TEXT,
                imported_at TEXT
            );

            CREATE TABLE IF NOT EXISTS segments (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                start_addr INTEGER NOT NULL,
                end_addr   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS functions (
                address    INTEGER PRIMARY KEY,
                end_addr   INTEGER NOT NULL,
                name       TEXT NOT NULL,
                comment    TEXT,
                pseudocode TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_functions_name ON functions(name);

            CREATE TABLE IF NOT EXISTS local_variables (
                function INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name     TEXT NOT NULL,
                PRIMARY KEY (function, position)
            );

            CREATE TABLE IF NOT EXISTS instructions (
                address  INTEGER PRIMARY KEY,
                function INTEGER NOT NULL,
                size     INTEGER NOT NULL,
                disasm   TEXT NOT NULL,
                is_call  INTEGER NOT NULL,
                operands TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_instructions_function ON instructions(function, address);

            CREATE TABLE IF NOT EXISTS basic_blocks (
                function   INTEGER NOT NULL,
                start_addr INTEGER NOT NULL,
                end_addr   INTEGER NOT NULL,
                successors TEXT NOT NULL,
                PRIMARY KEY (function, start_addr)
            );

            CREATE TABLE IF NOT EXISTS xrefs (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                from_addr INTEGER NOT NULL,
                to_addr   INTEGER NOT NULL,
                kind      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_xrefs_from ON xrefs(from_addr);
            CREATE INDEX IF NOT EXISTS idx_xrefs_to ON xrefs(to_addr);

            CREATE TABLE IF NOT EXISTS strings (
                address INTEGER PRIMARY KEY,
                content TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS data_names (
                address INTEGER PRIMARY KEY,
                name    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS data_types (
                address   INTEGER PRIMARY KEY,
                type_name TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS edit_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                function   INTEGER NOT NULL,
                field      TEXT NOT NULL,
                old_value  TEXT,
                new_value  TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
