#![forbid(unsafe_code)]
//! Schema initialisation for the gazetteer record store.

use rusqlite::{Connection, Error as SqliteError, OptionalExtension};
use thiserror::Error;

/// Version stamped into freshly initialised databases.
pub const SCHEMA_VERSION: i64 = 1;

/// Initialise the gazetteer schema inside an existing SQLite database.
///
/// The function enables foreign keys, creates the entity tables and their
/// indexes, and records the schema version. Existing installations must
/// already match the expected version; mismatches are rejected so migrations
/// can be applied explicitly.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use gazetteer_data::store::initialise_schema;
///
/// let mut conn = Connection::open_in_memory().unwrap();
/// initialise_schema(&mut conn).unwrap();
///
/// let version: i64 = conn
///     .query_row("SELECT version FROM gazetteer_schema_version LIMIT 1", [], |row| row.get(0))
///     .unwrap();
/// assert_eq!(version, 1);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction()
        .map_err(|source| SchemaError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_entity_tables(&transaction)?;
    create_gazetteer_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|source| SchemaError::Migration {
            step: "commit schema transaction",
            source,
        })?;

    Ok(())
}

fn create_entity_tables(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create points",
        "CREATE TABLE IF NOT EXISTS points (
            id INTEGER PRIMARY KEY,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            way_reference INTEGER,
            relation_reference INTEGER,
            role TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create ways",
        "CREATE TABLE IF NOT EXISTS ways (
            id INTEGER PRIMARY KEY,
            relation_reference INTEGER,
            role TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create relations",
        "CREATE TABLE IF NOT EXISTS relations (
            id INTEGER PRIMARY KEY,
            role TEXT NOT NULL DEFAULT '',
            relation_reference INTEGER
        )",
    )?;
    run_migration_step(
        transaction,
        "create tags",
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reference INTEGER NOT NULL,
            owner_kind TEXT NOT NULL CHECK (owner_kind IN ('point', 'way', 'relation')),
            key TEXT NOT NULL,
            value TEXT NOT NULL
        )",
    )
}

fn create_gazetteer_tables(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create geonames",
        "CREATE TABLE IF NOT EXISTS geonames (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            ascii_name TEXT NOT NULL,
            alternate_names TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            feature_class TEXT NOT NULL,
            feature_code TEXT NOT NULL,
            cc2 TEXT NOT NULL,
            admin1 TEXT NOT NULL,
            admin2 TEXT NOT NULL,
            admin3 TEXT NOT NULL,
            admin4 TEXT NOT NULL,
            population INTEGER NOT NULL,
            elevation INTEGER NOT NULL DEFAULT 0,
            digital_elevation TEXT NOT NULL,
            timezone TEXT NOT NULL,
            modified_on TEXT NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create feature_codes",
        "CREATE TABLE IF NOT EXISTS feature_codes (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "index tags by owner",
        "CREATE INDEX IF NOT EXISTS idx_tags_reference
            ON tags(reference, owner_kind, key)",
    )?;
    run_migration_step(
        transaction,
        "index points by way",
        "CREATE INDEX IF NOT EXISTS idx_points_way_reference
            ON points(way_reference)",
    )?;
    run_migration_step(
        transaction,
        "index points by relation",
        "CREATE INDEX IF NOT EXISTS idx_points_relation_reference
            ON points(relation_reference)",
    )?;
    run_migration_step(
        transaction,
        "index ways by relation",
        "CREATE INDEX IF NOT EXISTS idx_ways_relation_reference
            ON ways(relation_reference)",
    )
}

fn ensure_schema_version(transaction: &rusqlite::Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS gazetteer_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM gazetteer_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SchemaError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        None => {
            transaction
                .execute(
                    "INSERT INTO gazetteer_schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(|source| SchemaError::Migration {
                    step: "record schema version",
                    source,
                })?;
        }
    }

    Ok(())
}

fn run_migration_step(
    transaction: &rusqlite::Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SchemaError::Migration { step, source })
}

/// Errors raised when initialising the gazetteer schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Enabling SQLite foreign keys failed.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A migration step failed to execute.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Name of the failing step.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// An existing database carries an unexpected schema version.
    #[error("expected gazetteer schema version {expected} but found {found}; apply migrations before retrying")]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version found in the database.
        found: i64,
    },
}
