use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};

use crate::database::Databases;
use crate::router::EntityKind;

struct Migration {
    version: u32,
    name: &'static str,
    entities: &'static [EntityKind],
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        entities: &[EntityKind::User, EntityKind::Credential],
        sql: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "indexes",
        entities: &[EntityKind::User, EntityKind::Credential],
        sql: include_str!("migrations/v002_indexes.sql"),
    },
];

/// Report returned after running migrations.
#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub connection: String,
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Run all pending migrations against the primary connection.
/// Creates the database and parent directories if they do not exist.
pub fn run_migrations(databases: &Databases) -> Result<MigrateReport> {
    let mut connection = databases.write(EntityKind::SchemaMigration)?;
    let connection_name = databases.router().primary_name().to_string();
    ensure_schema_migrations_table(&connection)?;

    let current = current_version(&connection)?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        if let Some(kind) = migration
            .entities
            .iter()
            .find(|kind| !databases.router().allow_migrate(&connection_name, **kind))
        {
            bail!(
                "migration v{:03}_{} touches {kind}, which may not be migrated on {connection_name}",
                migration.version,
                migration.name
            );
        }
        apply_migration(&mut connection, migration).with_context(|| {
            format!(
                "failed to apply migration v{:03}_{}",
                migration.version, migration.name
            )
        })?;
        tracing::info!(version = migration.version, name = migration.name, "applied migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    let final_version = current_version(&connection)?;
    Ok(MigrateReport {
        connection: connection_name,
        applied,
        current_version: final_version,
    })
}

/// Returns the number of migrations that have not yet been applied.
///
/// Read-only: a database without `schema_migrations` counts as version 0.
pub fn pending_migration_count(databases: &Databases) -> Result<usize> {
    if !databases.primary_path().exists() {
        return Ok(MIGRATIONS.len());
    }
    let connection = databases.read(EntityKind::SchemaMigration)?;
    let current = if schema_migrations_exists(&connection)? {
        current_version(&connection)?
    } else {
        0
    };
    Ok(MIGRATIONS.iter().filter(|m| m.version > current).count())
}

fn schema_migrations_exists(connection: &Connection) -> Result<bool> {
    let found: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get(0),
        )
        .context("failed to look up schema_migrations table")?;
    Ok(found > 0)
}

/// Returns the highest applied migration version, or 0 if none applied.
pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read current migration version")?;
    u32::try_from(version).context("migration version does not fit into u32")
}

fn ensure_schema_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at_unix INTEGER NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

/// Each migration runs in its own savepoint; dropping it uncommitted rolls back.
fn apply_migration(connection: &mut Connection, migration: &Migration) -> Result<()> {
    let savepoint = connection
        .savepoint()
        .context("failed to open migration savepoint")?;
    savepoint
        .execute_batch(migration.sql)
        .with_context(|| format!("SQL execution failed for v{:03}", migration.version))?;
    savepoint
        .execute(
            "INSERT INTO schema_migrations (version, name, applied_at_unix) VALUES (?1, ?2, ?3)",
            params![
                i64::from(migration.version),
                migration.name,
                crate::unix_timestamp().context("system clock error")?,
            ],
        )
        .context("failed to record migration")?;
    savepoint
        .commit()
        .context("failed to commit migration savepoint")
}
