use std::fs;
use std::path::Path;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};

use crate::config::{ConnectionSettings, Settings};
use crate::error::{Error, Result};
use crate::router::{DatabaseRouter, EntityKind, Store};

/// Opens connections by asking the router which one an entity lives on.
///
/// Connections are opened per call and owned by the caller; nothing is pooled
/// or shared between requests.
#[derive(Debug, Clone)]
pub struct Databases {
    router: DatabaseRouter,
    primary: ConnectionSettings,
    replica: ConnectionSettings,
}

impl Databases {
    pub fn new(settings: &Settings) -> Self {
        Self::from_parts(settings.primary.clone(), settings.replica.connection.clone())
    }

    pub fn from_parts(primary: ConnectionSettings, replica: ConnectionSettings) -> Self {
        Self {
            router: DatabaseRouter::new(&primary.name, &replica.name),
            primary,
            replica,
        }
    }

    pub fn router(&self) -> &DatabaseRouter {
        &self.router
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary.path
    }

    pub fn replica_path(&self) -> &Path {
        &self.replica.path
    }

    pub fn read(&self, kind: EntityKind) -> Result<Connection> {
        let name = self.router.route_for_read(kind);
        tracing::debug!(entity = %kind, connection = name, "routing read");
        self.open(name)
    }

    /// Fails with `ReadOnlyViolation` before anything is opened when `kind` is replica-backed.
    pub fn write(&self, kind: EntityKind) -> Result<Connection> {
        let name = self.router.route_for_write(kind)?;
        tracing::debug!(entity = %kind, connection = name, "routing write");
        self.open(name)
    }

    pub fn open(&self, name: &str) -> Result<Connection> {
        if name == self.router.connection_for(Store::Primary) {
            open_primary(&self.primary.path)
        } else if name == self.router.connection_for(Store::Replica) {
            open_replica(&self.replica.path)
        } else {
            Err(Error::primary(format!("unknown connection {name}")))
        }
    }
}

fn open_primary(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| {
            Error::primary(format!(
                "failed to create database parent directory {}: {error}",
                parent.display()
            ))
        })?;
    }
    let connection = Connection::open(db_path)
        .map_err(|error| Error::primary(format!("failed to open {}: {error}", db_path.display())))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .map_err(|error| Error::primary(format!("failed to set sqlite busy timeout: {error}")))?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .map_err(|error| Error::primary(format!("failed to enable foreign_keys pragma: {error}")))?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .map_err(|error| Error::primary(format!("failed to enable WAL journal mode: {error}")))?;
    Ok(connection)
}

fn open_replica(db_path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(db_path, flags)
        .map_err(|error| Error::replica(format!("failed to open {}: {error}", db_path.display())))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .map_err(|error| Error::replica(format!("failed to set sqlite busy timeout: {error}")))?;
    connection
        .pragma_update(None, "query_only", "ON")
        .map_err(|error| Error::replica(format!("failed to enable query_only pragma: {error}")))?;
    register_casefold(&connection)?;
    Ok(connection)
}

/// `casefold(text)`: Unicode lower-casing, since SQLite's `LIKE` and `lower()` only fold ASCII.
fn register_casefold(connection: &Connection) -> Result<()> {
    connection
        .create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|value| value.to_lowercase()))
            },
        )
        .map_err(|error| Error::replica(format!("failed to register casefold function: {error}")))
}
