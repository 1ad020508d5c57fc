use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Every entity the tool reads or writes, tagged with the store that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Credential,
    SchemaMigration,
    Page,
    Revision,
    Actor,
    ReplicaUser,
    RecentChange,
    LogEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Store {
    Primary,
    Replica,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        Self::User,
        Self::Credential,
        Self::SchemaMigration,
        Self::Page,
        Self::Revision,
        Self::Actor,
        Self::ReplicaUser,
        Self::RecentChange,
        Self::LogEntry,
    ];

    pub fn store(self) -> Store {
        match self {
            Self::User | Self::Credential | Self::SchemaMigration => Store::Primary,
            Self::Page
            | Self::Revision
            | Self::Actor
            | Self::ReplicaUser
            | Self::RecentChange
            | Self::LogEntry => Store::Replica,
        }
    }

    pub fn is_replica(self) -> bool {
        self.store() == Store::Replica
    }

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Credential => "social_auth",
            Self::SchemaMigration => "schema_migrations",
            Self::Page => "page",
            Self::Revision => "revision",
            Self::Actor => "actor",
            Self::ReplicaUser => "user",
            Self::RecentChange => "recentchanges",
            Self::LogEntry => "logging",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|kind| {
            kind.table() == normalized || kind.to_string().replace(' ', "_") == normalized
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::Credential => "credential",
            Self::SchemaMigration => "schema migration",
            Self::Page => "page",
            Self::Revision => "revision",
            Self::Actor => "actor",
            Self::ReplicaUser => "replica user",
            Self::RecentChange => "recent change",
            Self::LogEntry => "log entry",
        };
        f.write_str(label)
    }
}

/// Routes entities to the primary or replica connection by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRouter {
    primary: String,
    replica: String,
}

impl DatabaseRouter {
    pub fn new(primary: impl Into<String>, replica: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            replica: replica.into(),
        }
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    pub fn replica_name(&self) -> &str {
        &self.replica
    }

    pub fn connection_for(&self, store: Store) -> &str {
        match store {
            Store::Primary => &self.primary,
            Store::Replica => &self.replica,
        }
    }

    pub fn route_for_read(&self, kind: EntityKind) -> &str {
        self.connection_for(kind.store())
    }

    pub fn route_for_write(&self, kind: EntityKind) -> Result<&str> {
        match kind.store() {
            Store::Primary => Ok(&self.primary),
            Store::Replica => {
                tracing::warn!(entity = %kind, "rejected write against replica entity");
                Err(Error::ReadOnlyViolation { entity: kind })
            }
        }
    }

    /// Relations are only possible within one connection; the stores cannot be joined.
    pub fn allow_relation(&self, a: EntityKind, b: EntityKind) -> bool {
        self.route_for_read(a) == self.route_for_read(b)
    }

    /// Replica tables exist upstream and are never migrated.
    pub fn allow_migrate(&self, connection: &str, kind: EntityKind) -> bool {
        match kind.store() {
            Store::Replica => false,
            Store::Primary => connection == self.primary,
        }
    }
}
