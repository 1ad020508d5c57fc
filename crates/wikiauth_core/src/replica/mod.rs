//! Read-only helpers over the wiki replica connection.
//!
//! Every row query carries a `LIMIT`; only `COUNT(*)` aggregates are unbounded.

pub mod models;

use rusqlite::{Connection, OptionalExtension, ToSql, params};

pub use models::{
    Actor, LogEntry, Page, PageStatistics, RecentChange, ReplicaEntity, ReplicaUser, Revision,
};

use crate::database::Databases;
use crate::error::{Error, Result};
use crate::router::EntityKind;

pub struct ReplicaReader<'a> {
    databases: &'a Databases,
    max_rows: usize,
}

impl<'a> ReplicaReader<'a> {
    pub fn new(databases: &'a Databases, max_rows: usize) -> Self {
        Self {
            databases,
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Requested limits above the configured maximum are clamped, not rejected.
    pub fn clamp(&self, limit: usize) -> usize {
        limit.min(self.max_rows)
    }

    /// Newest first.
    pub fn recent_changes(&self, limit: usize) -> Result<Vec<RecentChange>> {
        let limit = self.clamp(limit);
        tracing::debug!(helper = "recent_changes", limit, "replica query");
        self.select("", "ORDER BY rc_timestamp DESC, rc_id DESC", params![], limit)
    }

    pub fn page_by_title(&self, title: &str, namespace: i64) -> Result<Option<Page>> {
        let title = normalize_title(title);
        if title.is_empty() {
            return Ok(None);
        }
        tracing::debug!(helper = "page_by_title", %title, namespace, "replica query");
        self.select_one(
            "WHERE page_title = ?1 AND page_namespace = ?2",
            params![title, namespace],
        )
    }

    /// Case-insensitive substring match on the title, ordered by title.
    pub fn search_pages(&self, query: &str, namespace: i64, limit: usize) -> Result<Vec<Page>> {
        let needle = query.trim().replace(' ', "_");
        if needle.is_empty() {
            return Err(Error::invalid("search query cannot be empty"));
        }
        let limit = self.clamp(limit);
        tracing::debug!(helper = "search_pages", query = %needle, namespace, limit, "replica query");
        let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
        self.select(
            "WHERE page_namespace = ?1 AND casefold(page_title) LIKE ?2 ESCAPE '\\'",
            "ORDER BY page_title ASC, page_id ASC",
            params![namespace, pattern],
            limit,
        )
    }

    pub fn user_by_name(&self, name: &str) -> Result<Option<ReplicaUser>> {
        let name = normalize_name(name);
        tracing::debug!(helper = "user_by_name", user = %name, "replica query");
        self.select_one("WHERE user_name = ?1", params![name])
    }

    /// 0 when the user is absent or has no recorded count.
    pub fn user_edit_count(&self, name: &str) -> Result<u64> {
        Ok(self
            .user_by_name(name)?
            .and_then(|user| user.user_editcount)
            .and_then(|count| u64::try_from(count).ok())
            .unwrap_or(0))
    }

    pub fn page_statistics(&self) -> Result<PageStatistics> {
        tracing::debug!(helper = "page_statistics", "replica query");
        let pages = self.databases.read(EntityKind::Page)?;
        let count_pages = |filter: &str| count(&pages, EntityKind::Page, filter);
        let statistics = PageStatistics {
            total_pages: count_pages("")?,
            content_pages: count_pages("WHERE page_namespace = 0 AND page_is_redirect = 0")?,
            redirects: count_pages("WHERE page_is_redirect = 1")?,
            new_pages: count_pages("WHERE page_is_new = 1")?,
            recent_changes_count: count(
                &self.databases.read(EntityKind::RecentChange)?,
                EntityKind::RecentChange,
                "",
            )?,
        };
        Ok(statistics)
    }

    /// Newest first.
    pub fn page_revisions(&self, page_id: i64, limit: usize) -> Result<Vec<Revision>> {
        let limit = self.clamp(limit);
        tracing::debug!(helper = "page_revisions", page_id, limit, "replica query");
        self.select(
            "WHERE rev_page = ?1",
            "ORDER BY rev_timestamp DESC, rev_id DESC",
            params![page_id],
            limit,
        )
    }

    /// Most recently touched first.
    pub fn namespace_pages(&self, namespace: i64, limit: usize) -> Result<Vec<Page>> {
        let limit = self.clamp(limit);
        tracing::debug!(helper = "namespace_pages", namespace, limit, "replica query");
        self.select(
            "WHERE page_namespace = ?1",
            "ORDER BY page_touched DESC, page_id DESC",
            params![namespace],
            limit,
        )
    }

    /// Newest first, optionally restricted to one log type.
    pub fn log_entries(&self, log_type: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        let limit = self.clamp(limit);
        tracing::debug!(helper = "log_entries", log_type, limit, "replica query");
        let order = "ORDER BY log_timestamp DESC, log_id DESC";
        match log_type.map(str::trim).filter(|value| !value.is_empty()) {
            Some(log_type) => self.select("WHERE log_type = ?1", order, params![log_type], limit),
            None => self.select("", order, params![], limit),
        }
    }

    pub fn actor_by_name(&self, name: &str) -> Result<Option<Actor>> {
        let name = normalize_name(name);
        tracing::debug!(helper = "actor_by_name", actor = %name, "replica query");
        self.select_one("WHERE actor_name = ?1", params![name])
    }

    fn select_one<T: ReplicaEntity>(
        &self,
        filter: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<T>> {
        let connection = self.databases.read(T::KIND)?;
        let sql = format!(
            "SELECT {} FROM {} {filter} LIMIT 1",
            T::select_list(),
            T::table()
        );
        connection
            .query_row(&sql, params, T::from_row)
            .optional()
            .map_err(|error| query_failed(T::KIND, error))
    }

    fn select<T: ReplicaEntity>(
        &self,
        filter: &str,
        order: &str,
        params: &[&dyn ToSql],
        limit: usize,
    ) -> Result<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let connection = self.databases.read(T::KIND)?;
        let sql = format!(
            "SELECT {} FROM {} {filter} {order} LIMIT {limit}",
            T::select_list(),
            T::table()
        );
        let mut statement = connection
            .prepare(&sql)
            .map_err(|error| query_failed(T::KIND, error))?;
        let rows = statement
            .query_map(params, T::from_row)
            .map_err(|error| query_failed(T::KIND, error))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|error| query_failed(T::KIND, error))
    }
}

fn count(connection: &Connection, kind: EntityKind, filter: &str) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {} {filter}", kind.table());
    let value: i64 = connection
        .query_row(&sql, [], |row| row.get(0))
        .map_err(|error| query_failed(kind, error))?;
    Ok(u64::try_from(value).unwrap_or(0))
}

fn query_failed(kind: EntityKind, error: rusqlite::Error) -> Error {
    Error::replica(format!("failed to query {}: {error}", kind.table()))
}

/// Database form of a title: trimmed, spaces as underscores, first letter upper-cased.
pub fn normalize_title(title: &str) -> String {
    normalize_name(title).replace(' ', "_")
}

/// Canonical user or actor name: trimmed, first letter upper-cased, spaces kept.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
