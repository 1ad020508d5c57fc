//! Row mappings for the MediaWiki tables exposed by the wiki replicas.
//!
//! Only public columns are mapped; the replica views hide the rest anyway.

use rusqlite::Row;
use serde::Serialize;

use crate::router::EntityKind;

/// A read-only mapping of one replica table.
pub trait ReplicaEntity: Sized {
    const KIND: EntityKind;
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn table() -> &'static str {
        Self::KIND.table()
    }

    fn select_list() -> String {
        Self::COLUMNS.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub page_id: i64,
    pub page_namespace: i64,
    pub page_title: String,
    pub page_is_redirect: bool,
    pub page_is_new: bool,
    pub page_random: f64,
    pub page_touched: String,
    pub page_links_updated: Option<String>,
    pub page_latest: i64,
    pub page_len: i64,
    pub page_content_model: Option<String>,
    pub page_lang: Option<String>,
}

impl ReplicaEntity for Page {
    const KIND: EntityKind = EntityKind::Page;
    const COLUMNS: &'static [&'static str] = &[
        "page_id",
        "page_namespace",
        "page_title",
        "page_is_redirect",
        "page_is_new",
        "page_random",
        "page_touched",
        "page_links_updated",
        "page_latest",
        "page_len",
        "page_content_model",
        "page_lang",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            page_id: row.get("page_id")?,
            page_namespace: row.get("page_namespace")?,
            page_title: row.get("page_title")?,
            page_is_redirect: row.get("page_is_redirect")?,
            page_is_new: row.get("page_is_new")?,
            page_random: row.get("page_random")?,
            page_touched: row.get("page_touched")?,
            page_links_updated: row.get("page_links_updated")?,
            page_latest: row.get("page_latest")?,
            page_len: row.get("page_len")?,
            page_content_model: row.get("page_content_model")?,
            page_lang: row.get("page_lang")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub rev_id: i64,
    pub rev_page: i64,
    pub rev_comment_id: i64,
    pub rev_actor: i64,
    pub rev_timestamp: String,
    pub rev_minor_edit: bool,
    pub rev_deleted: i64,
    pub rev_len: Option<i64>,
    pub rev_parent_id: Option<i64>,
    pub rev_sha1: String,
}

impl ReplicaEntity for Revision {
    const KIND: EntityKind = EntityKind::Revision;
    const COLUMNS: &'static [&'static str] = &[
        "rev_id",
        "rev_page",
        "rev_comment_id",
        "rev_actor",
        "rev_timestamp",
        "rev_minor_edit",
        "rev_deleted",
        "rev_len",
        "rev_parent_id",
        "rev_sha1",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rev_id: row.get("rev_id")?,
            rev_page: row.get("rev_page")?,
            rev_comment_id: row.get("rev_comment_id")?,
            rev_actor: row.get("rev_actor")?,
            rev_timestamp: row.get("rev_timestamp")?,
            rev_minor_edit: row.get("rev_minor_edit")?,
            rev_deleted: row.get("rev_deleted")?,
            rev_len: row.get("rev_len")?,
            rev_parent_id: row.get("rev_parent_id")?,
            rev_sha1: row.get("rev_sha1")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub actor_id: i64,
    /// `None` for IP editors and imported actors.
    pub actor_user: Option<i64>,
    pub actor_name: String,
}

impl ReplicaEntity for Actor {
    const KIND: EntityKind = EntityKind::Actor;
    const COLUMNS: &'static [&'static str] = &["actor_id", "actor_user", "actor_name"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            actor_id: row.get("actor_id")?,
            actor_user: row.get("actor_user")?,
            actor_name: row.get("actor_name")?,
        })
    }
}

/// A row of the wiki's `user` table. Not the tool's own user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaUser {
    pub user_id: i64,
    pub user_name: String,
    pub user_real_name: String,
    pub user_touched: String,
    pub user_registration: Option<String>,
    pub user_editcount: Option<i64>,
}

impl ReplicaEntity for ReplicaUser {
    const KIND: EntityKind = EntityKind::ReplicaUser;
    const COLUMNS: &'static [&'static str] = &[
        "user_id",
        "user_name",
        "user_real_name",
        "user_touched",
        "user_registration",
        "user_editcount",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            user_name: row.get("user_name")?,
            user_real_name: row.get("user_real_name")?,
            user_touched: row.get("user_touched")?,
            user_registration: row.get("user_registration")?,
            user_editcount: row.get("user_editcount")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentChange {
    pub rc_id: i64,
    pub rc_timestamp: String,
    pub rc_actor: i64,
    pub rc_namespace: i64,
    pub rc_title: String,
    pub rc_comment_id: i64,
    pub rc_minor: bool,
    pub rc_bot: bool,
    pub rc_new: bool,
    pub rc_cur_id: i64,
    pub rc_this_oldid: i64,
    pub rc_last_oldid: i64,
    pub rc_type: i64,
    pub rc_source: String,
    pub rc_patrolled: i64,
    pub rc_old_len: Option<i64>,
    pub rc_new_len: Option<i64>,
    pub rc_deleted: i64,
    pub rc_logid: i64,
    pub rc_log_type: Option<String>,
    pub rc_log_action: Option<String>,
    pub rc_params: Option<String>,
}

impl ReplicaEntity for RecentChange {
    const KIND: EntityKind = EntityKind::RecentChange;
    const COLUMNS: &'static [&'static str] = &[
        "rc_id",
        "rc_timestamp",
        "rc_actor",
        "rc_namespace",
        "rc_title",
        "rc_comment_id",
        "rc_minor",
        "rc_bot",
        "rc_new",
        "rc_cur_id",
        "rc_this_oldid",
        "rc_last_oldid",
        "rc_type",
        "rc_source",
        "rc_patrolled",
        "rc_old_len",
        "rc_new_len",
        "rc_deleted",
        "rc_logid",
        "rc_log_type",
        "rc_log_action",
        "rc_params",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rc_id: row.get("rc_id")?,
            rc_timestamp: row.get("rc_timestamp")?,
            rc_actor: row.get("rc_actor")?,
            rc_namespace: row.get("rc_namespace")?,
            rc_title: row.get("rc_title")?,
            rc_comment_id: row.get("rc_comment_id")?,
            rc_minor: row.get("rc_minor")?,
            rc_bot: row.get("rc_bot")?,
            rc_new: row.get("rc_new")?,
            rc_cur_id: row.get("rc_cur_id")?,
            rc_this_oldid: row.get("rc_this_oldid")?,
            rc_last_oldid: row.get("rc_last_oldid")?,
            rc_type: row.get("rc_type")?,
            rc_source: row.get("rc_source")?,
            rc_patrolled: row.get("rc_patrolled")?,
            rc_old_len: row.get("rc_old_len")?,
            rc_new_len: row.get("rc_new_len")?,
            rc_deleted: row.get("rc_deleted")?,
            rc_logid: row.get("rc_logid")?,
            rc_log_type: row.get("rc_log_type")?,
            rc_log_action: row.get("rc_log_action")?,
            rc_params: row.get("rc_params")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub log_id: i64,
    pub log_type: String,
    pub log_action: String,
    pub log_timestamp: String,
    pub log_actor: i64,
    pub log_namespace: i64,
    pub log_title: String,
    pub log_page: Option<i64>,
    pub log_comment_id: i64,
    pub log_params: String,
    pub log_deleted: i64,
}

impl ReplicaEntity for LogEntry {
    const KIND: EntityKind = EntityKind::LogEntry;
    const COLUMNS: &'static [&'static str] = &[
        "log_id",
        "log_type",
        "log_action",
        "log_timestamp",
        "log_actor",
        "log_namespace",
        "log_title",
        "log_page",
        "log_comment_id",
        "log_params",
        "log_deleted",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            log_id: row.get("log_id")?,
            log_type: row.get("log_type")?,
            log_action: row.get("log_action")?,
            log_timestamp: row.get("log_timestamp")?,
            log_actor: row.get("log_actor")?,
            log_namespace: row.get("log_namespace")?,
            log_title: row.get("log_title")?,
            log_page: row.get("log_page")?,
            log_comment_id: row.get("log_comment_id")?,
            log_params: row.get("log_params")?,
            log_deleted: row.get("log_deleted")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PageStatistics {
    pub total_pages: u64,
    pub content_pages: u64,
    pub redirects: u64,
    pub new_pages: u64,
    pub recent_changes_count: u64,
}
