use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::{Value, json};

use crate::database::Databases;
use crate::error::{Error, Result};
use crate::oauth::AccessToken;
use crate::router::EntityKind;

/// Provider name under which wiki OAuth credentials are stored.
pub const PROVIDER: &str = "mediawiki";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at_unix: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub uid: String,
    pub extra_data: Value,
    pub created_at_unix: i64,
    pub updated_at_unix: i64,
}

impl Credential {
    /// Extract `extra_data.access_token.{oauth_token, oauth_token_secret}`.
    /// On failure returns the name of the missing half.
    pub fn access_token(&self) -> Result<AccessToken, &'static str> {
        let access = self.extra_data.get("access_token");
        let field = |name: &'static str| {
            access
                .and_then(|value| value.get(name))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or(name)
        };
        let token = field("oauth_token")?;
        let secret = field("oauth_token_secret")?;
        Ok(AccessToken::new(token, secret))
    }
}

/// `extra_data` layout written after a successful handshake.
pub fn extra_data_for(token: &AccessToken, username: &str, wiki_user_id: i64) -> Value {
    json!({
        "id": wiki_user_id,
        "username": username,
        "access_token": {
            "oauth_token": token.token,
            "oauth_token_secret": token.secret,
        },
    })
}

/// Users and their linked wiki credentials, in the primary database.
pub struct CredentialStore<'a> {
    databases: &'a Databases,
}

impl<'a> CredentialStore<'a> {
    pub fn new(databases: &'a Databases) -> Self {
        Self { databases }
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let connection = self.databases.read(EntityKind::User)?;
        load_user(&connection, username.trim())
    }

    /// Returns the user, creating it on first login.
    pub fn ensure_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::invalid("username cannot be empty"));
        }
        let connection = self.databases.write(EntityKind::User)?;
        let now = now()?;
        connection
            .execute(
                "INSERT INTO users (username, created_at_unix) VALUES (?1, ?2)
                 ON CONFLICT(username) DO NOTHING",
                params![username, now],
            )
            .map_err(|error| Error::primary(format!("failed to insert user {username}: {error}")))?;
        load_user(&connection, username)?
            .ok_or_else(|| Error::primary(format!("user {username} vanished after insert")))
    }

    pub fn credential_for(&self, user: &User) -> Result<Option<Credential>> {
        let connection = self.databases.read(EntityKind::Credential)?;
        connection
            .query_row(
                "SELECT id, user_id, provider, uid, extra_data, created_at_unix, updated_at_unix
                 FROM social_auth
                 WHERE user_id = ?1 AND provider = ?2",
                params![user.id, PROVIDER],
                credential_from_row,
            )
            .optional()
            .map_err(|error| {
                Error::primary(format!(
                    "failed to load credential for {}: {error}",
                    user.username
                ))
            })
    }

    /// A missing credential is the normal "not linked" state, not an error.
    pub fn has_oauth(&self, user: &User) -> Result<bool> {
        Ok(self.credential_for(user)?.is_some())
    }

    /// Insert or replace the user's credential.
    pub fn link(&self, user: &User, uid: &str, extra_data: &Value) -> Result<Credential> {
        let connection = self.databases.write(EntityKind::Credential)?;
        let now = now()?;
        let serialized = extra_data.to_string();
        connection
            .execute(
                "INSERT INTO social_auth (user_id, provider, uid, extra_data, created_at_unix, updated_at_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                     uid = excluded.uid,
                     extra_data = excluded.extra_data,
                     updated_at_unix = excluded.updated_at_unix",
                params![user.id, PROVIDER, uid, serialized, now],
            )
            .map_err(|error| {
                Error::primary(format!(
                    "failed to store credential for {}: {error}",
                    user.username
                ))
            })?;
        tracing::info!(user = %user.username, uid, "linked wiki credential");
        drop(connection);
        self.credential_for(user)?.ok_or_else(|| {
            Error::primary(format!("credential for {} vanished after insert", user.username))
        })
    }

    /// Returns `true` when a credential was removed.
    pub fn unlink(&self, user: &User) -> Result<bool> {
        let connection = self.databases.write(EntityKind::Credential)?;
        let removed = connection
            .execute(
                "DELETE FROM social_auth WHERE user_id = ?1 AND provider = ?2",
                params![user.id, PROVIDER],
            )
            .map_err(|error| {
                Error::primary(format!(
                    "failed to remove credential for {}: {error}",
                    user.username
                ))
            })?;
        Ok(removed > 0)
    }
}

fn load_user(connection: &Connection, username: &str) -> Result<Option<User>> {
    connection
        .query_row(
            "SELECT id, username, created_at_unix FROM users WHERE username = ?1",
            [username],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at_unix: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|error| Error::primary(format!("failed to load user {username}: {error}")))
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    let raw: String = row.get(4)?;
    // Unparseable metadata reads as empty; token extraction then reports the missing half.
    let extra_data = serde_json::from_str(&raw).unwrap_or(Value::Null);
    Ok(Credential {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        uid: row.get(3)?,
        extra_data,
        created_at_unix: row.get(5)?,
        updated_at_unix: row.get(6)?,
    })
}

fn now() -> Result<i64> {
    crate::unix_timestamp().map_err(|error| Error::primary(format!("system clock error: {error}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::config::ConnectionSettings;
    use crate::migrate::run_migrations;

    pub(crate) fn migrated_databases() -> (TempDir, Databases) {
        let temp = tempdir().expect("tempdir");
        let databases = Databases::from_parts(
            ConnectionSettings {
                name: "default".to_string(),
                path: temp.path().join("wikiauth.db"),
            },
            ConnectionSettings {
                name: "metawiki_p".to_string(),
                path: temp.path().join("metawiki_p.sqlite"),
            },
        );
        run_migrations(&databases).expect("run_migrations");
        (temp, databases)
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let first = store.ensure_user("Alice").expect("create");
        let second = store.ensure_user(" Alice ").expect("reuse");
        assert_eq!(first, second);
        assert_eq!(store.find_user("Alice").expect("find"), Some(first));
        assert_eq!(store.find_user("Bob").expect("find"), None);
    }

    #[test]
    fn user_without_credential_is_not_linked() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("create");
        assert!(!store.has_oauth(&user).expect("has_oauth"));
        assert!(store.credential_for(&user).expect("lookup").is_none());
    }

    #[test]
    fn link_stores_token_pair_and_replaces_on_relink() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("create");

        let first = AccessToken::new("token-1", "secret-1");
        store
            .link(&user, "12345", &extra_data_for(&first, "Alice", 12345))
            .expect("link");
        let second = AccessToken::new("token-2", "secret-2");
        let credential = store
            .link(&user, "12345", &extra_data_for(&second, "Alice", 12345))
            .expect("relink");

        assert_eq!(credential.provider, PROVIDER);
        assert_eq!(credential.uid, "12345");
        assert_eq!(credential.access_token().expect("token"), second);
        assert!(store.has_oauth(&user).expect("has_oauth"));
    }

    #[test]
    fn unlink_removes_credential() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("create");
        store
            .link(&user, "1", &extra_data_for(&AccessToken::new("t", "s"), "Alice", 1))
            .expect("link");
        assert!(store.unlink(&user).expect("unlink"));
        assert!(!store.unlink(&user).expect("unlink again"));
        assert!(!store.has_oauth(&user).expect("has_oauth"));
    }

    #[test]
    fn access_token_reports_missing_half() {
        let credential = |extra_data: Value| Credential {
            id: 1,
            user_id: 1,
            provider: PROVIDER.to_string(),
            uid: "1".to_string(),
            extra_data,
            created_at_unix: 0,
            updated_at_unix: 0,
        };
        assert_eq!(
            credential(json!({})).access_token(),
            Err("oauth_token")
        );
        assert_eq!(
            credential(json!({"access_token": {"oauth_token": "t"}})).access_token(),
            Err("oauth_token_secret")
        );
        assert_eq!(
            credential(json!({"access_token": {"oauth_token": "", "oauth_token_secret": "s"}}))
                .access_token(),
            Err("oauth_token")
        );
        assert_eq!(
            credential(json!({"access_token": {"oauth_token": "t", "oauth_token_secret": 7}}))
                .access_token(),
            Err("oauth_token_secret")
        );
        assert_eq!(
            credential(json!({"access_token": {"oauth_token": "t", "oauth_token_secret": "s"}}))
                .access_token(),
            Ok(AccessToken::new("t", "s"))
        );
    }

    #[test]
    fn missing_schema_reports_primary_unavailable() {
        let temp = tempdir().expect("tempdir");
        let databases = Databases::from_parts(
            ConnectionSettings {
                name: "default".to_string(),
                path: temp.path().join("empty.db"),
            },
            ConnectionSettings {
                name: "metawiki_p".to_string(),
                path: temp.path().join("metawiki_p.sqlite"),
            },
        );
        let error = CredentialStore::new(&databases)
            .find_user("Alice")
            .expect_err("no schema");
        assert!(matches!(error, Error::PrimaryUnavailable { .. }));
    }
}
