use serde::Serialize;

use crate::client::{ClientFactory, WikiApi};
use crate::credentials::{CredentialStore, User};
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub username: String,
    pub edit_count: u64,
    pub groups: Vec<String>,
    pub has_oauth: bool,
    /// Set when a credential exists but the wiki could not be queried.
    pub wiki_error: Option<&'static str>,
}

impl ProfileSummary {
    fn local(user: &User, has_oauth: bool) -> Self {
        Self {
            username: user.username.clone(),
            edit_count: 0,
            groups: Vec::new(),
            has_oauth,
            wiki_error: None,
        }
    }
}

/// Profile for `user`; remote failures degrade to the local username.
///
/// Only primary-store failures are returned as errors.
pub fn load_profile(
    store: &CredentialStore<'_>,
    factory: &ClientFactory,
    user: &User,
) -> Result<ProfileSummary> {
    if !store.has_oauth(user)? {
        return Ok(ProfileSummary::local(user, false));
    }
    match factory.create_client(store, user, None) {
        Ok(mut client) => Ok(summarize(&mut client, user)),
        Err(error) => {
            let kind = error.kind();
            if kind == ErrorKind::StorageUnavailable {
                return Err(error);
            }
            tracing::warn!(user = %user.username, %error, "could not build wiki client for profile");
            Ok(degraded(user, kind))
        }
    }
}

pub fn summarize<A: WikiApi>(api: &mut A, user: &User) -> ProfileSummary {
    match api.user_info() {
        Ok(info) => ProfileSummary {
            username: info.name,
            edit_count: info.edit_count,
            groups: info.groups,
            has_oauth: true,
            wiki_error: None,
        },
        Err(error) => {
            tracing::warn!(user = %user.username, wiki = %api.site(), %error, "profile fetch failed");
            degraded(user, error.kind())
        }
    }
}

fn degraded(user: &User, kind: ErrorKind) -> ProfileSummary {
    ProfileSummary {
        wiki_error: Some(kind.as_str()),
        ..ProfileSummary::local(user, true)
    }
}
