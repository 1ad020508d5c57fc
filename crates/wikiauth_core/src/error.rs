use thiserror::Error;

use crate::router::EntityKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by credential, wiki client and replica operations.
///
/// Absence of a linked credential (in `has_oauth`) and absence of a replica
/// row are not errors; those come back as `bool`/`Option`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no MediaWiki OAuth credentials found for user {username}")]
    CredentialMissing { username: String },

    #[error("OAuth credential for user {username} is missing {missing}")]
    CredentialMalformed {
        username: String,
        missing: &'static str,
    },

    #[error("wiki rejected the OAuth token [{code}]: {info}")]
    RemoteAuth { code: String, info: String },

    #[error("wiki is unavailable: {detail}")]
    RemoteUnavailable { detail: String },

    #[error("MediaWiki API error [{code}]: {info}")]
    RemoteApi { code: String, info: String },

    #[error("wiki replica database is unavailable: {detail}")]
    ReplicaUnavailable { detail: String },

    #[error("primary database is unavailable: {detail}")]
    PrimaryUnavailable { detail: String },

    #[error("{entity} is backed by the read-only wiki replica; writes are rejected")]
    ReadOnlyViolation { entity: EntityKind },

    #[error("unknown wiki site {code}.{family}")]
    InvalidSite { code: String, family: String },

    #[error("OAuth handshake failed: {detail}")]
    Handshake { detail: String },

    #[error("invalid input: {detail}")]
    InvalidInput { detail: String },
}

/// Coarse classification used by front ends to pick a message without
/// inspecting error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotLinked,
    Reauthenticate,
    Transient,
    Remote,
    WikiDataUnavailable,
    StorageUnavailable,
    ReadOnly,
    Configuration,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotLinked => "not_linked",
            Self::Reauthenticate => "reauthenticate",
            Self::Transient => "transient",
            Self::Remote => "remote",
            Self::WikiDataUnavailable => "wiki_data_unavailable",
            Self::StorageUnavailable => "storage_unavailable",
            Self::ReadOnly => "read_only",
            Self::Configuration => "configuration",
            Self::InvalidInput => "invalid_input",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::NotLinked => "Your account is not linked to a wiki account. Log in with OAuth first.",
            Self::Reauthenticate => "The wiki rejected your credentials. Please log in again.",
            Self::Transient => "The wiki could not be reached. Please try again later.",
            Self::Remote => "The wiki refused the request.",
            Self::WikiDataUnavailable => "Wiki data is temporarily unavailable.",
            Self::StorageUnavailable => "The application database is unavailable.",
            Self::ReadOnly => "Wiki replica data is read-only.",
            Self::Configuration => "The tool is misconfigured.",
            Self::InvalidInput => "The request was invalid.",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CredentialMissing { .. } => ErrorKind::NotLinked,
            Self::CredentialMalformed { .. } | Self::RemoteAuth { .. } => {
                ErrorKind::Reauthenticate
            }
            Self::RemoteUnavailable { .. } => ErrorKind::Transient,
            Self::RemoteApi { .. } | Self::Handshake { .. } => ErrorKind::Remote,
            Self::ReplicaUnavailable { .. } => ErrorKind::WikiDataUnavailable,
            Self::PrimaryUnavailable { .. } => ErrorKind::StorageUnavailable,
            Self::ReadOnlyViolation { .. } => ErrorKind::ReadOnly,
            Self::InvalidSite { .. } => ErrorKind::Configuration,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn replica(detail: impl std::fmt::Display) -> Self {
        Self::ReplicaUnavailable {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn invalid(detail: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn primary(detail: impl std::fmt::Display) -> Self {
        Self::PrimaryUnavailable {
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_and_primary_outages_are_distinguishable() {
        let replica = Error::replica("connection refused");
        let primary = Error::primary("disk full");
        assert_eq!(replica.kind(), ErrorKind::WikiDataUnavailable);
        assert_eq!(primary.kind(), ErrorKind::StorageUnavailable);
        assert_ne!(replica.kind(), primary.kind());
    }

    #[test]
    fn credential_absence_maps_to_not_linked() {
        let error = Error::CredentialMissing {
            username: "Alice".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::NotLinked);
        assert!(error.to_string().contains("Alice"));
    }

    #[test]
    fn token_rejection_asks_for_reauthentication() {
        let error = Error::RemoteAuth {
            code: "mwoauth-invalid-authorization".to_string(),
            info: "token expired".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::Reauthenticate);
        assert!(error.kind().user_message().contains("log in again"));
    }

    #[test]
    fn read_only_violation_names_entity() {
        let error = Error::ReadOnlyViolation {
            entity: EntityKind::Page,
        };
        assert_eq!(error.kind(), ErrorKind::ReadOnly);
        assert!(error.to_string().starts_with("page"));
    }
}
