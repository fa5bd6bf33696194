//! Error taxonomy of the session and sync layers.
//!
//! Collaborators (identity provider, role source, remote store) report
//! [`RemoteError`]. The components translate it at their boundary into
//! the errors below; nothing else crosses the public interface.

use medicare_core::{Collection, RecordError};
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote call timed out")]
    Timeout,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("service unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    Network,
    ProviderError,
}

/// Login failed. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("authentication failed: {reason:?}")]
pub struct AuthError {
    pub reason: AuthFailure,
}

impl From<RemoteError> for AuthError {
    fn from(err: RemoteError) -> Self {
        let reason = match err {
            RemoteError::InvalidCredentials | RemoteError::NotFound => {
                AuthFailure::InvalidCredentials
            }
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Unavailable => {
                AuthFailure::Network
            }
            RemoteError::PermissionDenied | RemoteError::Rejected(_) => AuthFailure::ProviderError,
        };
        AuthError { reason }
    }
}

/// Role resolution failed; the session must not assume any role.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleLookupError {
    #[error("role lookup failed after {attempts} attempt(s): {cause}")]
    Remote { attempts: u32, cause: RemoteError },
    #[error("no role assigned to user {uid}")]
    Missing { uid: String },
    #[error("unrecognized role `{0}`")]
    Unrecognized(String),
}

/// Outcome of `SessionStore::login`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    RoleLookup(#[from] RoleLookupError),
}

/// Errors of live subscriptions and their mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("access denied to {collection}")]
    AccessDenied { collection: Collection },
    #[error("subscription to {collection} failed: {cause}")]
    SubscribeFailed { collection: Collection, cause: RemoteError },
    #[error("record {id} not found in snapshot")]
    NotFound { id: String },
    #[error("update of {id} failed: {cause}")]
    UpdateFailed { id: String, cause: RemoteError },
    #[error("removal of {id} failed: {cause}")]
    RemoveFailed { id: String, cause: RemoteError },
    #[error("create failed: {cause}")]
    CreateFailed { cause: RemoteError },
    #[error("subscription closed")]
    Closed,
    #[error(transparent)]
    Record(#[from] RecordError),
}
