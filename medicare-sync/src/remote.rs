//! Collaborator boundary: identity provider, role source, remote store.
//!
//! The hosted backend is not reimplemented here, only described. Each
//! trait is the narrowest surface the session and sync layers need;
//! [`crate::memory::InMemoryBackend`] implements all three for tests and
//! the portal demo.

use std::fmt;

use async_trait::async_trait;
use medicare_core::{Collection, Identity, OrderBy, RemoteDocument};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::RemoteError;

/// Email + password login.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity changes as reported by the provider. The first item is the
/// provider's current state.
pub type AuthStateFeed = mpsc::Receiver<Result<Option<Identity>, RemoteError>>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn auth_state_changes(&self) -> AuthStateFeed;

    /// The provider's signed-in identity right now.
    fn current_identity(&self) -> Option<Identity>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;
}

/// Keyed lookup from identity to its assigned role string.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// `Ok(None)` when the user has no role record.
    async fn role_of(&self, identity: &Identity) -> Result<Option<String>, RemoteError>;
}

/// Cancels a remote subscription. Runs its callback at most once, either
/// on [`Unsubscribe::cancel`] or on drop.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(callback)))
    }

    pub fn cancel(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_none()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unsubscribe")
            .field(&if self.is_cancelled() { "cancelled" } else { "active" })
            .finish()
    }
}

/// A push subscription: full-set snapshots plus the means to cancel it.
///
/// Delivery is at-least-once; the same snapshot may arrive twice.
pub struct RemoteFeed {
    pub snapshots: mpsc::Receiver<Vec<RemoteDocument>>,
    pub unsubscribe: Unsubscribe,
}

impl RemoteFeed {
    pub fn new(
        snapshots: mpsc::Receiver<Vec<RemoteDocument>>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            snapshots,
            unsubscribe: Unsubscribe::new(unsubscribe),
        }
    }
}

/// Hosted document store with real-time push.
#[async_trait]
pub trait RemoteCollectionStore: Send + Sync {
    fn subscribe(&self, collection: Collection, order_by: &OrderBy) -> Result<RemoteFeed, RemoteError>;

    /// Merge `fields` into an existing record.
    async fn write_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError>;

    async fn delete_record(&self, collection: Collection, id: &str) -> Result<(), RemoteError>;

    async fn add_record(&self, collection: Collection, document: RemoteDocument) -> Result<(), RemoteError>;
}
