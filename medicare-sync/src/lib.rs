//! # medicare-sync: Session and live-collection layer for the MediCare+ portal
//!
//! Keeps the signed-in user's identity and role current, and mirrors
//! remote collections into views with optimistic writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  auth feed   ┌──────────────────┐
//! │ SessionStore │ ◄─────────── │ IdentityProvider │
//! │ (watch)      │ ── role ───► │ RoleSource       │
//! └──────┬───────┘              └──────────────────┘
//!        │ access check
//!        ▼
//! ┌────────────────────┐  subscribe / write   ┌───────────────────────┐
//! │ LiveCollectionSync │ ───────────────────► │ RemoteCollectionStore │
//! └──────┬─────────────┘ ◄── full-set push ── └───────────────────────┘
//!        │
//!        ▼
//! ┌────────────────────┐
//! │ SubscriptionHandle │ snapshot + intents, listeners
//! └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Retry and channel settings
//! - [`error`]: Error taxonomy
//! - [`remote`]: Collaborator traits (provider, roles, store)
//! - [`session_store`]: Identity + role state machine
//! - [`snapshot`]: Optimistic snapshot reconciliation
//! - [`live`]: Subscriptions, writes, listeners
//! - [`memory`]: In-memory backend for tests and the demo

pub mod config;
pub mod error;
pub mod remote;
pub mod session_store;
pub mod snapshot;
pub mod live;
pub mod memory;

pub use config::{RetryPolicy, SessionConfig, SyncConfig};
pub use error::{AuthError, AuthFailure, RemoteError, RoleLookupError, SessionError, SyncError};
pub use live::{LiveCollectionSync, SubscriptionHandle, SyncEvent};
pub use memory::{BackendStats, InMemoryBackend};
pub use remote::{
    AuthStateFeed, Credentials, IdentityProvider, RemoteCollectionStore, RemoteFeed, RoleSource, Unsubscribe,
};
pub use session_store::{AuthStateChanges, SessionStore};
pub use snapshot::{CollectionSnapshot, MutationIntent, MutationKind, PushOutcome, Resolution, SnapshotState};
