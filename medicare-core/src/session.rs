//! Who the current user is and what they may see.
//!
//! ```text
//! SignedOut ──login──► RoleResolving ──role found──► SignedIn(role)
//!     ▲                     │                            │
//!     └──── retries spent ──┘◄────────── logout ─────────┘
//! ```
//!
//! `Role::Unknown` is the value while resolution is pending. It is never a
//! grant and never a denial: views gated on a role render a pending state.

use serde::{Deserialize, Serialize};

/// Opaque reference to a user of the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to greet the user with: display name, else email, else uid.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}

/// Role assigned to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Not resolved yet (or signed out).
    #[default]
    Unknown,
    Patient,
    Admin,
}

impl Role {
    /// Parse a role string from the role-assignment source.
    ///
    /// Only assignable roles parse; `"unknown"` and anything else is `None`.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "patient" => Some(Role::Patient),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Patient => "patient",
            Role::Admin => "admin",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Role::Unknown
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    /// Identity known, role lookup in progress.
    RoleResolving { identity: Identity },
    SignedIn { identity: Identity, role: Role },
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::SignedOut => None,
            SessionState::RoleResolving { identity }
            | SessionState::SignedIn { identity, .. } => Some(identity),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            SessionState::SignedIn { role, .. } => *role,
            _ => Role::Unknown,
        }
    }

    /// Flatten into the identity + role pair handed to views.
    pub fn session(&self) -> Session {
        Session {
            identity: self.identity().cloned(),
            role: self.role(),
        }
    }
}

/// The resolved identity + role pair representing the current actor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub identity: Option<Identity>,
    pub role: Role,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity, role: Role) -> Self {
        Self {
            identity: Some(identity),
            role,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    /// Signed in but the role lookup has not completed.
    pub fn is_resolving(&self) -> bool {
        self.identity.is_some() && self.role == Role::Unknown
    }

    pub fn is_admin(&self) -> bool {
        self.identity.is_some() && self.role == Role::Admin
    }

    /// Decide what a view guarded by `requirement` may render.
    pub fn gate(&self, requirement: Requirement) -> Gate {
        if self.identity.is_none() {
            return Gate::Denied;
        }
        match (self.role, requirement) {
            (Role::Unknown, _) => Gate::Pending,
            (_, Requirement::Authenticated) => Gate::Allowed,
            (Role::Admin, Requirement::Admin) => Gate::Allowed,
            (Role::Patient, Requirement::Admin) => Gate::Denied,
        }
    }
}

/// What a protected view needs from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any signed-in user with a resolved role (patient portal).
    Authenticated,
    /// Admin role only (dashboard).
    Admin,
}

/// Render decision for a protected view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Role still resolving: show a loading state, never the content.
    Pending,
    Allowed,
    Denied,
}

/// Access-check predicates for opening live subscriptions.
///
/// These are strict: an unresolved role fails the check, and the caller
/// has to re-check the session and retry the open explicitly.
pub mod access {
    use super::{Role, Session};

    pub fn admin_only(session: &Session) -> bool {
        session.is_admin()
    }

    pub fn authenticated(session: &Session) -> bool {
        session.is_signed_in() && session.role.is_known()
    }

    pub fn patient_only(session: &Session) -> bool {
        session.is_signed_in() && session.role == Role::Patient
    }
}
