//! In-memory backend implementing every collaborator trait.
//!
//! Stands in for the hosted identity provider, role table and document
//! store. Each collection keeps a room of subscribers; any change fans the
//! full record set out to all of them, like a hosted real-time store.
//!
//! Fault injection (failing or paused writes, failing role lookups) and
//! call counters make the sync guarantees observable in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use medicare_core::{Appointment, AppointmentStatus, Collection, Identity, OrderBy, Record, RemoteDocument};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Notify};

use crate::error::RemoteError;
use crate::live::lock;
use crate::remote::{
    AuthStateFeed, Credentials, IdentityProvider, RemoteCollectionStore, RemoteFeed, RoleSource,
};

/// Call counters, snapshot of the backend's atomics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub subscribes: u64,
    pub unsubscribes: u64,
    pub writes: u64,
    pub deletes: u64,
    pub adds: u64,
    pub role_lookups: u64,
    pub pushes: u64,
}

#[derive(Default)]
struct AtomicStats {
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    adds: AtomicU64,
    role_lookups: AtomicU64,
    pushes: AtomicU64,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Vec<RemoteDocument>>,
}

struct UserAccount {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct Faults {
    /// Errors returned by the next write/delete calls, in order.
    writes: Vec<RemoteError>,
    role_lookups: Vec<RemoteError>,
    sign_out: Option<RemoteError>,
}

struct BackendInner {
    documents: Mutex<HashMap<Collection, BTreeMap<String, Map<String, Value>>>>,
    rooms: Mutex<HashMap<Collection, Vec<Subscriber>>>,
    users: Mutex<HashMap<String, UserAccount>>,
    roles: Mutex<HashMap<String, String>>,
    current_user: Mutex<Option<Identity>>,
    auth_listeners: Mutex<Vec<mpsc::Sender<Result<Option<Identity>, RemoteError>>>>,
    faults: Mutex<Faults>,
    writes_paused: watch::Sender<bool>,
    write_arrived: Notify,
    next_id: AtomicU64,
    stats: AtomicStats,
    feed_capacity: usize,
}

#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<BackendInner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (writes_paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(BackendInner {
                documents: Mutex::new(HashMap::new()),
                rooms: Mutex::new(HashMap::new()),
                users: Mutex::new(HashMap::new()),
                roles: Mutex::new(HashMap::new()),
                current_user: Mutex::new(None),
                auth_listeners: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                writes_paused,
                write_arrived: Notify::new(),
                next_id: AtomicU64::new(1),
                stats: AtomicStats::default(),
                feed_capacity: 256,
            }),
        }
    }

    // ── Accounts ────────────────────────────────────────────────

    /// Create an account; `role` goes into the role table when given.
    pub fn register_user(&self, email: &str, password: &str, role: Option<&str>) -> Identity {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let identity = Identity::new(format!("user-{n}")).with_email(email);
        if let Some(role) = role {
            lock(&self.inner.roles).insert(identity.uid.clone(), role.to_string());
        }
        lock(&self.inner.users).insert(
            email.to_lowercase(),
            UserAccount {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    pub fn set_role(&self, identity: &Identity, role: &str) {
        lock(&self.inner.roles).insert(identity.uid.clone(), role.to_string());
    }

    /// Provider-side sign-in that did not go through `sign_in` (another tab,
    /// a restored token).
    pub fn sign_in_externally(&self, identity: &Identity) {
        self.set_current_user(Some(identity.clone()));
    }

    /// Provider-side sign-out (token revoked, expired).
    pub fn expire_session(&self) {
        self.set_current_user(None);
    }

    /// Report an error on the identity feed.
    pub fn report_provider_error(&self, error: RemoteError) {
        self.notify_auth(Err(error));
    }

    fn set_current_user(&self, identity: Option<Identity>) {
        *lock(&self.inner.current_user) = identity.clone();
        self.notify_auth(Ok(identity));
    }

    fn notify_auth(&self, change: Result<Option<Identity>, RemoteError>) {
        let mut listeners = lock(&self.inner.auth_listeners);
        listeners.retain(|tx| !tx.is_closed());
        for tx in listeners.iter() {
            if tx.try_send(change.clone()).is_err() {
                log::warn!("Identity listener is not keeping up; change dropped");
            }
        }
    }

    // ── Fault injection ─────────────────────────────────────────

    /// Fail the next write or delete with `error`. Calls queue up.
    pub fn fail_next_write(&self, error: RemoteError) {
        lock(&self.inner.faults).writes.push(error);
    }

    /// Fail the next `count` role lookups with `error`.
    pub fn fail_role_lookups(&self, count: usize, error: RemoteError) {
        let mut faults = lock(&self.inner.faults);
        for _ in 0..count {
            faults.role_lookups.push(error.clone());
        }
    }

    pub fn fail_sign_out(&self, error: RemoteError) {
        lock(&self.inner.faults).sign_out = Some(error);
    }

    /// Hold every write/delete until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.inner.writes_paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.inner.writes_paused.send_replace(false);
    }

    /// Wait until at least `count` writes/deletes have reached the backend.
    pub async fn wait_for_writes(&self, count: u64) {
        loop {
            let notified = self.inner.write_arrived.notified();
            let stats = self.stats();
            if stats.writes + stats.deletes >= count {
                return;
            }
            notified.await;
        }
    }

    async fn write_admission(&self) -> Result<(), RemoteError> {
        self.inner.write_arrived.notify_waiters();
        let mut paused = self.inner.writes_paused.subscribe();
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                return Err(RemoteError::Unavailable);
            }
        }
        let mut faults = lock(&self.inner.faults);
        if faults.writes.is_empty() {
            Ok(())
        } else {
            Err(faults.writes.remove(0))
        }
    }

    // ── Documents ───────────────────────────────────────────────

    /// Store a record and push the new set to subscribers.
    pub fn seed<R: Record>(&self, record: R) {
        match RemoteDocument::from_record(&record) {
            Ok(doc) => self.insert_document(R::COLLECTION, doc),
            Err(e) => log::error!("Cannot seed {}: {e}", record.id()),
        }
    }

    /// Store a raw document (may be malformed) and push.
    pub fn insert_document(&self, collection: Collection, document: RemoteDocument) {
        lock(&self.inner.documents)
            .entry(collection)
            .or_default()
            .insert(document.id, document.fields);
        self.broadcast(collection);
    }

    /// Push an arbitrary set to subscribers without touching storage, e.g.
    /// a stale snapshot that raced a write.
    pub fn push_raw(&self, collection: Collection, documents: Vec<RemoteDocument>) {
        self.deliver(collection, documents);
    }

    /// Push the stored set again (at-least-once redelivery).
    pub fn redeliver(&self, collection: Collection) {
        self.broadcast(collection);
    }

    pub fn documents(&self, collection: Collection) -> Vec<RemoteDocument> {
        lock(&self.inner.documents)
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| RemoteDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<RemoteDocument> {
        lock(&self.inner.documents)
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| RemoteDocument::new(id, fields.clone()))
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        lock(&self.inner.rooms).get(&collection).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> BackendStats {
        let s = &self.inner.stats;
        BackendStats {
            subscribes: s.subscribes.load(Ordering::Relaxed),
            unsubscribes: s.unsubscribes.load(Ordering::Relaxed),
            writes: s.writes.load(Ordering::Relaxed),
            deletes: s.deletes.load(Ordering::Relaxed),
            adds: s.adds.load(Ordering::Relaxed),
            role_lookups: s.role_lookups.load(Ordering::Relaxed),
            pushes: s.pushes.load(Ordering::Relaxed),
        }
    }

    fn broadcast(&self, collection: Collection) {
        // Wire order is id order, not the subscription's ordering: clients sort.
        let documents = self.documents(collection);
        self.deliver(collection, documents);
    }

    fn deliver(&self, collection: Collection, documents: Vec<RemoteDocument>) {
        let mut rooms = lock(&self.inner.rooms);
        let Some(room) = rooms.get_mut(&collection) else {
            return;
        };
        room.retain(|s| !s.tx.is_closed());
        for subscriber in room.iter() {
            match subscriber.tx.try_send(documents.clone()) {
                Ok(()) => {
                    self.inner.stats.pushes.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => log::warn!(
                    "Subscriber {} on {collection} lagging; push dropped",
                    subscriber.id
                ),
            }
        }
    }

    fn remove_subscriber(inner: &Weak<BackendInner>, collection: Collection, id: u64) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.stats.unsubscribes.fetch_add(1, Ordering::Relaxed);
        let mut rooms = lock(&inner.rooms);
        if let Some(room) = rooms.get_mut(&collection) {
            room.retain(|s| s.id != id);
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryBackend {
    fn auth_state_changes(&self) -> AuthStateFeed {
        let (tx, rx) = mpsc::channel(self.inner.feed_capacity);
        let current = lock(&self.inner.current_user).clone();
        let _ = tx.try_send(Ok(current));
        lock(&self.inner.auth_listeners).push(tx);
        rx
    }

    fn current_identity(&self) -> Option<Identity> {
        lock(&self.inner.current_user).clone()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, RemoteError> {
        let identity = {
            let users = lock(&self.inner.users);
            match users.get(&credentials.email.to_lowercase()) {
                Some(account) if account.password == credentials.password() => {
                    account.identity.clone()
                }
                _ => return Err(RemoteError::InvalidCredentials),
            }
        };
        self.set_current_user(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        if let Some(error) = lock(&self.inner.faults).sign_out.take() {
            return Err(error);
        }
        self.set_current_user(None);
        Ok(())
    }
}

#[async_trait]
impl RoleSource for InMemoryBackend {
    async fn role_of(&self, identity: &Identity) -> Result<Option<String>, RemoteError> {
        self.inner.stats.role_lookups.fetch_add(1, Ordering::Relaxed);
        {
            let mut faults = lock(&self.inner.faults);
            if !faults.role_lookups.is_empty() {
                return Err(faults.role_lookups.remove(0));
            }
        }
        Ok(lock(&self.inner.roles).get(&identity.uid).cloned())
    }
}

#[async_trait]
impl RemoteCollectionStore for InMemoryBackend {
    fn subscribe(&self, collection: Collection, order_by: &OrderBy) -> Result<RemoteFeed, RemoteError> {
        self.inner.stats.subscribes.fetch_add(1, Ordering::Relaxed);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.feed_capacity);

        // Initial snapshot goes out immediately.
        let _ = tx.try_send(self.documents(collection));
        lock(&self.inner.rooms)
            .entry(collection)
            .or_default()
            .push(Subscriber { id, tx });
        log::debug!("Subscriber {id} joined {collection} (order by {})", order_by.field);

        let weak = Arc::downgrade(&self.inner);
        Ok(RemoteFeed::new(rx, move || {
            InMemoryBackend::remove_subscriber(&weak, collection, id);
        }))
    }

    async fn write_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.write_admission().await?;
        {
            let mut documents = lock(&self.inner.documents);
            let record = documents
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or(RemoteError::NotFound)?;
            for (name, value) in fields {
                record.insert(name, value);
            }
        }
        self.broadcast(collection);
        Ok(())
    }

    async fn delete_record(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.inner.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.write_admission().await?;
        let removed = lock(&self.inner.documents)
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.broadcast(collection);
        }
        Ok(())
    }

    async fn add_record(&self, collection: Collection, document: RemoteDocument) -> Result<(), RemoteError> {
        self.inner.stats.adds.fetch_add(1, Ordering::Relaxed);
        {
            let mut documents = lock(&self.inner.documents);
            let docs = documents.entry(collection).or_default();
            if docs.contains_key(&document.id) {
                return Err(RemoteError::Rejected(format!("{} already exists", document.id)));
            }
            docs.insert(document.id, document.fields);
        }
        self.broadcast(collection);
        Ok(())
    }
}

/// Appointment fixture used by tests, benches and the portal demo.
pub fn demo_appointment(id: &str, created_at: i64, status: &str) -> Appointment {
    let status = match status {
        "confirmed" => AppointmentStatus::Confirmed,
        "completed" => AppointmentStatus::Completed,
        "cancelled" => AppointmentStatus::Cancelled,
        _ => AppointmentStatus::Pending,
    };
    Appointment {
        id: id.to_string(),
        patient_name: "John Doe".to_string(),
        patient_email: "john@example.com".to_string(),
        doctor: "Dr. Sarah Johnson".to_string(),
        department: "Cardiology".to_string(),
        date: "2024-02-15".to_string(),
        time: "10:00 AM".to_string(),
        status,
        notes: None,
        created_at: Some(created_at),
    }
}
