//! Live, role-checked subscriptions to remote collections.
//!
//! ```text
//!  view ──open(order, access)──► LiveCollectionSync ──subscribe──► remote store
//!                                       │                               │
//!                                       ▼                               │ full-set pushes
//!                              SubscriptionHandle ◄──── pump task ──────┘
//!                               │  snapshot()   (never suspends)
//!                               │  update/remove (optimistic, then write-through)
//!                               └─ events ──► on_change listeners (own task)
//! ```
//!
//! Every handle owns its own snapshot and listener set; two views opening
//! the same collection get two independent subscriptions.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use medicare_core::{patch_fields, Collection, OrderBy, Record, RecordError, RemoteDocument, Session};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};
use crate::remote::{RemoteCollectionStore, Unsubscribe};
use crate::session_store::SessionStore;
use crate::snapshot::{CollectionSnapshot, Resolution, SnapshotState};

/// Change notifications delivered to a handle's listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A push was applied
    Pushed { records: usize },
    /// Optimistic update applied locally
    Patched { id: String },
    /// Optimistic removal applied locally
    Removed { id: String },
    /// Remote write acknowledged
    Confirmed { id: String },
    /// Remote update failed; local patch rolled back
    UpdateFailed { id: String, cause: RemoteError },
    /// Remote delete failed; record reinserted
    RemoveFailed { id: String, cause: RemoteError },
    /// Record kept but its ordering key is missing or malformed
    MalformedRecord { error: RecordError },
    /// Record could not be decoded and was skipped
    RecordRejected { error: RecordError },
    /// Subscription closed
    Closed,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens live subscriptions on behalf of views.
#[derive(Clone)]
pub struct LiveCollectionSync {
    remote: Arc<dyn RemoteCollectionStore>,
    sessions: SessionStore,
    config: SyncConfig,
}

impl LiveCollectionSync {
    pub fn new(
        remote: Arc<dyn RemoteCollectionStore>,
        sessions: SessionStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Open a subscription to `R`'s collection.
    ///
    /// `access` is checked against the current session before anything is
    /// sent to the remote store. Outside a Tokio runtime there is nothing
    /// to drive the feed, so the open fails with `SubscribeFailed`.
    pub fn open<R, F>(&self, order_by: OrderBy, access: F) -> Result<SubscriptionHandle<R>, SyncError>
    where
        R: Record,
        F: Fn(&Session) -> bool,
    {
        let collection = R::COLLECTION;
        let session = self.sessions.current_session();
        if !access(&session) {
            log::warn!(
                "Access denied to {collection} for {} (role {})",
                session.identity.as_ref().map(|i| i.uid.as_str()).unwrap_or("anonymous"),
                session.role
            );
            return Err(SyncError::AccessDenied { collection });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            log::error!("Cannot open {collection} subscription: {e}");
            SyncError::SubscribeFailed {
                collection,
                cause: RemoteError::Unavailable,
            }
        })?;

        let feed = self
            .remote
            .subscribe(collection, &order_by)
            .map_err(|cause| SyncError::SubscribeFailed { collection, cause })?;

        log::info!("Opened {collection} subscription ordered by {}", order_by.field);
        Ok(SubscriptionHandle::start(
            runtime,
            self.remote.clone(),
            order_by,
            feed.snapshots,
            feed.unsubscribe,
            &self.config,
        ))
    }

    /// Close a subscription. Idempotent.
    pub fn close<R: Record>(&self, handle: &SubscriptionHandle<R>) {
        handle.close();
    }

    pub async fn update<R: Record>(
        &self,
        handle: &SubscriptionHandle<R>,
        id: &str,
        patch: R::Patch,
    ) -> Result<(), SyncError> {
        handle.update(id, patch).await
    }

    pub async fn remove<R: Record>(&self, handle: &SubscriptionHandle<R>, id: &str) -> Result<(), SyncError> {
        handle.remove(id).await
    }

    /// Write a new record. No access check (the contact form is public);
    /// the record shows up in open subscriptions with the next push.
    pub async fn create<R: Record>(&self, record: &R) -> Result<(), SyncError> {
        let document = RemoteDocument::from_record(record)?;
        let call = self.remote.add_record(R::COLLECTION, document);
        with_timeout(self.config.write_timeout, call)
            .await
            .map_err(|cause| {
                log::warn!("Create in {} failed: {cause}", R::COLLECTION);
                SyncError::CreateFailed { cause }
            })?;
        log::debug!("Created {} in {}", record.id(), R::COLLECTION);
        Ok(())
    }
}

async fn with_timeout<F>(limit: Option<Duration>, call: F) -> Result<(), RemoteError>
where
    F: Future<Output = Result<(), RemoteError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout)),
        None => call.await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Update,
    Remove,
}

impl WriteKind {
    fn failed_event(self, id: &str, cause: RemoteError) -> SyncEvent {
        match self {
            WriteKind::Update => SyncEvent::UpdateFailed { id: id.to_string(), cause },
            WriteKind::Remove => SyncEvent::RemoveFailed { id: id.to_string(), cause },
        }
    }

    fn error(self, id: &str, cause: RemoteError) -> SyncError {
        match self {
            WriteKind::Update => SyncError::UpdateFailed { id: id.to_string(), cause },
            WriteKind::Remove => SyncError::RemoveFailed { id: id.to_string(), cause },
        }
    }
}

struct HandleInner<R: Record> {
    collection: Collection,
    state: Arc<Mutex<SnapshotState<R>>>,
    events: broadcast::Sender<SyncEvent>,
    remote: Arc<dyn RemoteCollectionStore>,
    /// Fair lock: remote writes go out in call order, one at a time.
    write_gate: tokio::sync::Mutex<()>,
    write_timeout: Option<Duration>,
    unsubscribe: Mutex<Unsubscribe>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Runtime the subscription was opened on; listeners run there too.
    runtime: tokio::runtime::Handle,
}

impl<R: Record> HandleInner<R> {
    fn emit(&self, event: SyncEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn close(&self) {
        if !lock(&self.state).close() {
            return;
        }
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        lock(&self.unsubscribe).cancel();
        self.emit(SyncEvent::Closed);
        log::info!("Closed {} subscription", self.collection);
    }

    /// Settle a write: fold or roll back, then tell listeners.
    fn finish(&self, kind: WriteKind, id: &str, seq: u64, result: Result<(), RemoteError>) -> Result<(), SyncError> {
        let resolution = lock(&self.state).resolve(id, seq, result.is_ok());
        match (resolution, result) {
            (Resolution::Discarded, Ok(())) => Ok(()),
            (Resolution::Discarded, Err(cause)) => Err(kind.error(id, cause)),
            (_, Ok(())) => {
                log::debug!("{:?} of {id} in {} confirmed", kind, self.collection);
                self.emit(SyncEvent::Confirmed { id: id.to_string() });
                Ok(())
            }
            (_, Err(cause)) => {
                log::warn!("{:?} of {id} in {} failed, rolled back: {cause}", kind, self.collection);
                self.emit(kind.failed_event(id, cause.clone()));
                Err(kind.error(id, cause))
            }
        }
    }
}

impl<R: Record> Drop for HandleInner<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Rolls an optimistic intent back if its write future is dropped before
/// the remote call settles.
struct IntentGuard<'a, R: Record> {
    inner: &'a HandleInner<R>,
    kind: WriteKind,
    id: &'a str,
    seq: u64,
    armed: bool,
}

impl<R: Record> IntentGuard<'_, R> {
    fn settle(mut self, result: Result<(), RemoteError>) -> Result<(), SyncError> {
        self.armed = false;
        self.inner.finish(self.kind, self.id, self.seq, result)
    }
}

impl<R: Record> Drop for IntentGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .inner
                .finish(self.kind, self.id, self.seq, Err(RemoteError::Unavailable));
        }
    }
}

/// Scoped handle to one live subscription.
///
/// Clones share the subscription. Dropping the last clone closes it, so a
/// subscription never outlives the scope that opened it.
pub struct SubscriptionHandle<R: Record> {
    inner: Arc<HandleInner<R>>,
}

impl<R: Record> Clone for SubscriptionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Record> SubscriptionHandle<R> {
    fn start(
        runtime: tokio::runtime::Handle,
        remote: Arc<dyn RemoteCollectionStore>,
        order_by: OrderBy,
        mut snapshots: tokio::sync::mpsc::Receiver<Vec<RemoteDocument>>,
        unsubscribe: Unsubscribe,
        config: &SyncConfig,
    ) -> Self {
        let collection = R::COLLECTION;
        let state = Arc::new(Mutex::new(SnapshotState::new(order_by)));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let pump_state = state.clone();
        let pump_events = events.clone();
        let pump = runtime.spawn(async move {
            while let Some(documents) = snapshots.recv().await {
                let outcome = {
                    let mut state = lock(&pump_state);
                    if state.is_closed() {
                        break;
                    }
                    state.apply_push(&documents)
                };
                log::debug!(
                    "Applied {collection} push: {} records, {} held for in-flight writes",
                    outcome.accepted,
                    outcome.held.len()
                );
                for error in outcome.rejected {
                    log::warn!("Skipped {collection} record: {error}");
                    let _ = pump_events.send(SyncEvent::RecordRejected { error });
                }
                for error in outcome.malformed {
                    log::warn!("Unordered {collection} record: {error}");
                    let _ = pump_events.send(SyncEvent::MalformedRecord { error });
                }
                let _ = pump_events.send(SyncEvent::Pushed {
                    records: outcome.accepted,
                });
            }
            log::debug!("{collection} feed ended");
        });

        Self {
            inner: Arc::new(HandleInner {
                collection,
                state,
                events,
                remote,
                write_gate: tokio::sync::Mutex::new(()),
                write_timeout: config.write_timeout,
                unsubscribe: Mutex::new(unsubscribe),
                pump: Mutex::new(Some(pump)),
                runtime,
            }),
        }
    }

    pub fn collection(&self) -> Collection {
        self.inner.collection
    }

    /// Current ordered snapshot. Never suspends.
    pub fn snapshot(&self) -> CollectionSnapshot<R> {
        lock(&self.inner.state).view()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).is_closed()
    }

    /// Raw event stream, for async consumers.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Register a listener called after every accepted push, local patch
    /// and write outcome. It runs on its own task, never inside the call
    /// that triggered the event, and stops once the handle closes.
    pub fn on_change<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: Fn(&SyncEvent) + Send + 'static,
    {
        let mut rx = self.inner.events.subscribe();
        let closed = self.is_closed();
        let collection = self.inner.collection;
        self.inner.runtime.spawn(async move {
            if closed {
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        listener(&event);
                        if event == SyncEvent::Closed {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("{collection} listener lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Wait until the snapshot satisfies `ready`, re-checking after every event.
    pub async fn wait_for<F>(&self, ready: F) -> Result<CollectionSnapshot<R>, SyncError>
    where
        F: Fn(&CollectionSnapshot<R>) -> bool,
    {
        let mut rx = self.events();
        loop {
            if self.is_closed() {
                return Err(SyncError::Closed);
            }
            let snapshot = self.snapshot();
            if ready(&snapshot) {
                return Ok(snapshot);
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Closed),
            }
        }
    }

    /// Merge `patch` into record `id` now, then write it through.
    ///
    /// On remote failure the patch's fields are rolled back, listeners get
    /// `UpdateFailed` and the same error is returned.
    pub async fn update(&self, id: &str, patch: R::Patch) -> Result<(), SyncError> {
        let fields = patch_fields(&patch)?;
        let seq = lock(&self.inner.state).begin_update(id, patch)?;
        self.inner.emit(SyncEvent::Patched { id: id.to_string() });

        let guard = IntentGuard {
            inner: &self.inner,
            kind: WriteKind::Update,
            id,
            seq,
            armed: true,
        };
        let result = {
            let _gate = self.inner.write_gate.lock().await;
            let call = self.inner.remote.write_fields(self.inner.collection, id, fields);
            with_timeout(self.inner.write_timeout, call).await
        };
        guard.settle(result)
    }

    /// Hide record `id` now, then delete it remotely.
    ///
    /// On remote failure the record reappears at its position, listeners
    /// get `RemoveFailed` and the same error is returned.
    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let seq = lock(&self.inner.state).begin_remove(id)?;
        self.inner.emit(SyncEvent::Removed { id: id.to_string() });

        let guard = IntentGuard {
            inner: &self.inner,
            kind: WriteKind::Remove,
            id,
            seq,
            armed: true,
        };
        let result = {
            let _gate = self.inner.write_gate.lock().await;
            let call = self.inner.remote.delete_record(self.inner.collection, id);
            with_timeout(self.inner.write_timeout, call).await
        };
        guard.settle(result)
    }

    /// Cancel the remote subscription and clear the snapshot. Idempotent;
    /// writes still in flight complete but no longer touch the snapshot.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::remote::Credentials;
    use medicare_core::{access, Appointment};
    use tokio::time::{timeout, Duration};

    async fn admin_sync() -> (InMemoryBackend, LiveCollectionSync) {
        let backend = InMemoryBackend::new();
        backend.register_user("admin@medicare.test", "secret", Some("admin"));
        let sessions = SessionStore::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Default::default(),
        );
        sessions
            .login(&Credentials::new("admin@medicare.test", "secret"))
            .await
            .unwrap();
        let sync = LiveCollectionSync::new(Arc::new(backend.clone()), sessions, SyncConfig::default());
        (backend, sync)
    }

    #[tokio::test]
    async fn test_open_and_close_counts_unsubscribe_once() {
        let (backend, sync) = admin_sync().await;
        let handle = sync
            .open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)
            .unwrap();
        assert_eq!(backend.stats().subscribes, 1);

        sync.close(&handle);
        sync.close(&handle);
        assert!(handle.is_closed());
        assert_eq!(backend.stats().unsubscribes, 1);

        drop(handle);
        assert_eq!(backend.stats().unsubscribes, 1);
    }

    #[test]
    fn test_open_outside_runtime_fails_without_subscribing() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (backend, sync) = runtime.block_on(admin_sync());

        let result = sync.open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only);
        assert!(matches!(
            result,
            Err(SyncError::SubscribeFailed {
                cause: RemoteError::Unavailable,
                ..
            })
        ));
        assert_eq!(backend.stats().subscribes, 0);
    }

    #[tokio::test]
    async fn test_drop_closes_subscription() {
        let (backend, sync) = admin_sync().await;
        {
            let handle = sync
                .open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)
                .unwrap();
            let _clone = handle.clone();
        }
        assert_eq!(backend.stats().unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_listener_ends_on_close() {
        let (_backend, sync) = admin_sync().await;
        let handle = sync
            .open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)
            .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = handle.on_change(move |event| {
            let _ = tx.send(event.clone());
        });

        handle.close();
        timeout(Duration::from_secs(1), listener).await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&SyncEvent::Closed));
    }

    #[tokio::test]
    async fn test_listener_after_close_exits() {
        let (_backend, sync) = admin_sync().await;
        let handle = sync
            .open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)
            .unwrap();
        handle.close();
        let listener = handle.on_change(|_| {});
        timeout(Duration::from_secs(1), listener).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_timeout_maps_to_update_failed() {
        let (backend, sync) = admin_sync().await;
        backend.seed(crate::memory::demo_appointment("a1", 1, "pending"));
        let sync = LiveCollectionSync::new(
            Arc::new(backend.clone()),
            sync.sessions().clone(),
            SyncConfig {
                write_timeout: Some(Duration::from_millis(20)),
                ..SyncConfig::default()
            },
        );
        let handle = sync
            .open::<Appointment, _>(OrderBy::desc("createdAt"), access::admin_only)
            .unwrap();
        timeout(Duration::from_secs(1), handle.wait_for(|s| s.len() == 1))
            .await
            .unwrap()
            .unwrap();

        backend.pause_writes();
        let err = handle
            .update("a1", medicare_core::AppointmentPatch::notes("late"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::UpdateFailed {
                id: "a1".into(),
                cause: RemoteError::Timeout
            }
        );
        assert_eq!(handle.snapshot().get("a1").unwrap().notes, None);
        backend.resume_writes();
    }
}
