//! Optimistic mirror of one remote collection.
//!
//! ```text
//!   push (full set)            update / remove
//!        │                           │
//!        ▼                           ▼
//!   ┌─────────┐   replayed in   ┌──────────────────────┐
//!   │  base   │ ◄── call order ─│ intents, per id      │
//!   │ (server)│                 │ [Pending|Acked, ...] │
//!   └────┬────┘                 └──────────┬───────────┘
//!        │  leading Acked run folded in    │
//!        └──────────────┬──────────────────┘
//!                       ▼
//!                 visible snapshot
//! ```
//!
//! `base` holds the last accepted server state. Local mutations never
//! touch it directly: they queue a [`MutationIntent`] for their id, and
//! the visible snapshot replays those queues over `base`. A failed write
//! just drops its intent, so only that write's fields disappear from the
//! replay. An acknowledged write is folded into `base` once every earlier
//! intent for the same id has resolved.
//!
//! Pushes replace `base` wholesale, except for ids that still have intents
//! queued: for those the local view wins until the writes resolve. The
//! latest pushed state of such an id (or its absence) is held aside, with
//! acknowledged writes folded into it as well, and becomes its `base` once
//! the queue drains.

use std::collections::{HashMap, VecDeque};

use medicare_core::{apply_patch, OrderBy, OrderValue, Record, RecordError, RemoteDocument};

use crate::error::SyncError;

/// Ordered records of one subscription, as handed to views.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot<R> {
    pub records: Vec<R>,
}

impl<R: Record> CollectionSnapshot<R> {
    pub fn get(&self, id: &str) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }
}

impl<R> Default for CollectionSnapshot<R> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

#[derive(Debug, Clone)]
struct Entry<R> {
    record: R,
    key: Option<OrderValue>,
}

#[derive(Debug, Clone)]
pub enum MutationKind<R: Record> {
    Update(R::Patch),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentState {
    Pending,
    Acked,
}

/// A pending write against one record.
#[derive(Debug, Clone)]
pub struct MutationIntent<R: Record> {
    pub seq: u64,
    pub kind: MutationKind<R>,
    state: IntentState,
}

/// What resolving an intent did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    RolledBack,
    /// Handle closed or intent already gone; nothing was touched.
    Discarded,
}

/// Result of applying one push.
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub accepted: usize,
    /// Ids whose pushed state waits for their in-flight writes to resolve.
    pub held: Vec<String>,
    /// Records kept but appended after the ordered ones.
    pub malformed: Vec<RecordError>,
    /// Records that could not be decoded and were skipped.
    pub rejected: Vec<RecordError>,
}

pub struct SnapshotState<R: Record> {
    order_by: OrderBy,
    base: Vec<Entry<R>>,
    intents: HashMap<String, VecDeque<MutationIntent<R>>>,
    /// Latest pushed state of ids with writes in flight; `None` = absent.
    held: HashMap<String, Option<Entry<R>>>,
    next_seq: u64,
    closed: bool,
}

impl<R: Record> SnapshotState<R> {
    pub fn new(order_by: OrderBy) -> Self {
        Self {
            order_by,
            base: Vec::new(),
            intents: HashMap::new(),
            held: HashMap::new(),
            next_seq: 1,
            closed: false,
        }
    }

    pub fn order_by(&self) -> &OrderBy {
        &self.order_by
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether `id` has writes still unresolved.
    pub fn in_flight(&self, id: &str) -> bool {
        self.intents.get(id).is_some_and(|q| !q.is_empty())
    }

    pub fn pending_intents(&self) -> usize {
        self.intents.values().map(VecDeque::len).sum()
    }

    /// Replace the server state with a full-set push.
    pub fn apply_push(&mut self, documents: &[RemoteDocument]) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        if self.closed {
            return outcome;
        }

        let mut next: Vec<Entry<R>> = Vec::with_capacity(documents.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut held: HashMap<String, Option<Entry<R>>> = HashMap::new();

        for doc in documents {
            let in_flight = self.in_flight(&doc.id);
            if in_flight && !held.contains_key(&doc.id) {
                outcome.held.push(doc.id.clone());
            }
            let record: R = match doc.decode() {
                Ok(record) => record,
                Err(err) => {
                    outcome.rejected.push(err);
                    if in_flight {
                        held.insert(doc.id.clone(), None);
                    }
                    continue;
                }
            };
            let key = match doc.order_value(&self.order_by) {
                Ok(key) => Some(key),
                Err(err) => {
                    outcome.malformed.push(err);
                    None
                }
            };
            let entry = Entry { record, key };
            if in_flight {
                held.insert(doc.id.clone(), Some(entry));
                continue;
            }
            // At most one entry per id: a duplicate in the same push replaces the earlier one.
            match positions.get(&doc.id) {
                Some(&at) => next[at] = entry,
                None => {
                    positions.insert(doc.id.clone(), next.len());
                    next.push(entry);
                }
            }
        }

        // In-flight ids the push no longer carries are gone on the server.
        for id in self.intents.keys() {
            held.entry(id.clone()).or_insert(None);
        }
        self.held = held;

        // In-flight records keep their current base entry, pushed or not.
        for entry in self.base.drain(..) {
            if self.intents.contains_key(entry.record.id()) {
                next.push(entry);
            }
        }

        let order_by = &self.order_by;
        next.sort_by(|a, b| order_by.compare_opt(a.key.as_ref(), b.key.as_ref()));
        outcome.accepted = next.len();
        self.base = next;
        outcome
    }

    /// The visible snapshot: base with every queued intent replayed.
    pub fn view(&self) -> CollectionSnapshot<R> {
        let mut rows: Vec<(Option<OrderValue>, R)> = Vec::with_capacity(self.base.len());
        for entry in &self.base {
            match self.intents.get(entry.record.id()) {
                None => rows.push((entry.key.clone(), entry.record.clone())),
                Some(queue) => {
                    if let Some(record) = replay(&entry.record, queue) {
                        let key = self.order_by.key_of(&record).ok();
                        rows.push((key, record));
                    }
                }
            }
        }
        let order_by = &self.order_by;
        rows.sort_by(|a, b| order_by.compare_opt(a.0.as_ref(), b.0.as_ref()));
        CollectionSnapshot {
            records: rows.into_iter().map(|(_, record)| record).collect(),
        }
    }

    /// Current visible state of one record.
    pub fn visible(&self, id: &str) -> Option<R> {
        let entry = self.base.iter().find(|e| e.record.id() == id)?;
        match self.intents.get(id) {
            None => Some(entry.record.clone()),
            Some(queue) => replay(&entry.record, queue),
        }
    }

    /// Queue an optimistic update. Fails if `id` is not visible or the
    /// patch does not fit the record schema.
    pub fn begin_update(&mut self, id: &str, patch: R::Patch) -> Result<u64, SyncError> {
        if self.closed {
            return Err(SyncError::Closed);
        }
        let current = self.visible(id).ok_or_else(|| SyncError::NotFound { id: id.to_string() })?;
        apply_patch(&current, &patch)?;
        Ok(self.enqueue(id, MutationKind::Update(patch)))
    }

    /// Queue an optimistic removal.
    pub fn begin_remove(&mut self, id: &str) -> Result<u64, SyncError> {
        if self.closed {
            return Err(SyncError::Closed);
        }
        if self.visible(id).is_none() {
            return Err(SyncError::NotFound { id: id.to_string() });
        }
        Ok(self.enqueue(id, MutationKind::Delete))
    }

    fn enqueue(&mut self, id: &str, kind: MutationKind<R>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.intents
            .entry(id.to_string())
            .or_default()
            .push_back(MutationIntent {
                seq,
                kind,
                state: IntentState::Pending,
            });
        seq
    }

    /// Settle intent `seq` for `id` with the remote write's outcome.
    pub fn resolve(&mut self, id: &str, seq: u64, succeeded: bool) -> Resolution {
        if self.closed {
            return Resolution::Discarded;
        }
        let Some(queue) = self.intents.get_mut(id) else {
            return Resolution::Discarded;
        };
        let Some(at) = queue.iter().position(|i| i.seq == seq) else {
            return Resolution::Discarded;
        };

        let resolution = if succeeded {
            queue[at].state = IntentState::Acked;
            Resolution::Confirmed
        } else {
            queue.remove(at);
            Resolution::RolledBack
        };

        self.fold(id);
        resolution
    }

    /// Move the leading run of acknowledged intents into `base`.
    fn fold(&mut self, id: &str) {
        let Some(queue) = self.intents.get_mut(id) else {
            return;
        };
        while queue.front().is_some_and(|i| i.state == IntentState::Acked) {
            let Some(intent) = queue.pop_front() else {
                break;
            };
            if let Some(slot) = self.held.get_mut(id) {
                settle(slot, &intent.kind, &self.order_by);
            }
            let Some(at) = self.base.iter().position(|e| e.record.id() == id) else {
                continue;
            };
            match &intent.kind {
                MutationKind::Update(patch) => {
                    if let Ok(record) = apply_patch(&self.base[at].record, patch) {
                        let key = self.order_by.key_of(&record).ok();
                        self.base[at] = Entry { record, key };
                    }
                }
                MutationKind::Delete => {
                    self.base.remove(at);
                }
            }
        }
        if !queue.is_empty() {
            return;
        }
        self.intents.remove(id);

        if let Some(latest) = self.held.remove(id) {
            self.base.retain(|e| e.record.id() != id);
            if let Some(entry) = latest {
                self.base.push(entry);
                let order_by = &self.order_by;
                self.base
                    .sort_by(|a, b| order_by.compare_opt(a.key.as_ref(), b.key.as_ref()));
            }
        }
    }

    /// Drop all state. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.base.clear();
        self.intents.clear();
        self.held.clear();
        true
    }
}

/// Apply an acknowledged write to a held server state.
fn settle<R: Record>(slot: &mut Option<Entry<R>>, kind: &MutationKind<R>, order_by: &OrderBy) {
    match kind {
        MutationKind::Update(patch) => {
            if let Some(entry) = slot.as_mut() {
                if let Ok(record) = apply_patch(&entry.record, patch) {
                    let key = order_by.key_of(&record).ok();
                    *entry = Entry { record, key };
                }
            }
        }
        MutationKind::Delete => *slot = None,
    }
}

/// Replay queued intents over a base record; `None` if a removal is queued.
fn replay<R: Record>(base: &R, queue: &VecDeque<MutationIntent<R>>) -> Option<R> {
    let mut record = base.clone();
    for intent in queue {
        match &intent.kind {
            MutationKind::Update(patch) => {
                if let Ok(patched) = apply_patch(&record, patch) {
                    record = patched;
                }
            }
            MutationKind::Delete => return None,
        }
    }
    Some(record)
}
