//! Generic per-kind diff / queue builder.
//!
//! One [`Reconciler`] exists per entity kind per cycle. It is fed the remote
//! snapshot once, then every desired record of its kind; afterwards its three
//! queues say what the backend needs to converge.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use mailsync_core::{EntityKind, Record, UpdateEntry};

use crate::strategy::{kill_id, update_id, EntityStrategy, ManagedKeys};

/// Result of declaring one desired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The key is managed (or already queued for creation).
    Claimed,
    /// The key exists remotely but is not ours; dependents must be skipped.
    Foreign,
    /// The key was new and has been queued for creation.
    Queued,
}

impl Outcome {
    /// Foreign is the only outcome that suppresses dependents.
    pub fn is_foreign(self) -> bool {
        self == Outcome::Foreign
    }
}

/// Queue sizes of one reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub adds: usize,
    pub updates: usize,
    pub kills: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.adds + self.updates + self.kills
    }
}

/// Apply-ready queues of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindQueues {
    pub adds: Vec<Record>,
    pub updates: Vec<UpdateEntry>,
    pub kills: Vec<Value>,
}

impl KindQueues {
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            adds: self.adds.len(),
            updates: self.updates.len(),
            kills: self.kills.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.kills.is_empty()
    }
}

struct PendingUpdate {
    key: String,
    changed: Record,
}

/// Cycle-scoped reconciler for one entity kind.
pub struct Reconciler<S> {
    strategy: S,
    loaded: bool,
    current: HashMap<String, Record>,
    managed: HashMap<String, Record>,
    snapshot_order: Vec<String>,
    kill: HashSet<String>,
    adds: Vec<Record>,
    add_keys: HashSet<String>,
    updates: Vec<PendingUpdate>,
    update_index: HashMap<String, usize>,
}

impl<S: EntityStrategy> Reconciler<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            loaded: false,
            current: HashMap::new(),
            managed: HashMap::new(),
            snapshot_order: Vec::new(),
            kill: HashSet::new(),
            adds: Vec::new(),
            add_keys: HashSet::new(),
            updates: Vec::new(),
            update_index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.strategy.kind()
    }

    /// Populate `current` and `managed` and seed the kill queue.
    ///
    /// Records without a primary key are skipped. A second call replaces the
    /// first snapshot entirely.
    pub fn load_snapshot(&mut self, records: Vec<Record>) {
        if self.loaded {
            warn!(kind = %self.kind(), "snapshot loaded twice; discarding previous state");
            self.reset();
        }
        self.loaded = true;

        for record in records {
            let Some(key) = self.strategy.key_of(&record) else {
                warn!(kind = %self.kind(), "skipping snapshot record without primary key");
                continue;
            };
            let managed = self.strategy.is_managed(&record);
            if self.current.contains_key(&key) {
                // A managed record wins over a foreign one under the same key.
                if managed && !self.managed.contains_key(&key) {
                    warn!(kind = %self.kind(), key = %key, "duplicate key in snapshot; replacing foreign record with managed one");
                } else {
                    warn!(kind = %self.kind(), key = %key, managed, "duplicate key in snapshot; discarding record");
                    continue;
                }
            }
            if managed {
                self.kill.insert(key.clone());
                self.snapshot_order.push(key.clone());
                self.managed.insert(key.clone(), record.clone());
            }
            self.current.insert(key, record);
        }

        debug!(
            kind = %self.kind(),
            current = self.current.len(),
            managed = self.managed.len(),
            "snapshot loaded"
        );
    }

    /// Declare one desired record under `key`.
    pub fn declare(&mut self, desired: Record, key: &str) -> Outcome {
        if let Some(current) = self.managed.get(key) {
            self.kill.remove(key);
            let changed: Record = desired
                .into_iter()
                .filter(|(field, value)| self.strategy.has_delta(field, current, value))
                .collect();
            if !changed.is_empty() {
                debug!(kind = %self.kind(), key, fields = changed.len(), "update queued");
                self.upsert_update(key, changed);
            }
            return Outcome::Claimed;
        }

        if self.current.contains_key(key) {
            debug!(kind = %self.kind(), key, "foreign entity; not touching");
            return Outcome::Foreign;
        }

        if self.add_keys.contains(key) {
            return Outcome::Claimed;
        }

        debug!(kind = %self.kind(), key, "add queued");
        self.add_keys.insert(key.to_owned());
        self.adds.push(desired);
        Outcome::Queued
    }

    fn upsert_update(&mut self, key: &str, changed: Record) {
        match self.update_index.get(key) {
            Some(&idx) => self.updates[idx].changed = changed,
            None => {
                self.update_index.insert(key.to_owned(), self.updates.len());
                self.updates.push(PendingUpdate {
                    key: key.to_owned(),
                    changed,
                });
            }
        }
    }

    /// Keys of every managed snapshot record.
    pub fn managed_keys(&self) -> ManagedKeys {
        ManagedKeys::new(self.managed.keys().cloned().collect())
    }

    pub fn is_managed(&self, key: &str) -> bool {
        self.managed.contains_key(key)
    }

    /// Records to create, in first-declaration order.
    pub fn add_queue(&self) -> Vec<Record> {
        self.adds.clone()
    }

    /// Edit calls, in first-declaration order.
    pub fn update_queue(&self) -> Vec<UpdateEntry> {
        self.resolved_updates()
            .filter_map(|(key, changed, target)| {
                if target.is_none() {
                    warn!(kind = %self.kind(), key = %key, "no update target; skipping");
                }
                Some(UpdateEntry {
                    attr: changed.clone(),
                    items: vec![target?],
                })
            })
            .collect()
    }

    /// Delete ids of undeclared managed records, in snapshot order.
    pub fn kill_queue(&self) -> Vec<Value> {
        self.resolved_kills()
            .filter_map(|(key, id)| {
                if id.is_none() {
                    warn!(kind = %self.kind(), key = %key, "no delete id; skipping");
                }
                id
            })
            .collect()
    }

    fn resolved_updates(&self) -> impl Iterator<Item = (&str, &Record, Option<Value>)> + '_ {
        self.updates.iter().filter_map(|pending| {
            let managed = self.managed.get(&pending.key)?;
            let target = update_id(&self.strategy, &pending.key, managed);
            Some((pending.key.as_str(), &pending.changed, target))
        })
    }

    fn resolved_kills(&self) -> impl Iterator<Item = (&str, Option<Value>)> + '_ {
        self.snapshot_order
            .iter()
            .filter(|key| self.kill.contains(*key))
            .filter_map(|key| {
                let managed = self.managed.get(key)?;
                Some((key.as_str(), kill_id(&self.strategy, key, managed)))
            })
    }

    /// Agrees with [`queues`](Self::queues): entries without a backend id
    /// are not counted.
    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            adds: self.adds.len(),
            updates: self
                .resolved_updates()
                .filter(|(_, _, target)| target.is_some())
                .count(),
            kills: self.resolved_kills().filter(|(_, id)| id.is_some()).count(),
        }
    }

    /// All three queues in apply-ready shape.
    pub fn queues(&self) -> KindQueues {
        KindQueues {
            adds: self.add_queue(),
            updates: self.update_queue(),
            kills: self.kill_queue(),
        }
    }

    fn reset(&mut self) {
        self.current.clear();
        self.managed.clear();
        self.snapshot_order.clear();
        self.kill.clear();
        self.adds.clear();
        self.add_keys.clear();
        self.updates.clear();
        self.update_index.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
