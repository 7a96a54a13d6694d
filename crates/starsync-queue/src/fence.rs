//! Per-kind ordering fence between delete and create batches.
//!
//! Queue order alone does not stop a create on one worker from overtaking
//! a delete still running on another, so creates wait here until every
//! delete of their kind submitted before them has completed.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use starsync_core::EntityKind;

#[derive(Default)]
pub struct DeleteFence {
    outstanding: Mutex<HashMap<EntityKind, BTreeSet<u64>>>,
    released: Condvar,
}

impl DeleteFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the producer when a delete batch is enqueued.
    pub fn register(&self, kind: EntityKind, seq: u64) {
        self.outstanding.lock().entry(kind).or_default().insert(seq);
    }

    /// Called by a worker once a delete batch is finished, whatever its outcome.
    pub fn complete(&self, kind: EntityKind, seq: u64) {
        let mut outstanding = self.outstanding.lock();
        if let Some(set) = outstanding.get_mut(&kind) {
            set.remove(&seq);
            if set.is_empty() {
                outstanding.remove(&kind);
            }
        }
        self.released.notify_all();
    }

    pub fn is_clear(&self, kind: EntityKind, up_to: u64) -> bool {
        Self::clear_in(&self.outstanding.lock(), kind, up_to)
    }

    /// Block until no delete of `kind` with sequence <= `up_to` is outstanding.
    pub fn wait_clear(&self, kind: EntityKind, up_to: u64) {
        let mut outstanding = self.outstanding.lock();
        while !Self::clear_in(&outstanding, kind, up_to) {
            self.released
                .wait_for(&mut outstanding, Duration::from_millis(100));
        }
    }

    fn clear_in(map: &HashMap<EntityKind, BTreeSet<u64>>, kind: EntityKind, up_to: u64) -> bool {
        map.get(&kind)
            .and_then(|set| set.first())
            .map_or(true, |first| *first > up_to)
    }
}
