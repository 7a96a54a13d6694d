use std::collections::BTreeSet;
use std::fmt;

use starsync_core::{EntityKind, Result, SyncError};

/// Lifecycle of one entity cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Constructed, index not yet read from the store.
    Uninitialized,
    /// Index mirrors the store; writes go out synchronously.
    Loaded,
    /// Bulk mode: writes are deferred into batches.
    Accumulating,
    /// End-of-session drain in progress.
    Flushing,
}

impl CacheState {
    pub fn can_transition_to(self, next: CacheState) -> bool {
        use CacheState::*;
        matches!(
            (self, next),
            (Uninitialized, Loaded)
                | (Loaded, Loaded)
                | (Loaded, Accumulating)
                | (Accumulating, Flushing)
                | (Flushing, Loaded)
        )
    }

    /// `find-or-add` is only legal here.
    pub fn accepts_records(self) -> bool {
        matches!(self, CacheState::Loaded | CacheState::Accumulating)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Loaded => "loaded",
            CacheState::Accumulating => "accumulating",
            CacheState::Flushing => "flushing",
        })
    }
}

/// Bookkeeping shared by every cache variant: its state and the pending
/// partial-refresh list of values it touched during a bulk session.
#[derive(Debug, Clone)]
pub struct CacheCore {
    kind: EntityKind,
    state: CacheState,
    touched: BTreeSet<i64>,
    force_full: bool,
}

impl CacheCore {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            state: CacheState::Uninitialized,
            touched: BTreeSet::new(),
            force_full: false,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn transition(&mut self, next: CacheState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidState {
                entity: self.kind,
                message: format!("cannot move from {} to {}", self.state, next),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn ensure_accepts_records(&self) -> Result<()> {
        if self.state.accepts_records() {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                entity: self.kind,
                message: format!("find-or-add called while {}", self.state),
            })
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.state == CacheState::Accumulating
    }

    pub fn touch(&mut self, value: i64) {
        self.touched.insert(value);
    }

    pub fn touch_all(&mut self, values: impl IntoIterator<Item = i64>) {
        self.touched.extend(values);
    }

    pub fn touched(&self) -> &BTreeSet<i64> {
        &self.touched
    }

    /// The touched list can no longer describe what changed.
    pub fn require_full(&mut self) {
        self.force_full = true;
    }

    pub fn needs_full(&self) -> bool {
        self.force_full
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.force_full || !self.touched.is_empty()
    }

    /// Consumed once by the refresh planner.
    pub fn take_pending(&mut self) -> (BTreeSet<i64>, bool) {
        let touched = std::mem::take(&mut self.touched);
        let force_full = std::mem::replace(&mut self.force_full, false);
        (touched, force_full)
    }
}
