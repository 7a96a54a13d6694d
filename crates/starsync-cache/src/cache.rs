use std::collections::BTreeSet;

use starsync_core::{EntityKind, Row};

use crate::identity::IdentityIndex;
use crate::state::CacheCore;

/// What the refresh planner needs from every cache variant.
pub trait SyncCache {
    fn core(&self) -> &CacheCore;

    fn core_mut(&mut self) -> &mut CacheCore;

    fn kind(&self) -> EntityKind {
        self.core().kind()
    }

    /// Only hash-identified caches have one; dependents translate through it.
    fn identity(&self) -> Option<&IdentityIndex> {
        None
    }

    /// Entries currently indexed.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything ahead of a full reload.
    fn clear_index(&mut self);

    /// Drop what a partial reload of these partial-field values replaces.
    fn forget(&mut self, touched: &BTreeSet<i64>);

    /// Merge one row read back from the store.
    fn absorb(&mut self, row: Row);
}
