use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use starsync_client::RemoteStore;
use starsync_core::{
    row_store_id, CompactHashMap, EntityKind, Result, Row, Shape, StoreId, SyncError,
};
use starsync_queue::BatchEntry;
use tracing::{debug, warn};

use crate::cache::SyncCache;
use crate::session::BulkSession;
use crate::state::CacheCore;

/// Writes produced by one `find_or_add` on a join set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinChange {
    pub deleted: usize,
    pub created: usize,
    /// Removed children whose join row id is not known yet.
    pub unresolved: usize,
}

impl JoinChange {
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.created == 0 && self.unresolved == 0
    }
}

/// Station-style exclusive join: each parent owns a set of children.
///
/// Children map to the id of their join row, or `None` while the row's
/// create is queued and not yet seen by a refresh.
pub struct JoinSetCache {
    core: CacheCore,
    store: Arc<dyn RemoteStore>,
    parent_field: &'static str,
    child_field: &'static str,
    sets: CompactHashMap<StoreId, BTreeMap<StoreId, Option<StoreId>>>,
}

impl JoinSetCache {
    pub fn new(kind: EntityKind, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let (Shape::JoinSet, Some(parent_field), Some(child_field)) =
            (kind.shape(), kind.parent_field(), kind.child_field())
        else {
            return Err(SyncError::Config(format!("{} is not a join-set kind", kind)));
        };
        Ok(Self {
            core: CacheCore::new(kind),
            store,
            parent_field,
            child_field,
            sets: CompactHashMap::default(),
        })
    }

    /// Cached children of a parent, in order.
    pub fn children(&self, parent: StoreId) -> Vec<StoreId> {
        self.sets
            .get(&parent)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Make the parent's children equal `incoming` (nulls ignored, order
    /// irrelevant): drop rows for children no longer present, create rows
    /// for new ones. An equal set writes nothing.
    pub fn find_or_add(
        &mut self,
        parent: StoreId,
        incoming: &[Option<StoreId>],
        bulk: Option<&mut BulkSession>,
    ) -> Result<JoinChange> {
        self.core.ensure_accepts_records()?;
        let kind = self.core.kind();
        let wanted: BTreeSet<StoreId> = incoming.iter().flatten().copied().collect();
        let current = self.sets.get(&parent).cloned().unwrap_or_default();

        if current.keys().eq(wanted.iter()) {
            return Ok(JoinChange::default());
        }

        let mut change = JoinChange::default();
        let mut removed_rows = Vec::new();
        for (child, row_id) in &current {
            if wanted.contains(child) {
                continue;
            }
            match row_id {
                Some(id) => removed_rows.push(*id),
                None => {
                    warn!("{} {} -> {}: join row not refreshed yet, cannot delete", kind, parent, child);
                    change.unresolved += 1;
                    self.core.require_full();
                }
            }
        }
        let added: Vec<StoreId> = wanted
            .iter()
            .filter(|child| !current.contains_key(*child))
            .copied()
            .collect();

        let mut next: BTreeMap<StoreId, Option<StoreId>> = current
            .into_iter()
            .filter(|(child, _)| wanted.contains(child))
            .collect();

        if self.core.is_bulk() {
            let session = bulk.ok_or_else(|| SyncError::InvalidState {
                entity: kind,
                message: "accumulating without a bulk session".to_string(),
            })?;
            for id in &removed_rows {
                session.queue(kind, BatchEntry::Delete(*id))?;
            }
            for child in &added {
                session.queue(kind, BatchEntry::Create(self.link_row(parent, *child)))?;
                next.insert(*child, None);
            }
            self.core.touch(i64::from(parent.0));
        } else {
            for id in &removed_rows {
                self.store.destroy(kind, *id)?;
            }
            for child in &added {
                let created = self.store.create(kind, self.link_row(parent, *child))?;
                next.insert(*child, StoreId::of_row(&created));
            }
        }

        change.deleted = removed_rows.len();
        change.created = added.len();
        if next.is_empty() {
            self.sets.remove(&parent);
        } else {
            self.sets.insert(parent, next);
        }
        debug!("{} {}: -{} +{}", kind, parent, change.deleted, change.created);
        Ok(change)
    }

    fn link_row(&self, parent: StoreId, child: StoreId) -> Row {
        let mut row = Row::new();
        row.insert(self.parent_field.to_string(), Value::from(parent));
        row.insert(self.child_field.to_string(), Value::from(child));
        row
    }
}

impl SyncCache for JoinSetCache {
    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn len(&self) -> usize {
        self.sets.values().map(BTreeMap::len).sum()
    }

    fn clear_index(&mut self) {
        self.sets.clear();
    }

    fn forget(&mut self, touched: &BTreeSet<i64>) {
        self.sets.retain(|parent, _| !touched.contains(&i64::from(parent.0)));
    }

    fn absorb(&mut self, row: Row) {
        let parent = row_store_id(&row, self.parent_field);
        let child = row_store_id(&row, self.child_field);
        match (parent, child, StoreId::of_row(&row)) {
            (Some(parent), Some(child), Some(id)) => {
                self.sets.entry(parent).or_default().insert(child, Some(id));
            }
            _ => debug!("ignoring incomplete {} row", self.core.kind()),
        }
    }
}
