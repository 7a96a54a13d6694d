use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use starsync_client::RemoteStore;
use starsync_core::{
    row_store_id, CompactHashMap, EntityKind, Result, Row, Shape, StoreId, SyncError, ID_FIELD,
};
use starsync_queue::BatchEntry;
use tracing::{debug, warn};

use crate::cache::SyncCache;
use crate::session::BulkSession;
use crate::state::CacheCore;

const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Share {
    value: f64,
    row: Option<StoreId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareChange {
    Created,
    Updated,
    Unchanged,
    /// Changed again before its queued create was refreshed.
    Skipped,
}

/// Composition-style join: (parent, component) -> weighted share. Components
/// are created and updated one by one, never replaced as a set.
pub struct CompositionCache {
    core: CacheCore,
    store: Arc<dyn RemoteStore>,
    parent_field: &'static str,
    child_field: &'static str,
    share_field: &'static str,
    shares: CompactHashMap<(StoreId, StoreId), Share>,
}

impl CompositionCache {
    pub fn new(kind: EntityKind, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let (Shape::Composition, Some(parent_field), Some(child_field), Some(share_field)) = (
            kind.shape(),
            kind.parent_field(),
            kind.child_field(),
            kind.share_field(),
        ) else {
            return Err(SyncError::Config(format!("{} is not a composition kind", kind)));
        };
        Ok(Self {
            core: CacheCore::new(kind),
            store,
            parent_field,
            child_field,
            share_field,
            shares: CompactHashMap::default(),
        })
    }

    pub fn share(&self, parent: StoreId, component: StoreId) -> Option<f64> {
        self.shares.get(&(parent, component)).map(|s| s.value)
    }

    pub fn find_or_add(
        &mut self,
        parent: StoreId,
        component: StoreId,
        share: f64,
        bulk: Option<&mut BulkSession>,
    ) -> Result<ShareChange> {
        self.core.ensure_accepts_records()?;
        let kind = self.core.kind();
        if !share.is_finite() {
            return Err(SyncError::InvalidRecord {
                entity: kind,
                reason: format!("share {} for {} -> {}", share, parent, component),
            });
        }
        let key = (parent, component);
        let existing = self.shares.get(&key).copied();

        let entry = match existing {
            Some(current) if (current.value - share).abs() <= SHARE_EPSILON => {
                return Ok(ShareChange::Unchanged);
            }
            Some(Share { row: None, .. }) => {
                warn!("{} {} -> {}: share changed before its row was refreshed", kind, parent, component);
                self.core.require_full();
                return Ok(ShareChange::Skipped);
            }
            Some(Share { row: Some(id), .. }) => {
                let mut row = self.share_row(parent, component, share);
                row.insert(ID_FIELD.to_string(), Value::from(id));
                BatchEntry::Update(row)
            }
            None => BatchEntry::Create(self.share_row(parent, component, share)),
        };
        let created = matches!(entry, BatchEntry::Create(_));

        let row_id = if self.core.is_bulk() {
            let session = bulk.ok_or_else(|| SyncError::InvalidState {
                entity: kind,
                message: "accumulating without a bulk session".to_string(),
            })?;
            session.queue(kind, entry)?;
            self.core.touch(i64::from(parent.0));
            existing.and_then(|s| s.row)
        } else {
            match entry {
                BatchEntry::Create(row) => StoreId::of_row(&self.store.create(kind, row)?),
                BatchEntry::Update(row) => {
                    self.store.bulk_update(kind, std::slice::from_ref(&row))?;
                    existing.and_then(|s| s.row)
                }
                BatchEntry::Delete(_) => None,
            }
        };

        self.shares.insert(key, Share { value: share, row: row_id });
        Ok(if created { ShareChange::Created } else { ShareChange::Updated })
    }

    fn share_row(&self, parent: StoreId, component: StoreId, share: f64) -> Row {
        let mut row = Row::new();
        row.insert(self.parent_field.to_string(), Value::from(parent));
        row.insert(self.child_field.to_string(), Value::from(component));
        row.insert(self.share_field.to_string(), Value::from(share));
        row
    }
}

impl SyncCache for CompositionCache {
    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn len(&self) -> usize {
        self.shares.len()
    }

    fn clear_index(&mut self) {
        self.shares.clear();
    }

    fn forget(&mut self, touched: &BTreeSet<i64>) {
        self.shares
            .retain(|(parent, _), _| !touched.contains(&i64::from(parent.0)));
    }

    fn absorb(&mut self, row: Row) {
        let parent = row_store_id(&row, self.parent_field);
        let child = row_store_id(&row, self.child_field);
        let value = row.get(self.share_field).and_then(Value::as_f64);
        match (parent, child, value) {
            (Some(parent), Some(child), Some(value)) => {
                self.shares.insert(
                    (parent, child),
                    Share {
                        value,
                        row: StoreId::of_row(&row),
                    },
                );
            }
            _ => debug!("ignoring incomplete {} row", self.core.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TableLoader;
    use crate::planner;
    use serde_json::json;
    use starsync_client::{MemoryStore, StoreOp};
    use starsync_core::StoreConfig;

    const KIND: EntityKind = EntityKind::BodyMaterial;

    #[test]
    fn create_update_or_nothing() {
        let store = Arc::new(MemoryStore::new());
        let iron = store.seed(
            KIND,
            json!({"body": 5, "material": 1, "share": 20.5}).as_object().cloned().unwrap(),
        );
        let mut cache = CompositionCache::new(KIND, store.clone()).unwrap();
        planner::load(&mut cache, &TableLoader::new(store.clone(), &StoreConfig::default())).unwrap();

        assert_eq!(cache.find_or_add(StoreId(5), StoreId(1), 20.5, None).unwrap(), ShareChange::Unchanged);
        assert!(store.ops().is_empty());

        assert_eq!(cache.find_or_add(StoreId(5), StoreId(1), 21.0, None).unwrap(), ShareChange::Updated);
        assert_eq!(cache.find_or_add(StoreId(5), StoreId(2), 3.25, None).unwrap(), ShareChange::Created);
        assert_eq!(cache.share(StoreId(5), StoreId(1)), Some(21.0));

        let ops = store.ops();
        assert!(matches!(&ops[0], StoreOp::Update { rows, .. } if rows[0]["id"] == json!(iron.0)));
        assert!(matches!(&ops[1], StoreOp::Create { rows, .. } if rows[0]["material"] == json!(2)));
        assert_eq!(store.get(KIND, iron).unwrap()["share"], json!(21.0));
    }

    #[test]
    fn rejects_non_finite_shares() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = CompositionCache::new(KIND, store.clone()).unwrap();
        planner::load(&mut cache, &TableLoader::new(store, &StoreConfig::default())).unwrap();
        assert!(cache.find_or_add(StoreId(1), StoreId(1), f64::NAN, None).is_err());
    }
}
