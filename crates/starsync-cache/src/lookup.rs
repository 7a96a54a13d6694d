use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use starsync_client::RemoteStore;
use starsync_core::{CompactHashMap, EntityKind, Result, Row, Shape, StoreId, SyncError};
use tracing::{debug, info};

use crate::cache::SyncCache;
use crate::state::CacheCore;

pub const NAME_FIELD: &str = "name";

/// Small enumerated name table. Unknown names are created synchronously,
/// even in bulk mode, since the records that reference them need the id
/// immediately.
pub struct LookupCache {
    core: CacheCore,
    store: Arc<dyn RemoteStore>,
    names: CompactHashMap<Box<str>, StoreId>,
}

impl LookupCache {
    pub fn new(kind: EntityKind, store: Arc<dyn RemoteStore>) -> Self {
        debug_assert_eq!(kind.shape(), Shape::Lookup);
        Self {
            core: CacheCore::new(kind),
            store,
            names: CompactHashMap::default(),
        }
    }

    pub fn id(&self, name: &str) -> Option<StoreId> {
        self.names.get(name).copied()
    }

    /// Returns the id and whether the name had to be created.
    pub fn find_or_add(&mut self, name: &str) -> Result<(StoreId, bool)> {
        self.core.ensure_accepts_records()?;
        let kind = self.core.kind();
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidRecord {
                entity: kind,
                reason: "empty name".to_string(),
            });
        }
        if let Some(id) = self.names.get(name) {
            return Ok((*id, false));
        }

        let mut row = Row::new();
        row.insert(NAME_FIELD.to_string(), Value::from(name));
        let created = self.store.create(kind, row)?;
        let id = StoreId::of_row(&created).ok_or_else(|| {
            SyncError::Decode(format!("created {} row has no id", kind))
        })?;
        info!("new {} '{}' -> {}", kind, name, id);
        self.names.insert(name.into(), id);
        Ok((id, true))
    }
}

impl SyncCache for LookupCache {
    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn clear_index(&mut self) {
        self.names.clear();
    }

    fn forget(&mut self, _touched: &BTreeSet<i64>) {}

    fn absorb(&mut self, row: Row) {
        match (row.get(NAME_FIELD).and_then(Value::as_str), StoreId::of_row(&row)) {
            (Some(name), Some(id)) => {
                self.names.insert(name.into(), id);
            }
            _ => debug!("ignoring {} row without name or id", self.core.kind()),
        }
    }
}
